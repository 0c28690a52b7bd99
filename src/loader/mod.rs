//! Dump directory discovery.
//!
//! Classifies the files of a mydumper-style directory into databases and tables:
//!
//! - `{db}-schema-create.sql` creates the database
//! - `{db}.{table}-schema.sql` creates a table
//! - `{db}.{table}.sql`, `{db}.{table}.{n}.sql` (and `.csv`) hold table data

use crate::error::{Error, Result};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Text format of a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    SqlInsert,
    Csv,
}

impl SourceFormat {
    /// Detect format from file extension; anything but `.csv` is SQL.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("csv") => SourceFormat::Csv,
            _ => SourceFormat::SqlInsert,
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::SqlInsert => write!(f, "sql"),
            SourceFormat::Csv => write!(f, "csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataFile {
    pub path: PathBuf,
    pub format: SourceFormat,
}

impl DataFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SourceFormat::from_path(&path);
        Self { path, format }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMeta {
    pub db: String,
    pub name: String,
    pub schema_file: Option<PathBuf>,
    pub data_files: Vec<DataFile>,
}

impl TableMeta {
    pub fn new(db: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            name: name.into(),
            schema_file: None,
            data_files: Vec::new(),
        }
    }

    pub fn with_data_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.data_files.extend(files.into_iter().map(DataFile::new));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseMeta {
    pub name: String,
    pub schema_file: Option<PathBuf>,
    pub tables: Vec<TableMeta>,
}

impl DatabaseMeta {
    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }
}

static DB_SCHEMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^.]+)-schema-create\.sql$").unwrap());

static TABLE_SCHEMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^.]+)\.(.+)-schema\.sql$").unwrap());

static DATA_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([^.]+)\.(.+?)(?:\.(\d+))?\.(sql|csv)$").unwrap()
});

/// Classified view of one dump directory.
#[derive(Debug)]
pub struct MyDumpLoader {
    source_dir: PathBuf,
    databases: Vec<DatabaseMeta>,
}

#[derive(Default)]
struct DbBuilder {
    schema_file: Option<PathBuf>,
    tables: AHashMap<String, TableMeta>,
}

impl MyDumpLoader {
    pub fn new(source_dir: impl Into<PathBuf>) -> Result<Self> {
        let source_dir = source_dir.into();
        if !source_dir.is_dir() {
            return Err(Error::NotFound { path: source_dir });
        }

        let mut names: Vec<String> = Vec::new();
        let entries = fs::read_dir(&source_dir).map_err(|e| Error::io(&source_dir, 0, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&source_dir, 0, e))?;
            if !entry.path().is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!(file = ?name, "skipping file with non UTF-8 name"),
            }
        }
        names.sort();

        let mut dbs: AHashMap<String, DbBuilder> = AHashMap::new();
        for name in &names {
            let path = source_dir.join(name);
            if let Some(caps) = DB_SCHEMA_RE.captures(name) {
                dbs.entry(caps[1].to_string()).or_default().schema_file = Some(path);
            } else if let Some(caps) = TABLE_SCHEMA_RE.captures(name) {
                table_entry(&mut dbs, &caps[1], &caps[2]).schema_file = Some(path);
            } else if let Some(caps) = DATA_FILE_RE.captures(name) {
                table_entry(&mut dbs, &caps[1], &caps[2])
                    .data_files
                    .push(DataFile::new(path));
            } else {
                warn!(file = %name, "skipping unrecognized file");
            }
        }

        let mut databases: Vec<DatabaseMeta> = dbs
            .into_iter()
            .map(|(name, builder)| {
                let mut tables: Vec<TableMeta> = builder.tables.into_values().collect();
                tables.sort_by(|a, b| a.name.cmp(&b.name));
                DatabaseMeta {
                    name,
                    schema_file: builder.schema_file,
                    tables,
                }
            })
            .collect();
        databases.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            dir = %source_dir.display(),
            databases = databases.len(),
            "loaded dump directory"
        );

        Ok(Self {
            source_dir,
            databases,
        })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn databases(&self) -> &[DatabaseMeta] {
        &self.databases
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseMeta> {
        self.databases.iter().find(|d| d.name == name)
    }
}

fn table_entry<'a>(
    dbs: &'a mut AHashMap<String, DbBuilder>,
    db: &str,
    table: &str,
) -> &'a mut TableMeta {
    dbs.entry(db.to_string())
        .or_default()
        .tables
        .entry(table.to_string())
        .or_insert_with(|| TableMeta::new(db, table))
}
