//! YAML configuration for region splitting, engine batching and CSV parsing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Smallest block the lexer will read at once.
pub const MIN_READ_BLOCK_SIZE: usize = 4 * 1024;
pub const DEFAULT_READ_BLOCK_SIZE: usize = 64 * 1024;
pub const DEFAULT_MIN_REGION_SIZE: u64 = 256 * MIB;
pub const DEFAULT_BATCH_SIZE: u64 = 100 * GIB;
pub const DEFAULT_BATCH_IMPORT_RATIO: f64 = 0.75;
pub const DEFAULT_TABLE_CONCURRENCY: usize = 6;

/// CSV dialect options.
///
/// `separator` sits between fields; `delimiter` is the quoting character, and a
/// doubled delimiter inside a quoted field stands for one literal delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub separator: String,
    pub delimiter: String,
    pub null: String,
    pub not_null: bool,
    pub backslash_escape: bool,
    pub trim_last_sep: bool,
    pub header: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            separator: ",".to_string(),
            delimiter: "\"".to_string(),
            null: String::new(),
            not_null: false,
            backslash_escape: false,
            trim_last_sep: false,
            header: false,
        }
    }
}

impl CsvConfig {
    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(Error::Config("csv.separator must not be empty".into()));
        }
        if self.delimiter.len() > 1 {
            return Err(Error::Config(format!(
                "csv.delimiter must be a single byte, got {:?}",
                self.delimiter
            )));
        }
        if let Some(quote) = self.quote() {
            if self.separator.as_bytes().contains(&quote) {
                return Err(Error::Config(
                    "csv.separator and csv.delimiter must not overlap".into(),
                ));
            }
        }
        Ok(())
    }

    /// Quote byte, or `None` when quoting is disabled.
    pub fn quote(&self) -> Option<u8> {
        self.delimiter.as_bytes().first().copied()
    }
}

/// Where the dump lives and how its files are cut into regions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MydumperConfig {
    pub source_dir: PathBuf,
    pub read_block_size: usize,
    pub min_region_size: u64,
    /// Expected number of columns; only used for row estimates.
    pub column_count: usize,
    pub csv: CsvConfig,
}

impl Default for MydumperConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            read_block_size: DEFAULT_READ_BLOCK_SIZE,
            min_region_size: DEFAULT_MIN_REGION_SIZE,
            column_count: 0,
            csv: CsvConfig::default(),
        }
    }
}

/// Engine batching policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: u64,
    pub import_ratio: f64,
    pub table_concurrency: usize,
    pub region_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            import_ratio: DEFAULT_BATCH_IMPORT_RATIO,
            table_concurrency: DEFAULT_TABLE_CONCURRENCY,
            region_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mydumper: MydumperConfig,
    pub batch: BatchConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, 0, e))?;
        let config = Self::from_yaml(&content)?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml_ng::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mydumper.read_block_size == 0 {
            return Err(Error::Config("mydumper.read_block_size must be positive".into()));
        }
        if self.mydumper.min_region_size == 0 {
            return Err(Error::Config("mydumper.min_region_size must be positive".into()));
        }
        if self.batch.size == 0 {
            return Err(Error::Config("batch.size must be positive".into()));
        }
        if !(self.batch.import_ratio >= 0.0 && self.batch.import_ratio.is_finite()) {
            return Err(Error::Config(format!(
                "batch.import_ratio must be a non-negative number, got {}",
                self.batch.import_ratio
            )));
        }
        if self.batch.table_concurrency == 0 {
            return Err(Error::Config("batch.table_concurrency must be positive".into()));
        }
        self.mydumper.csv.validate()
    }
}
