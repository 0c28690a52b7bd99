//! Table regions: byte ranges of data files that can be parsed independently.
//!
//! [`make_table_regions`] walks each data file of a table along row (CSV) or
//! statement (SQL) boundaries and cuts it into regions of at least
//! `min_region_size` bytes. For every file the regions are gap-free, their sizes
//! add up to the file size and their row-id ranges are contiguous, starting at 1.

pub mod engine;
pub mod reader;

pub use engine::{allocate_engine_ids, EngineBatcher, Phase};
pub use reader::RegionReader;

use crate::config::{Config, CsvConfig, MIN_READ_BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::loader::{DataFile, SourceFormat, TableMeta};
use crate::parser::{count_tuples, CsvParser, Lexer, LexerOptions, RowParser};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRegion {
    pub file: PathBuf,
    pub format: SourceFormat,
    /// Import batch; [`TableRegion::UNASSIGNED_ENGINE`] until allocated.
    pub engine_id: i32,
    offset: u64,
    size: u64,
    row_id_min: u64,
    row_count: u64,
}

impl Default for TableRegion {
    fn default() -> Self {
        Self {
            file: PathBuf::new(),
            format: SourceFormat::SqlInsert,
            engine_id: Self::UNASSIGNED_ENGINE,
            offset: 0,
            size: 0,
            row_id_min: 1,
            row_count: 0,
        }
    }
}

impl TableRegion {
    pub const UNASSIGNED_ENGINE: i32 = -1;

    pub fn new(
        file: impl Into<PathBuf>,
        format: SourceFormat,
        offset: u64,
        size: u64,
        row_id_min: u64,
        row_count: u64,
    ) -> Self {
        Self {
            file: file.into(),
            format,
            engine_id: Self::UNASSIGNED_ENGINE,
            offset,
            size,
            row_id_min,
            row_count,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn engine_id(&self) -> i32 {
        self.engine_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }

    pub fn row_id_min(&self) -> u64 {
        self.row_id_min
    }

    pub fn rows(&self) -> u64 {
        self.row_count
    }
}

/// Sizing parameters for [`make_table_regions`].
#[derive(Debug, Clone)]
pub struct RegionOptions {
    pub min_region_size: u64,
    /// Read block size of the boundary walk.
    pub region_block_size: usize,
    /// Expected column count; only feeds the row estimate in logs.
    pub column_count: usize,
    /// Files of one table walked in parallel.
    pub concurrency: usize,
    pub csv: CsvConfig,
}

impl Default for RegionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RegionOptions {
    pub fn new(
        min_region_size: u64,
        region_block_size: usize,
        column_count: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            min_region_size,
            region_block_size,
            column_count,
            concurrency,
            csv: CsvConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            min_region_size: config.mydumper.min_region_size,
            region_block_size: config.mydumper.read_block_size,
            column_count: config.mydumper.column_count,
            concurrency: config.batch.region_concurrency,
            csv: config.mydumper.csv.clone(),
        }
    }

    pub fn with_csv(mut self, csv: CsvConfig) -> Self {
        self.csv = csv;
        self
    }
}

/// Split every data file of `table` into regions, in file-list order.
pub fn make_table_regions(table: &TableMeta, opts: &RegionOptions) -> Result<Vec<TableRegion>> {
    opts.csv.validate()?;
    let block_size = opts.region_block_size.max(MIN_READ_BLOCK_SIZE);
    let files = &table.data_files;

    let per_file: Vec<Vec<TableRegion>> = if opts.concurrency > 1 && files.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.concurrency.min(files.len()))
            .build()
            .map_err(|e| Error::Config(format!("cannot start region workers: {e}")))?;
        pool.install(|| {
            files
                .par_iter()
                .map(|file| split_data_file(file, opts, block_size))
                .collect::<Result<Vec<_>>>()
        })?
    } else {
        files
            .iter()
            .map(|file| split_data_file(file, opts, block_size))
            .collect::<Result<Vec<_>>>()?
    };

    let regions: Vec<TableRegion> = per_file.into_iter().flatten().collect();
    info!(
        table = %table.name,
        files = files.len(),
        regions = regions.len(),
        rows = regions.iter().map(|r| r.rows()).sum::<u64>(),
        "computed table regions"
    );
    Ok(regions)
}

/// Cut one data file into regions closed at the first boundary past
/// `min_region_size`.
fn split_data_file(
    data_file: &DataFile,
    opts: &RegionOptions,
    block_size: usize,
) -> Result<Vec<TableRegion>> {
    let path = data_file.path.as_path();
    let file_size = fs::metadata(path)
        .map_err(|e| Error::io(path, 0, e))?
        .len();
    if file_size == 0 {
        return Ok(Vec::new());
    }

    let file = File::open(path).map_err(|e| Error::io(path, 0, e))?;
    let mut walker = BoundaryWalker::new(data_file.format, file, &opts.csv, block_size);

    let mut regions: Vec<TableRegion> = Vec::new();
    let mut region_start = 0u64;
    let mut region_rows = 0u64;
    let mut rows_before = 0u64;

    while let Some(rows) = walker.next_boundary().map_err(|e| e.with_path(path))? {
        region_rows += rows;
        let end = walker.pos();
        if end - region_start >= opts.min_region_size {
            let region = TableRegion::new(
                path,
                data_file.format,
                region_start,
                end - region_start,
                rows_before + 1,
                region_rows,
            );
            debug!(
                file = %path.display(),
                offset = region.offset(),
                size = region.size(),
                row_id_min = region.row_id_min(),
                rows = region.rows(),
                "region"
            );
            regions.push(region);
            rows_before += region_rows;
            region_start = end;
            region_rows = 0;
        }
    }

    let end = walker.pos();
    if end > region_start {
        let tail = end - region_start;
        // Row-less tail (blank lines, trailing SET statements) joins the last region.
        if region_rows == 0 && !regions.is_empty() {
            let last = regions.len() - 1;
            regions[last].size += tail;
        } else {
            regions.push(TableRegion::new(
                path,
                data_file.format,
                region_start,
                tail,
                rows_before + 1,
                region_rows,
            ));
        }
    }

    let total: u64 = regions.iter().map(|r| r.size()).sum();
    if total != file_size || end != file_size {
        return Err(Error::MalformedInput {
            path: path.to_path_buf(),
            offset: end,
            reason: format!(
                "region sizes ({total} bytes) do not reconcile with file size ({file_size} bytes)"
            ),
        });
    }

    if opts.column_count > 0 {
        debug!(
            file = %path.display(),
            rows = rows_before + region_rows,
            estimated_rows = file_size / (opts.column_count as u64 + 2),
            "row count vs estimate"
        );
    }

    Ok(regions)
}

/// Walks a data file from one row/statement boundary to the next.
enum BoundaryWalker<R: Read> {
    Sql(Lexer<R>),
    Csv(Box<CsvParser<R>>),
}

impl<R: Read> BoundaryWalker<R> {
    fn new(format: SourceFormat, reader: R, csv: &CsvConfig, block_size: usize) -> Self {
        match format {
            SourceFormat::SqlInsert => BoundaryWalker::Sql(Lexer::with_block_size(
                reader,
                LexerOptions::sql(),
                block_size,
            )),
            SourceFormat::Csv => BoundaryWalker::Csv(Box::new(CsvParser::with_block_size(
                reader, csv, true, block_size,
            ))),
        }
    }

    /// Advance past the next boundary, returning the rows in between.
    fn next_boundary(&mut self) -> Result<Option<u64>> {
        match self {
            BoundaryWalker::Sql(lexer) => {
                let start = lexer.pos();
                match lexer.read_until(b';')? {
                    Some(chunk) => {
                        let rows = count_tuples(&chunk.bytes).map_err(|e| e.shifted(start))?;
                        Ok(Some(rows))
                    }
                    None => Ok(None),
                }
            }
            BoundaryWalker::Csv(parser) => Ok(parser.read_row()?.map(|_| 1)),
        }
    }

    fn pos(&self) -> u64 {
        match self {
            BoundaryWalker::Sql(lexer) => lexer.pos(),
            BoundaryWalker::Csv(parser) => parser.pos(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_default_region_is_unassigned() {
        let region = TableRegion::default();
        assert_eq!(region.engine_id(), TableRegion::UNASSIGNED_ENGINE);
        assert_eq!(region.row_id_min(), 1);
    }

    #[test]
    fn test_regions_close_at_statement_boundaries() {
        let dir = TempDir::new().unwrap();
        let sql = b"INSERT INTO t VALUES (1),(2);\nINSERT INTO t VALUES (3);\nINSERT INTO t VALUES (4),(5),(6);\n";
        let path = write_file(&dir, "db.t.sql", sql);
        let table = TableMeta::new("db", "t").with_data_files([path]);

        let opts = RegionOptions::new(40, 4096, 0, 1);
        let regions = make_table_regions(&table, &opts).unwrap();

        // the first two statements are needed to pass 40 bytes
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].offset(), 0);
        assert_eq!(regions[0].size(), 56);
        assert_eq!(regions[0].rows(), 3);
        assert_eq!(regions[1].offset(), 56);
        assert_eq!(regions[1].row_id_min(), 4);
        assert_eq!(regions[1].rows(), 3);
        assert_eq!(regions[1].end_offset(), sql.len() as u64);
    }

    #[test]
    fn test_row_less_tail_joins_last_region() {
        let dir = TempDir::new().unwrap();
        let csv = b"1,a\n2,b\n\n\n";
        let path = write_file(&dir, "db.t.csv", csv);
        let table = TableMeta::new("db", "t").with_data_files([path]);

        let regions = make_table_regions(&table, &RegionOptions::new(1, 4096, 0, 1)).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].size(), 6);
        assert_eq!(regions[1].rows(), 1);
    }

    #[test]
    fn test_empty_file_has_no_regions() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "db.t.sql", b"");
        let table = TableMeta::new("db", "t").with_data_files([path]);
        assert!(make_table_regions(&table, &RegionOptions::new(1, 4096, 0, 1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let table = TableMeta::new("db", "t").with_data_files(["/definitely/not/here.sql"]);
        let err = make_table_regions(&table, &RegionOptions::new(1, 4096, 0, 1)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_unterminated_quote_reports_file_and_offset() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "db.t.csv", b"1,ok\n2,\"broken\n");
        let table = TableMeta::new("db", "t").with_data_files([path.clone()]);
        let err = make_table_regions(&table, &RegionOptions::new(1, 4096, 0, 1)).unwrap_err();
        match err {
            Error::MalformedInput {
                path: p, offset, ..
            } => {
                assert_eq!(p, path);
                assert_eq!(offset, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
