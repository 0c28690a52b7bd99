//! Reading the bytes of one region.
//!
//! A [`RegionReader`] holds no file handle between calls: every read opens the
//! file, seeks and closes it again, so any number of readers may work on the same
//! file concurrently.

use super::TableRegion;
use crate::config::CsvConfig;
use crate::error::{Error, Result};
use crate::loader::SourceFormat;
use crate::parser::{new_row_parser, Lexer, LexerOptions, Row, RowParser, TokenKind};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RegionReader {
    file: PathBuf,
    format: SourceFormat,
    offset: u64,
    size: u64,
    row_id_min: u64,
    csv: CsvConfig,
    /// Bytes of the region already handed out.
    cursor: u64,
    header_pending: bool,
}

impl RegionReader {
    pub fn new(file: impl Into<PathBuf>, format: SourceFormat, offset: u64, size: u64) -> Self {
        Self {
            file: file.into(),
            format,
            offset,
            size,
            row_id_min: 1,
            csv: CsvConfig::default(),
            cursor: 0,
            header_pending: false,
        }
    }

    pub fn from_region(region: &TableRegion) -> Self {
        let mut reader = Self::new(
            region.file(),
            region.format,
            region.offset(),
            region.size(),
        );
        reader.row_id_min = region.row_id_min();
        reader
    }

    /// CSV dialect used to find row boundaries; a header line at offset 0 is
    /// dropped from [`RegionReader::read`] output when `csv.header` is set.
    pub fn with_csv(mut self, csv: CsvConfig) -> Self {
        self.header_pending = self.format == SourceFormat::Csv && csv.header && self.offset == 0;
        self.csv = csv;
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.size
    }

    /// Next complete statements (SQL) or rows (CSV), reading about `max_bytes`
    /// at a time.
    ///
    /// The window doubles until it holds at least one complete unit; only the
    /// region's final unit may lack a terminator. Statements are trimmed of
    /// surrounding whitespace, rows of their line ending. An empty result means
    /// the region is exhausted.
    pub fn read(&mut self, max_bytes: u64) -> Result<Vec<Vec<u8>>> {
        let step = max_bytes.max(1);
        let mut window = step;
        let mut buf = Vec::new();

        loop {
            let remaining = self.remaining();
            if remaining == 0 {
                return Ok(Vec::new());
            }
            window = window.min(remaining);
            let at_end = window == remaining;

            // bytes from an unsuccessful attempt are kept, only the tail is read
            self.read_window(&mut buf, window)?;
            let (mut items, consumed) = self
                .split(&buf, at_end)
                .map_err(|e| e.shifted(self.offset + self.cursor).with_path(&self.file))?;

            if at_end {
                self.cursor = self.size;
            } else if consumed > 0 {
                self.cursor += consumed as u64;
            } else {
                window = window.saturating_mul(2);
                continue;
            }

            if self.header_pending && !items.is_empty() {
                items.remove(0);
                self.header_pending = false;
            }
            if !items.is_empty() || self.is_exhausted() {
                return Ok(items);
            }
            window = step;
            buf.clear();
        }
    }

    /// Row parser over the whole region, with row ids continuing from the
    /// region's `row_id_min`.
    pub fn row_parser(
        &self,
        csv: &CsvConfig,
        block_size: usize,
    ) -> Result<Box<dyn RowParser + Send>> {
        let mut file =
            File::open(&self.file).map_err(|e| Error::io(&self.file, self.offset, e))?;
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| Error::io(&self.file, self.offset, e))?;

        let mut inner = new_row_parser(
            self.format,
            file.take(self.size),
            csv,
            self.offset == 0,
            block_size,
        );
        inner.set_row_id_base(self.row_id_min.saturating_sub(1));

        Ok(Box::new(RegionRows {
            inner,
            file: self.file.clone(),
            offset: self.offset,
        }))
    }

    /// Extend `buf` to the first `len` bytes after the cursor.
    fn read_window(&self, buf: &mut Vec<u8>, len: u64) -> Result<()> {
        let start = self.offset + self.cursor + buf.len() as u64;
        let mut file = File::open(&self.file).map_err(|e| Error::io(&self.file, start, e))?;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| Error::io(&self.file, start, e))?;

        let filled = buf.len();
        buf.resize(len as usize, 0);
        file.read_exact(&mut buf[filled..])
            .map_err(|e| Error::io(&self.file, start, e))?;
        Ok(())
    }

    fn split(&self, buf: &[u8], at_end: bool) -> Result<(Vec<Vec<u8>>, usize)> {
        match self.format {
            SourceFormat::SqlInsert => split_statements(buf, at_end),
            SourceFormat::Csv => split_rows(buf, &self.csv, at_end),
        }
    }
}

/// Complete statements in `buf` and the number of bytes they span.
fn split_statements(buf: &[u8], at_end: bool) -> Result<(Vec<Vec<u8>>, usize)> {
    let mut lexer = Lexer::with_block_size(buf, LexerOptions::sql(), buf.len());
    let mut out = Vec::new();
    let mut consumed = 0usize;

    loop {
        match lexer.read_until(b';') {
            Ok(Some(chunk)) if chunk.terminated || at_end => {
                if !chunk.bytes.is_empty() {
                    out.push(chunk.bytes);
                }
                consumed = lexer.pos() as usize;
            }
            Ok(Some(_)) => break,
            Ok(None) => {
                consumed = lexer.pos() as usize;
                break;
            }
            // a string cut by the window edge
            Err(e) if e.is_malformed() && !at_end => break,
            Err(e) => return Err(e),
        }
    }
    Ok((out, consumed))
}

/// Complete CSV lines in `buf` and the number of bytes they span.
fn split_rows(buf: &[u8], csv: &CsvConfig, at_end: bool) -> Result<(Vec<Vec<u8>>, usize)> {
    let mut lexer = Lexer::with_block_size(buf, LexerOptions::csv(csv), buf.len());
    let mut out = Vec::new();
    let mut consumed = 0usize;
    let mut row_start = 0usize;
    let mut row_end = 0usize;

    loop {
        let tok = match lexer.lex() {
            Ok(tok) => tok,
            Err(e) if e.is_malformed() && !at_end => break,
            Err(e) => return Err(e),
        };
        match tok.kind {
            TokenKind::Separator | TokenKind::Field | TokenKind::QuotedField => {
                row_end = lexer.pos() as usize;
            }
            TokenKind::NewLine => {
                if row_end > row_start {
                    out.push(buf[row_start..row_end].to_vec());
                }
                consumed = lexer.pos() as usize;
                row_start = consumed;
                row_end = consumed;
            }
            TokenKind::Eof => {
                if at_end {
                    if row_end > row_start {
                        out.push(buf[row_start..row_end].to_vec());
                    }
                    consumed = buf.len();
                }
                break;
            }
        }
    }
    Ok((out, consumed))
}

/// Attaches the region's file and offset to parser errors.
struct RegionRows {
    inner: Box<dyn RowParser + Send>,
    file: PathBuf,
    offset: u64,
}

impl RowParser for RegionRows {
    fn read_row(&mut self) -> Result<Option<&Row>> {
        let (file, offset) = (&self.file, self.offset);
        self.inner
            .read_row()
            .map_err(|e| e.shifted(offset).with_path(file))
    }

    fn last_row(&self) -> &Row {
        self.inner.last_row()
    }

    fn columns(&self) -> Option<&[u8]> {
        self.inner.columns()
    }

    /// Absolute file offset.
    fn pos(&self) -> u64 {
        self.offset + self.inner.pos()
    }

    fn set_row_id_base(&mut self, base: u64) {
        self.inner.set_row_id_base(base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(content: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    fn drain(reader: &mut RegionReader, max_bytes: u64) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let items = reader.read(max_bytes).unwrap();
            if items.is_empty() {
                break;
            }
            out.extend(items.into_iter().map(|b| String::from_utf8(b).unwrap()));
        }
        out
    }

    #[test]
    fn test_small_window_grows_to_whole_statement() {
        let sql = b"INSERT INTO t VALUES (1,'a;b');\nINSERT INTO t VALUES (2,'c');\n";
        let f = temp_file(sql);
        let mut reader =
            RegionReader::new(f.path(), SourceFormat::SqlInsert, 0, sql.len() as u64);
        assert_eq!(
            drain(&mut reader, 4),
            vec![
                "INSERT INTO t VALUES (1,'a;b');",
                "INSERT INTO t VALUES (2,'c');"
            ]
        );
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_long_statement_read_with_small_window() {
        let mut sql = b"INSERT INTO t VALUES ".to_vec();
        for i in 0..40_000 {
            if i > 0 {
                sql.push(b',');
            }
            sql.extend_from_slice(format!("({i},'row;{i}')").as_bytes());
        }
        sql.extend_from_slice(b";\nINSERT INTO t VALUES (0);\n");
        let f = temp_file(&sql);
        let mut reader =
            RegionReader::new(f.path(), SourceFormat::SqlInsert, 0, sql.len() as u64);

        let got = drain(&mut reader, 512);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].len(), sql.len() - 27);
        assert!(got[0].ends_with("(39999,'row;39999');"));
        assert_eq!(got[1], "INSERT INTO t VALUES (0);");
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_region_tail_without_terminator() {
        let sql = b"INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)";
        let f = temp_file(sql);
        let mut reader =
            RegionReader::new(f.path(), SourceFormat::SqlInsert, 0, sql.len() as u64);
        let got = drain(&mut reader, 1024);
        assert_eq!(got[1], "INSERT INTO t VALUES (2)");
    }

    #[test]
    fn test_csv_rows_from_offset() {
        let csv = b"id,name\n1,\"a\nb\"\n2,c\r\n\n3,d";
        let f = temp_file(csv);
        let mut reader = RegionReader::new(f.path(), SourceFormat::Csv, 8, csv.len() as u64 - 8);
        assert_eq!(drain(&mut reader, 3), vec!["1,\"a\nb\"", "2,c", "3,d"]);
    }

    #[test]
    fn test_csv_header_dropped_at_file_head() {
        let csv = b"id,name\n1,a\n";
        let f = temp_file(csv);
        let cfg = CsvConfig {
            header: true,
            ..Default::default()
        };
        let mut reader =
            RegionReader::new(f.path(), SourceFormat::Csv, 0, csv.len() as u64).with_csv(cfg);
        assert_eq!(drain(&mut reader, 64), vec!["1,a"]);
    }

    #[test]
    fn test_short_read_is_io_error() {
        let f = temp_file(b"INSERT INTO t VALUES (1);");
        let mut reader = RegionReader::new(f.path(), SourceFormat::SqlInsert, 10, 100);
        match reader.read(1024).unwrap_err() {
            Error::Io { offset, source, .. } => {
                assert_eq!(offset, 10);
                assert_eq!(source.kind(), std::io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_error_carries_file_offset() {
        let sql = b"INSERT INTO t VALUES (1);\nINSERT INTO t VALUES ('x);";
        let f = temp_file(sql);
        let mut reader = RegionReader::new(f.path(), SourceFormat::SqlInsert, 0, sql.len() as u64);
        let err = reader.read(1024).unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(err.offset(), Some(48));
        assert!(err.to_string().contains(&f.path().display().to_string()));
    }

    #[test]
    fn test_row_parser_continues_row_ids() {
        let sql = b"INSERT INTO t VALUES (1),(2);\nINSERT INTO t VALUES (3),(4);\n";
        let f = temp_file(sql);
        let region = TableRegion::new(f.path(), SourceFormat::SqlInsert, 30, 30, 3, 2);
        let reader = RegionReader::from_region(&region);
        let mut parser = reader.row_parser(&CsvConfig::default(), 4096).unwrap();

        let first = parser.read_row().unwrap().unwrap().clone();
        assert_eq!(first.row_id, 3);
        assert_eq!(first.tuple, b"(3)");
        assert_eq!(parser.read_row().unwrap().unwrap().row_id, 4);
        assert!(parser.read_row().unwrap().is_none());
        assert_eq!(parser.pos(), 60);
    }
}
