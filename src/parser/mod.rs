//! Row parsers that turn raw dump bytes into canonical `(v1,v2,...)` tuples.
//!
//! Both variants sit on the block [`lexer`]: the CSV parser consumes its token
//! stream, the SQL-insert parser its statement mode.

pub mod csv;
pub mod lexer;
pub mod sql_insert;

pub use self::csv::CsvParser;
pub use self::lexer::{Chunk, Lexer, LexerOptions, RowTokenizer, Token, TokenKind};
pub use self::sql_insert::{count_tuples, SqlInsertParser};

use crate::config::CsvConfig;
use crate::error::Result;
use crate::loader::SourceFormat;
use std::io::Read;

pub const SMALL_BUFFER_SIZE: usize = 64 * 1024;

/// One canonical row tuple.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    /// Monotonic within the owning parser's stream.
    pub row_id: u64,
    pub tuple: Vec<u8>,
}

/// Whether the parser still has to consume a CSV header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingHeader,
    ReadingRows,
}

pub trait RowParser {
    /// Parse the next row; `None` once the stream is exhausted.
    fn read_row(&mut self) -> Result<Option<&Row>>;

    fn last_row(&self) -> &Row;

    /// Backtick-quoted column list, e.g. `` (`id`,`name`) ``, when the source
    /// carries one (CSV header or INSERT column list).
    fn columns(&self) -> Option<&[u8]>;

    /// Bytes consumed from the underlying stream.
    fn pos(&self) -> u64;

    /// Row id the next row counts up from; the next row gets `base + 1`.
    fn set_row_id_base(&mut self, base: u64);
}

/// Build the parser matching a data file's format.
///
/// `at_file_head` tells the CSV parser the stream starts at offset 0, which is
/// the only place a header line can appear.
pub fn new_row_parser<'a, R: Read + Send + 'a>(
    format: SourceFormat,
    reader: R,
    csv: &CsvConfig,
    at_file_head: bool,
    block_size: usize,
) -> Box<dyn RowParser + Send + 'a> {
    match format {
        SourceFormat::Csv => Box::new(CsvParser::with_block_size(
            reader,
            csv,
            at_file_head,
            block_size,
        )),
        SourceFormat::SqlInsert => Box::new(SqlInsertParser::with_block_size(reader, block_size)),
    }
}
