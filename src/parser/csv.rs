//! CSV row parser.
//!
//! Rewrites each logical CSV line into an SQL value tuple: fields are quoted with
//! `'`, backslashes are doubled unless the source already uses backslash
//! escaping, and fields matching the configured NULL marker become `NULL`.

use super::lexer::{Lexer, LexerOptions, TokenKind};
use super::{ParserState, Row, RowParser, SMALL_BUFFER_SIZE};
use crate::config::CsvConfig;
use crate::error::Result;
use std::io::Read;

pub struct CsvParser<R: Read> {
    lexer: Lexer<R>,
    cfg: CsvConfig,
    state: ParserState,
    row_buf: Vec<u8>,
    last_row: Row,
    columns: Option<Vec<u8>>,
    /// The quote delimiter, single and doubled.
    delim1: Vec<u8>,
    delim2: Vec<u8>,
}

impl<R: Read> CsvParser<R> {
    pub fn new(reader: R, cfg: &CsvConfig, at_file_head: bool) -> Self {
        Self::with_block_size(reader, cfg, at_file_head, SMALL_BUFFER_SIZE)
    }

    pub fn with_block_size(
        reader: R,
        cfg: &CsvConfig,
        at_file_head: bool,
        block_size: usize,
    ) -> Self {
        let state = if cfg.header && at_file_head {
            ParserState::AwaitingHeader
        } else {
            ParserState::ReadingRows
        };
        let delim1 = cfg.delimiter.as_bytes().to_vec();
        let delim2 = delim1.repeat(2);

        Self {
            lexer: Lexer::with_block_size(reader, LexerOptions::csv(cfg), block_size),
            cfg: cfg.clone(),
            state,
            row_buf: Vec::with_capacity(1024),
            last_row: Row::default(),
            columns: None,
            delim1,
            delim2,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    fn append_empty_values(&mut self, count: usize) {
        let value: &[u8] = if !self.cfg.not_null && self.cfg.null.is_empty() {
            b",NULL"
        } else {
            b",''"
        };
        for _ in 0..count {
            self.row_buf.extend_from_slice(value);
        }
    }

    fn append_field(&mut self, raw: &[u8], quoted: bool, quote: u8, allow_null: bool) {
        let mut content: &[u8] = raw;
        if quoted && content.len() >= 2 {
            content = &content[1..content.len() - 1];
        }
        let unquoted = if quoted && !self.delim1.is_empty() {
            replace_all(content, &self.delim2, &self.delim1)
        } else {
            content.to_vec()
        };
        let escaped = if self.cfg.backslash_escape {
            unquoted
        } else {
            replace_all(&unquoted, b"\\", b"\\\\")
        };

        // Matched after escaping: with `backslash_escape` off, a source `\N`
        // only equals the marker `\\N`.
        if allow_null && !self.cfg.not_null && escaped == self.cfg.null.as_bytes() {
            self.row_buf.extend_from_slice(b",NULL");
            return;
        }

        self.row_buf.push(b',');
        self.row_buf.push(quote);
        for &b in &escaped {
            if b == quote {
                self.row_buf.push(quote);
            }
            self.row_buf.push(b);
        }
        self.row_buf.push(quote);
    }

    /// Turn the `,v1,v2` buffer into `(v1,v2)`.
    fn seal(&mut self) -> Vec<u8> {
        let mut tuple = std::mem::take(&mut self.row_buf);
        match tuple.first_mut() {
            Some(first) => *first = b'(',
            None => tuple.push(b'('),
        }
        tuple.push(b')');
        tuple
    }

    fn read_header(&mut self) -> Result<()> {
        loop {
            let tok = self.lexer.lex()?;
            match tok.kind {
                TokenKind::Separator => {}
                TokenKind::Field => self.append_field(&tok.content, false, b'`', false),
                TokenKind::QuotedField => self.append_field(&tok.content, true, b'`', false),
                TokenKind::NewLine | TokenKind::Eof => {
                    if !self.row_buf.is_empty() {
                        self.columns = Some(self.seal());
                        return Ok(());
                    }
                    if tok.kind == TokenKind::Eof {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl<R: Read> RowParser for CsvParser<R> {
    fn read_row(&mut self) -> Result<Option<&Row>> {
        if self.state == ParserState::AwaitingHeader {
            self.read_header()?;
            self.state = ParserState::ReadingRows;
        }

        // `field_open` marks a field position that has not received a value yet.
        // Empty positions are held back until a value follows them, so a
        // trailing run can be dropped as a whole.
        let mut field_open = true;
        let mut pending_empty = 0usize;
        let mut has_content = false;

        loop {
            let tok = self.lexer.lex()?;
            match tok.kind {
                TokenKind::Separator => {
                    if field_open {
                        pending_empty += 1;
                    }
                    field_open = true;
                    has_content = true;
                }
                TokenKind::Field | TokenKind::QuotedField => {
                    let quoted = tok.kind == TokenKind::QuotedField;
                    self.append_empty_values(pending_empty);
                    pending_empty = 0;
                    self.append_field(&tok.content, quoted, b'\'', true);
                    field_open = false;
                    has_content = true;
                }
                TokenKind::NewLine | TokenKind::Eof => {
                    if !has_content {
                        if tok.kind == TokenKind::Eof {
                            return Ok(None);
                        }
                        // blank line
                        continue;
                    }
                    if field_open {
                        pending_empty += 1;
                    }
                    if !self.cfg.trim_last_sep {
                        self.append_empty_values(pending_empty);
                    }
                    self.last_row.tuple = self.seal();
                    self.last_row.row_id += 1;
                    return Ok(Some(&self.last_row));
                }
            }
        }
    }

    fn last_row(&self) -> &Row {
        &self.last_row
    }

    fn columns(&self) -> Option<&[u8]> {
        self.columns.as_deref()
    }

    fn pos(&self) -> u64 {
        self.lexer.pos()
    }

    fn set_row_id_base(&mut self, base: u64) {
        self.last_row.row_id = base;
    }
}

fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut last = 0;
    for pos in memchr::memmem::find_iter(haystack, from) {
        if pos < last {
            continue;
        }
        out.extend_from_slice(&haystack[last..pos]);
        out.extend_from_slice(to);
        last = pos + from.len();
    }
    out.extend_from_slice(&haystack[last..]);
    out
}
