//! Block-level lexer shared by the CSV and SQL-insert row parsers.
//!
//! The lexer owns a small block buffer over any `Read` and never pulls more than
//! one block ahead of what it has handed out, so whole dump files are never
//! loaded into memory. It has two scanning modes over the same buffer:
//!
//! - token mode ([`Lexer::lex`]) splits CSV-like input into separators,
//!   newlines and (quoted) fields;
//! - statement mode ([`Lexer::read_until`]) cuts SQL input at a terminator
//!   byte that sits outside any quoted string.

use crate::error::{Error, Result};
use std::io::{self, Read};

use super::SMALL_BUFFER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Separator,
    NewLine,
    Field,
    /// Field content including its surrounding quote bytes.
    QuotedField,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub content: Vec<u8>,
}

impl Token {
    fn new(kind: TokenKind, content: Vec<u8>) -> Self {
        Self { kind, content }
    }

    fn bare(kind: TokenKind) -> Self {
        Self::new(kind, Vec::new())
    }
}

/// Format rules the lexer is parameterized with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerOptions {
    pub separator: Vec<u8>,
    pub quote: Option<u8>,
    pub backslash_escape: bool,
}

impl LexerOptions {
    pub fn csv(config: &crate::config::CsvConfig) -> Self {
        Self {
            separator: config.separator.as_bytes().to_vec(),
            quote: config.quote(),
            backslash_escape: config.backslash_escape,
        }
    }

    /// MySQL-style dumps: comma separated values, backslash escapes in strings.
    pub fn sql() -> Self {
        Self {
            separator: b",".to_vec(),
            quote: Some(b'\''),
            backslash_escape: true,
        }
    }
}

/// Bytes of one statement-mode chunk, with surrounding whitespace trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// Whether the chunk ended at the terminator rather than at end of input.
    pub terminated: bool,
}

/// Token source capability shared by the row parsers.
pub trait RowTokenizer {
    fn next_token(&mut self) -> Result<Token>;

    /// Bytes consumed from the underlying stream so far.
    fn pos(&self) -> u64;
}

pub struct Lexer<R: Read> {
    reader: R,
    buf: Vec<u8>,
    start: usize,
    eof: bool,
    pos: u64,
    block_size: usize,
    opts: LexerOptions,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R, opts: LexerOptions) -> Self {
        Self::with_block_size(reader, opts, SMALL_BUFFER_SIZE)
    }

    pub fn with_block_size(reader: R, opts: LexerOptions, block_size: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(block_size),
            start: 0,
            eof: false,
            pos: 0,
            block_size: block_size.max(1),
            opts,
        }
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[inline]
    fn available(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        self.start += n;
        self.pos += n as u64;
    }

    /// Read one more block. Returns `false` once the reader is exhausted.
    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }

        let old_len = self.buf.len();
        self.buf.resize(old_len + self.block_size, 0);
        let n = loop {
            match self.reader.read(&mut self.buf[old_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old_len);
                    return Err(Error::Io {
                        path: Default::default(),
                        offset: self.pos + old_len as u64,
                        source: e,
                    });
                }
            }
        };
        self.buf.truncate(old_len + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(n > 0)
    }

    /// Make sure at least `n` bytes are buffered; `false` if input ends first.
    fn ensure(&mut self, n: usize) -> Result<bool> {
        while self.available().len() < n {
            if !self.fill()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Next token in token mode.
    pub fn lex(&mut self) -> Result<Token> {
        if !self.ensure(1)? {
            return Ok(Token::bare(TokenKind::Eof));
        }

        let sep_len = self.opts.separator.len();
        if sep_len > 0 {
            self.ensure(sep_len)?;
            if self.available().starts_with(&self.opts.separator) {
                self.advance(sep_len);
                return Ok(Token::bare(TokenKind::Separator));
            }
        }

        let first = self.available()[0];
        match first {
            b'\n' => {
                self.advance(1);
                Ok(Token::bare(TokenKind::NewLine))
            }
            b'\r' => {
                self.advance(1);
                if self.ensure(1)? && self.available()[0] == b'\n' {
                    self.advance(1);
                }
                Ok(Token::bare(TokenKind::NewLine))
            }
            b if Some(b) == self.opts.quote => self.lex_quoted(b),
            _ => self.lex_unquoted(),
        }
    }

    fn lex_quoted(&mut self, quote: u8) -> Result<Token> {
        let field_start = self.pos;
        let escape = self.opts.backslash_escape;
        let mut content = vec![quote];
        self.advance(1);

        loop {
            if !self.ensure(1)? {
                return Err(Error::malformed(field_start, "unterminated quoted field"));
            }

            let avail = self.available();
            let mut i = 0;
            let mut closed = false;
            let mut need_more = false;
            while i < avail.len() {
                let b = avail[i];
                if escape && b == b'\\' {
                    if i + 1 >= avail.len() {
                        need_more = true;
                        break;
                    }
                    i += 2;
                    continue;
                }
                if b == quote {
                    if i + 1 >= avail.len() {
                        need_more = true;
                        break;
                    }
                    if avail[i + 1] == quote {
                        i += 2;
                        continue;
                    }
                    i += 1;
                    closed = true;
                    break;
                }
                i += 1;
            }

            content.extend_from_slice(&avail[..i]);
            self.advance(i);

            if closed {
                return Ok(Token::new(TokenKind::QuotedField, content));
            }
            if need_more && !self.ensure(2)? {
                // Exactly one byte is left before end of input.
                if self.available()[0] == quote {
                    content.push(quote);
                    self.advance(1);
                    return Ok(Token::new(TokenKind::QuotedField, content));
                }
                return Err(Error::malformed(field_start, "unterminated quoted field"));
            }
        }
    }

    fn lex_unquoted(&mut self) -> Result<Token> {
        let escape = self.opts.backslash_escape;
        let mut content = Vec::new();

        loop {
            if !self.ensure(1)? {
                return Ok(Token::new(TokenKind::Field, content));
            }

            let sep = self.opts.separator.as_slice();
            let avail = &self.buf[self.start..];
            let mut i = 0;
            let mut stop = false;
            let mut need_more = false;
            while i < avail.len() {
                let b = avail[i];
                if b == b'\n' || b == b'\r' {
                    stop = true;
                    break;
                }
                let rest = &avail[i..];
                if !sep.is_empty() {
                    if rest.len() >= sep.len() {
                        if rest.starts_with(sep) {
                            stop = true;
                            break;
                        }
                    } else if sep.starts_with(rest) {
                        need_more = true;
                        break;
                    }
                }
                if escape && b == b'\\' {
                    if i + 1 >= avail.len() {
                        need_more = true;
                        break;
                    }
                    i += 2;
                    continue;
                }
                i += 1;
            }

            content.extend_from_slice(&avail[..i]);
            self.advance(i);

            if stop {
                return Ok(Token::new(TokenKind::Field, content));
            }
            if need_more {
                let pending = self.available().len();
                if !self.ensure(pending + 1)? {
                    // The ambiguous tail turned out to be plain field bytes.
                    content.extend_from_slice(self.available());
                    self.advance(pending);
                    return Ok(Token::new(TokenKind::Field, content));
                }
            }
        }
    }

    /// Statement mode: bytes through the next `terminator` outside quotes.
    ///
    /// Quotes are `'`, `"` and `` ` ``; a doubled quote is literal, and with
    /// `backslash_escape` a backslash protects the next byte inside `'`/`"`
    /// strings. Whitespace following the terminator is consumed with the chunk.
    /// Returns `None` once only whitespace is left.
    pub fn read_until(&mut self, terminator: u8) -> Result<Option<Chunk>> {
        let escape = self.opts.backslash_escape;
        let mut bytes = Vec::new();
        let mut in_quote: Option<u8> = None;
        let mut quote_start = 0u64;
        let mut escaped = false;
        let mut terminated = false;

        while !terminated {
            if !self.ensure(1)? {
                break;
            }

            let base = self.pos;
            let avail = &self.buf[self.start..];
            let mut consumed = avail.len();
            for (i, &b) in avail.iter().enumerate() {
                if escaped {
                    escaped = false;
                    continue;
                }
                match in_quote {
                    Some(q) => {
                        if escape && b == b'\\' && q != b'`' {
                            escaped = true;
                        } else if b == q {
                            in_quote = None;
                        }
                    }
                    None => {
                        if b == terminator {
                            consumed = i + 1;
                            terminated = true;
                            break;
                        }
                        if matches!(b, b'\'' | b'"' | b'`') {
                            in_quote = Some(b);
                            quote_start = base + i as u64;
                        }
                    }
                }
            }

            bytes.extend_from_slice(&avail[..consumed]);
            self.advance(consumed);
        }

        if !terminated && in_quote.is_some() {
            return Err(Error::malformed(quote_start, "unterminated quoted string"));
        }

        self.skip_whitespace()?;

        let trimmed = trim_ascii(&bytes);
        if trimmed.is_empty() {
            if terminated {
                return Ok(Some(Chunk {
                    bytes: Vec::new(),
                    terminated,
                }));
            }
            return Ok(None);
        }
        Ok(Some(Chunk {
            bytes: trimmed.to_vec(),
            terminated,
        }))
    }

    /// Consume ASCII whitespace up to the next significant byte.
    pub fn skip_whitespace(&mut self) -> Result<()> {
        while self.ensure(1)? {
            let n = self
                .available()
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.available().len());
            self.advance(n);
            if !self.available().is_empty() {
                break;
            }
        }
        Ok(())
    }
}

impl<R: Read> RowTokenizer for Lexer<R> {
    fn next_token(&mut self) -> Result<Token> {
        self.lex()
    }

    fn pos(&self) -> u64 {
        self.pos
    }
}

#[inline]
pub(crate) fn trim_ascii(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &data[start..end]
}
