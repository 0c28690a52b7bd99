//! SQL-insert row parser.
//!
//! Reads `INSERT INTO ... VALUES (...),(...);` statements through the lexer's
//! statement mode and hands out every top-level value tuple as one row. Other
//! statements (`SET NAMES`, version comments, ...) carry no rows.

use super::lexer::{trim_ascii, Lexer, LexerOptions};
use super::{Row, RowParser, SMALL_BUFFER_SIZE};
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io::Read;
use std::ops::Range;

pub struct SqlInsertParser<R: Read> {
    lexer: Lexer<R>,
    pending: VecDeque<Vec<u8>>,
    last_row: Row,
    columns: Option<Vec<u8>>,
}

impl<R: Read> SqlInsertParser<R> {
    pub fn new(reader: R) -> Self {
        Self::with_block_size(reader, SMALL_BUFFER_SIZE)
    }

    pub fn with_block_size(reader: R, block_size: usize) -> Self {
        Self {
            lexer: Lexer::with_block_size(reader, LexerOptions::sql(), block_size),
            pending: VecDeque::new(),
            last_row: Row::default(),
            columns: None,
        }
    }

    /// Load the tuples of the next INSERT statement. `false` at end of input.
    fn next_statement(&mut self) -> Result<bool> {
        loop {
            let stmt_start = self.lexer.pos();
            let Some(chunk) = self.lexer.read_until(b';')? else {
                return Ok(false);
            };
            let stmt = &chunk.bytes;
            if !is_insert(stmt) {
                continue;
            }

            let keyword = find_values_keyword(stmt).ok_or_else(|| {
                Error::malformed(stmt_start, "INSERT statement missing VALUES keyword")
            })?;
            if let Some(columns) = column_list(&stmt[..keyword.start]) {
                self.columns = Some(columns);
            }
            let tuples = split_tuples(stmt, keyword.end).map_err(|e| e.shifted(stmt_start))?;
            self.pending.extend(tuples.into_iter().map(|t| t.to_vec()));
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl<R: Read> RowParser for SqlInsertParser<R> {
    fn read_row(&mut self) -> Result<Option<&Row>> {
        if self.pending.is_empty() && !self.next_statement()? {
            return Ok(None);
        }
        match self.pending.pop_front() {
            Some(tuple) => {
                self.last_row.tuple = tuple;
                self.last_row.row_id += 1;
                Ok(Some(&self.last_row))
            }
            None => Ok(None),
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

/// `VALUE` is MySQL's synonym for `VALUES`.
const VALUES_KEYWORDS: [&[u8]; 2] = [b"VALUES", b"VALUE"];

/// Words after which an identifier names the target table.
const TABLE_PREFIXES: [&[u8]; 4] = [b"INTO", b"INSERT", b"REPLACE", b"IGNORE"];

/// Number of value tuples a statement contributes; 0 for non-INSERT statements.
pub fn count_tuples(stmt: &[u8]) -> Result<u64> {
    if !is_insert(stmt) {
        return Ok(0);
    }
    let Some(keyword) = find_values_keyword(stmt) else {
        return Err(Error::malformed(0, "INSERT statement missing VALUES keyword"));
    };
    Ok(split_tuples(stmt, keyword.end)?.len() as u64)
}

fn is_insert(stmt: &[u8]) -> bool {
    let body = skip_leading_comments(stmt);
    starts_with_keyword(body, b"INSERT") || starts_with_keyword(body, b"REPLACE")
}

#[inline]
fn starts_with_keyword(data: &[u8], keyword: &[u8]) -> bool {
    data.len() >= keyword.len()
        && data[..keyword.len()].eq_ignore_ascii_case(keyword)
        && data.get(keyword.len()).map_or(true, |&b| !is_ident_byte(b))
}

#[inline]
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Strip `/* ... */`, `-- ...` and `# ...` comments ahead of the statement.
fn skip_leading_comments(mut data: &[u8]) -> &[u8] {
    loop {
        data = trim_ascii(data);
        if data.starts_with(b"/*") {
            match memchr::memmem::find(&data[2..], b"*/") {
                Some(end) => data = &data[end + 4..],
                None => return &[],
            }
        } else if data.starts_with(b"--") || data.starts_with(b"#") {
            match memchr::memchr(b'\n', data) {
                Some(end) => data = &data[end + 1..],
                None => return &[],
            }
        } else {
            return data;
        }
    }
}

/// Byte range of the `VALUES` (or `VALUE`) keyword that opens the tuple list.
///
/// Only words outside quotes and parentheses that are followed by `(` count,
/// and a word in table-name position is skipped, so columns or tables called
/// `value` are not mistaken for the keyword.
fn find_values_keyword(stmt: &[u8]) -> Option<Range<usize>> {
    let mut in_quote: Option<u8> = None;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut i = 0;
    while i < stmt.len() {
        let b = stmt[i];
        if escaped {
            escaped = false;
        } else if let Some(q) = in_quote {
            if b == b'\\' && q != b'`' {
                escaped = true;
            } else if b == q {
                in_quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' | b'`' => in_quote = Some(b),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b'V' | b'v'
                    if depth == 0
                        && (i == 0 || !(is_ident_byte(stmt[i - 1]) || stmt[i - 1] == b'.')) =>
                {
                    let keyword = VALUES_KEYWORDS
                        .iter()
                        .find(|kw| starts_with_keyword(&stmt[i..], kw));
                    if let Some(kw) = keyword {
                        let end = i + kw.len();
                        if opens_tuple_list(&stmt[end..]) && !in_table_position(&stmt[..i]) {
                            return Some(i..end);
                        }
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn opens_tuple_list(rest: &[u8]) -> bool {
    trim_ascii(rest).first() == Some(&b'(')
}

/// Whether the word ending `head` is one of [`TABLE_PREFIXES`].
fn in_table_position(head: &[u8]) -> bool {
    let head = trim_ascii(head);
    let start = head
        .iter()
        .rposition(|&b| !is_ident_byte(b))
        .map_or(0, |p| p + 1);
    let word = &head[start..];
    TABLE_PREFIXES.iter().any(|p| word.eq_ignore_ascii_case(p))
}

/// Backtick-quoted column list from the part of an INSERT before `VALUES`.
fn column_list(head: &[u8]) -> Option<Vec<u8>> {
    let close = head.iter().rposition(|&b| b == b')')?;
    let open = head[..close].iter().rposition(|&b| b == b'(')?;
    let inner = &head[open + 1..close];
    if trim_ascii(inner).is_empty() {
        return None;
    }

    let mut out = Vec::with_capacity(inner.len() + 8);
    for name in inner.split(|&b| b == b',') {
        let mut name = trim_ascii(name);
        if name.len() >= 2
            && matches!(name[0], b'`' | b'"')
            && name[name.len() - 1] == name[0]
        {
            name = &name[1..name.len() - 1];
        }
        out.push(b',');
        out.push(b'`');
        for &b in name {
            if b == b'`' {
                out.push(b'`');
            }
            out.push(b);
        }
        out.push(b'`');
    }
    out[0] = b'(';
    out.push(b')');
    Some(out)
}

/// Top-level parenthesized tuples following `VALUES`.
///
/// Scanning stops at the first byte that cannot continue a tuple list, so
/// trailers such as `ON DUPLICATE KEY UPDATE` are ignored.
fn split_tuples(stmt: &[u8], values_end: usize) -> Result<Vec<&[u8]>> {
    let mut tuples = Vec::new();
    let mut i = values_end;

    while i < stmt.len() {
        match stmt[i] {
            b if b.is_ascii_whitespace() || b == b',' => i += 1,
            b'(' => {
                let start = i;
                let end = tuple_end(stmt, start)?;
                tuples.push(&stmt[start..end]);
                i = end;
            }
            _ => break,
        }
    }

    Ok(tuples)
}

/// Index one past the `)` closing the tuple opened at `start`.
fn tuple_end(stmt: &[u8], start: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut in_quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in stmt.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match in_quote {
            Some(q) => {
                if b == b'\\' && q != b'`' {
                    escaped = true;
                } else if b == q {
                    in_quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => in_quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i + 1);
                    }
                }
                _ => {}
            },
        }
    }

    Err(Error::malformed(start as u64, "unterminated value tuple"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(sql: &[u8]) -> Vec<(u64, String)> {
        let mut parser = SqlInsertParser::with_block_size(sql, 7);
        let mut out = Vec::new();
        while let Some(row) = parser.read_row().unwrap() {
            out.push((row.row_id, String::from_utf8(row.tuple.clone()).unwrap()));
        }
        out
    }

    #[test]
    fn test_tuples_become_rows() {
        let sql = b"/*!40101 SET NAMES binary*/;\nINSERT INTO `t` VALUES (1,'a'),(2,'b;c');\nINSERT INTO `t` VALUES (3,NULL);\n";
        assert_eq!(
            rows(sql),
            vec![
                (1, "(1,'a')".to_string()),
                (2, "(2,'b;c')".to_string()),
                (3, "(3,NULL)".to_string()),
            ]
        );
    }

    #[test]
    fn test_nested_parens_and_escapes() {
        let sql = b"INSERT INTO t VALUES (1,POINT(1,2),'it\\'s (x)'),\n(2,'a''b',\"q)\");";
        let got = rows(sql);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].1, "(1,POINT(1,2),'it\\'s (x)')");
        assert_eq!(got[1].1, "(2,'a''b',\"q)\")");
    }

    #[test]
    fn test_column_list_captured() {
        let mut parser =
            SqlInsertParser::new(&b"INSERT INTO t (`id`, name) VALUES (1,'x');"[..]);
        parser.read_row().unwrap();
        assert_eq!(parser.columns(), Some(&b"(`id`,`name`)"[..]));
    }

    #[test]
    fn test_no_column_list() {
        let mut parser = SqlInsertParser::new(&b"INSERT INTO t VALUES (1);"[..]);
        parser.read_row().unwrap();
        assert!(parser.columns().is_none());
    }

    #[test]
    fn test_on_duplicate_key_trailer_ignored() {
        let sql = b"INSERT INTO t VALUES (1,2) ON DUPLICATE KEY UPDATE b=VALUES(b);";
        assert_eq!(count_tuples(sql).unwrap(), 1);
    }

    #[test]
    fn test_count_tuples_non_insert() {
        assert_eq!(count_tuples(b"SET NAMES utf8mb4;").unwrap(), 0);
        assert_eq!(count_tuples(b"-- dump\nINSERT INTO t VALUES (1),(2);").unwrap(), 2);
    }

    #[test]
    fn test_values_inside_string_is_not_keyword() {
        let stmt = b"INSERT INTO t (`values`) VALUES ('VALUES')";
        let keyword = find_values_keyword(stmt).unwrap();
        assert_eq!(&stmt[keyword.clone()], b"VALUES");
        assert_eq!(keyword, 25..31);
    }

    #[test]
    fn test_value_synonym() {
        assert_eq!(count_tuples(b"INSERT INTO t VALUE (1),(2);").unwrap(), 2);
        assert_eq!(count_tuples(b"insert into t value(1);").unwrap(), 1);

        let mut parser =
            SqlInsertParser::new(&b"INSERT INTO t (id, `note`) VALUE (7,'x');"[..]);
        assert_eq!(parser.read_row().unwrap().unwrap().tuple, b"(7,'x')");
        assert_eq!(parser.columns(), Some(&b"(`id`,`note`)"[..]));
    }

    #[test]
    fn test_value_named_columns_and_tables() {
        let mut parser =
            SqlInsertParser::new(&b"INSERT INTO value (id, value) VALUES (1,2),(3,4);"[..]);
        assert_eq!(parser.read_row().unwrap().unwrap().tuple, b"(1,2)");
        assert_eq!(parser.columns(), Some(&b"(`id`,`value`)"[..]));

        assert_eq!(count_tuples(b"INSERT INTO value(id) VALUE (1);").unwrap(), 1);
        assert_eq!(count_tuples(b"INSERT IGNORE db.value VALUES (1),(2);").unwrap(), 2);
    }

    #[test]
    fn test_unterminated_tuple_is_malformed() {
        let err = count_tuples(b"INSERT INTO t VALUES (1,'x'").unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(err.offset(), Some(21));
    }

    #[test]
    fn test_row_id_base() {
        let mut parser = SqlInsertParser::new(&b"INSERT INTO t VALUES (1),(2);"[..]);
        parser.set_row_id_base(41);
        assert_eq!(parser.read_row().unwrap().unwrap().row_id, 42);
        assert_eq!(parser.read_row().unwrap().unwrap().row_id, 43);
        assert!(parser.read_row().unwrap().is_none());
    }
}
