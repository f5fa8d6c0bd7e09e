//! Source readers, one per dump dialect

use async_trait::async_trait;
use ferry_core::Value;
use std::io::{self, BufRead};
use std::path::Path;

use crate::row_stream::RowStream;
use crate::schema::{SourceColumn, SourceSchema, SourceTable};
use crate::{ImportError, SourceFormat};

pub mod ddl;
pub(crate) mod dump;
pub mod mysql;
pub mod mysql_shell;
pub mod postgres;
pub mod sqlite;
pub mod values;

pub use mysql::MySqlDumpReader;
pub use mysql_shell::MySqlShellReader;
pub use postgres::PostgresDumpReader;
pub use sqlite::SqliteReader;

/// Read access to one source, shared by every dialect
#[async_trait]
pub trait SourceReader: Send + Sync {
    fn format(&self) -> SourceFormat;

    fn path(&self) -> &Path;

    /// Single pass over the source: schema, row counts and data locations
    async fn read_schema(&self) -> Result<SourceSchema, ImportError>;

    /// Stream the rows of `table`, in table column order
    fn open_rows(&self, schema: &SourceSchema, table: &SourceTable)
    -> Result<RowStream, ImportError>;
}

/// Run blocking parser work off the async runtime
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ImportError>
where
    F: FnOnce() -> Result<T, ImportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ImportError::Io(io::Error::other(e)))?
}

/// Whether `text` starts with `keyword` as a whole word, ignoring case
pub fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    let Some(head) = text.get(..keyword.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(keyword)
        && text[keyword.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'))
}

/// Strip one level of `"..."`, `` `...` `` or `[...]` quoting
pub fn unquote_identifier(raw: &str) -> String {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        let inner = &raw[1..raw.len() - 1];
        match (first, last) {
            (b'"', b'"') => return inner.replace("\"\"", "\""),
            (b'`', b'`') => return inner.replace("``", "`"),
            (b'[', b']') => return inner.to_string(),
            _ => {}
        }
    }
    raw.to_string()
}

/// Last component of a possibly schema-qualified name, unquoted
pub fn bare_name(qualified: &str) -> String {
    let parts = split_top_level(qualified, '.');
    parts
        .last()
        .map(|last| unquote_identifier(last))
        .unwrap_or_default()
}

/// Split on `sep` outside quotes and parentheses
pub fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' && q == '\'' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            c if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current);
    }
    parts
}

/// `(a, "b", `c`)` → `[a, b, c]`
pub fn parse_identifier_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(trimmed);
    split_top_level(inner, ',')
        .iter()
        .map(|item| unquote_identifier(item))
        .filter(|item| !item.is_empty())
        .collect()
}

/// Index of the `)` matching the `(` at `open`, ignoring quoted text
pub fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Buffered line reader that knows where each line starts
pub struct LineReader<R> {
    reader: R,
    buf: Vec<u8>,
    next_offset: u64,
    next_line: u64,
    /// Byte offset of the current line
    pub offset: u64,
    /// 1-based number of the current line
    pub line: u64,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::starting_at(reader, 0, 1)
    }

    pub fn starting_at(reader: R, offset: u64, line: u64) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            next_offset: offset,
            next_line: line,
            offset,
            line,
        }
    }

    /// Advance to the next line; `false` at end of input
    pub fn advance(&mut self) -> io::Result<bool> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(false);
        }
        self.offset = self.next_offset;
        self.line = self.next_line;
        self.next_offset += read as u64;
        self.next_line += 1;
        Ok(true)
    }

    /// Byte offset of the line after the current one
    pub fn position(&self) -> u64 {
        self.next_offset
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Declare where the next line starts after the reader was repositioned
    pub fn reset(&mut self, offset: u64, line: u64) {
        self.buf.clear();
        self.next_offset = offset;
        self.next_line = line;
    }

    /// Current line including its terminator
    pub fn raw(&self) -> &[u8] {
        &self.buf
    }

    /// Current line without `\n` / `\r\n`
    pub fn bytes(&self) -> &[u8] {
        let mut end = self.buf.len();
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        &self.buf[..end]
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.bytes())
    }
}

/// Tracks quoting across lines to find where a SQL statement ends
#[derive(Debug)]
pub struct StatementScanner {
    backslash_escapes: bool,
    dollar_quotes: bool,
    quote: Option<Quote>,
    escaped: bool,
    text: String,
    keep_text: bool,
    pub start_offset: u64,
    pub start_line: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Quote {
    Char(char),
    Dollar(String),
}

impl StatementScanner {
    pub fn new(backslash_escapes: bool, dollar_quotes: bool) -> Self {
        Self {
            backslash_escapes,
            dollar_quotes,
            quote: None,
            escaped: false,
            text: String::new(),
            keep_text: true,
            start_offset: 0,
            start_line: 0,
        }
    }

    /// Begin a statement; when `keep_text` is false only quoting is tracked
    pub fn begin(&mut self, offset: u64, line: u64, keep_text: bool) {
        self.quote = None;
        self.escaped = false;
        self.text.clear();
        self.keep_text = keep_text;
        self.start_offset = offset;
        self.start_line = line;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn take_text(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// Feed one line (without terminator); `true` once a `;` closes the
    /// statement. Text after the terminator is dropped.
    pub fn push_line(&mut self, line: &str) -> bool {
        if self.keep_text && !self.text.is_empty() {
            self.text.push('\n');
        }
        let chars: Vec<(usize, char)> = line.char_indices().collect();
        let mut i = 0;
        while i < chars.len() {
            let (pos, ch) = chars[i];
            match &self.quote {
                Some(Quote::Char(q)) => {
                    if self.escaped {
                        self.escaped = false;
                    } else if ch == '\\' && self.backslash_escapes {
                        self.escaped = true;
                    } else if ch == *q {
                        self.quote = None;
                    }
                }
                Some(Quote::Dollar(tag)) => {
                    if ch == '$' && line[pos..].starts_with(tag.as_str()) {
                        let tag_len = tag.chars().count();
                        if self.keep_text {
                            self.text.push_str(&line[pos..pos + tag.len()]);
                        }
                        self.quote = None;
                        i += tag_len;
                        continue;
                    }
                }
                None => match ch {
                    '\'' | '"' | '`' => self.quote = Some(Quote::Char(ch)),
                    '$' if self.dollar_quotes => {
                        if let Some(tag) = dollar_tag(&line[pos..]) {
                            if self.keep_text {
                                self.text.push_str(&tag);
                            }
                            i += tag.chars().count();
                            self.quote = Some(Quote::Dollar(tag));
                            continue;
                        }
                    }
                    '-' if line[pos..].starts_with("--") => break,
                    ';' => {
                        if self.keep_text {
                            self.text.push(';');
                        }
                        return true;
                    }
                    _ => {}
                },
            }
            if self.keep_text {
                self.text.push(ch);
            }
            i += 1;
        }
        false
    }
}

/// `$tag$` at the start of `text`
fn dollar_tag(text: &str) -> Option<String> {
    let rest = text.strip_prefix('$')?;
    let end = rest.find('$')?;
    let tag = &rest[..end];
    if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit())
    {
        Some(format!("${}$", tag))
    } else {
        None
    }
}

/// Maps fields listed in a data statement's column order onto table order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// For each table column, the field position that supplies it
    sources: Vec<Option<usize>>,
    field_count: usize,
    identity: bool,
}

impl Projection {
    pub fn new(table: &[SourceColumn], listed: Option<&[String]>) -> Self {
        match listed {
            None => Self {
                sources: (0..table.len()).map(Some).collect(),
                field_count: table.len(),
                identity: true,
            },
            Some(listed) => {
                let sources: Vec<Option<usize>> = table
                    .iter()
                    .map(|col| {
                        listed
                            .iter()
                            .position(|l| *l == col.name)
                            .or_else(|| listed.iter().position(|l| l.eq_ignore_ascii_case(&col.name)))
                    })
                    .collect();
                let identity = listed.len() == table.len()
                    && sources.iter().enumerate().all(|(i, s)| *s == Some(i));
                Self {
                    sources,
                    field_count: listed.len(),
                    identity,
                }
            }
        }
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Reorder `fields`; `None` when the field count does not match
    pub fn apply(&self, fields: Vec<Value>) -> Option<Vec<Value>> {
        if fields.len() != self.field_count {
            return None;
        }
        if self.identity {
            return Some(fields);
        }
        let mut fields: Vec<Option<Value>> = fields.into_iter().map(Some).collect();
        Some(
            self.sources
                .iter()
                .map(|source| {
                    source
                        .and_then(|i| fields.get_mut(i).and_then(Option::take))
                        .unwrap_or(Value::Null)
                })
                .collect(),
        )
    }
}
