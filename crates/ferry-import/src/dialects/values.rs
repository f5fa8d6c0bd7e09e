//! `INSERT ... VALUES (...), (...);` scanning
//!
//! The scanner is fed raw bytes, one line at a time, and reports each
//! completed tuple. Quote and escape state carries across feeds, so string
//! literals may span lines.

use ferry_core::Value;

use crate::dialects::ddl::tokenize;
use crate::dialects::{bare_name, parse_identifier_list};
use crate::value_coercion::decode_hex;

/// Target of an `INSERT`, taken from the text before `VALUES`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertHeader {
    pub table: String,
    pub columns: Option<Vec<String>>,
}

/// `INSERT [IGNORE] INTO t [(cols)] VALUES` / `REPLACE INTO ...`
pub fn parse_insert_header(text: &str) -> Option<InsertHeader> {
    let tokens = tokenize(text);
    let head = tokens.first()?;
    if !head.eq_ignore_ascii_case("INSERT") && !head.eq_ignore_ascii_case("REPLACE") {
        return None;
    }
    let at = tokens.iter().position(|t| t.eq_ignore_ascii_case("INTO"))? + 1;
    let table = tokens.get(at)?;
    let columns = tokens
        .get(at + 1)
        .filter(|t| t.starts_with('('))
        .map(|t| parse_identifier_list(t));
    Some(InsertHeader {
        table: bare_name(table),
        columns,
    })
}

/// Whether a dump line starts an `INSERT`/`REPLACE` statement
pub fn is_insert_start(line: &str) -> bool {
    let trimmed = line.trim_start();
    let upper: String = trimmed.chars().take(8).collect::<String>().to_ascii_uppercase();
    upper.starts_with("INSERT ") || upper.starts_with("REPLACE ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Between,
    Tuple,
    Quoted(u8),
    Escape(u8),
    QuoteEnd(u8),
    /// `ON DUPLICATE KEY UPDATE ...` and similar, up to `;`
    Trailer,
    Done,
}

pub struct InsertScanner {
    backslash_escapes: bool,
    keep_values: bool,
    state: State,
    header_text: Vec<u8>,
    header_quote: Option<u8>,
    header: Option<InsertHeader>,
    depth: u32,
    prefix: Vec<u8>,
    raw: Vec<u8>,
    string: Option<Vec<u8>>,
    row: Vec<Value>,
}

impl InsertScanner {
    /// `backslash_escapes` is true for MySQL; `keep_values` false when only
    /// counting tuples.
    pub fn new(backslash_escapes: bool, keep_values: bool) -> Self {
        Self {
            backslash_escapes,
            keep_values,
            state: State::Header,
            header_text: Vec::new(),
            header_quote: None,
            header: None,
            depth: 0,
            prefix: Vec::new(),
            raw: Vec::new(),
            string: None,
            row: Vec::new(),
        }
    }

    pub fn header(&self) -> Option<&InsertHeader> {
        self.header.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feed the next bytes of the statement, calling `on_row` for every
    /// complete tuple. Returns `Ok(true)` once the terminating `;` is seen.
    pub fn feed<F>(&mut self, bytes: &[u8], on_row: &mut F) -> Result<bool, String>
    where
        F: FnMut(&InsertHeader, Vec<Value>),
    {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match self.state {
                State::Header => {
                    if let Some(q) = self.header_quote {
                        if b == q {
                            self.header_quote = None;
                        }
                    } else if matches!(b, b'`' | b'"' | b'\'') {
                        self.header_quote = Some(b);
                    } else if b == b'(' && self.ends_with_values() {
                        let text = String::from_utf8_lossy(&self.header_text);
                        let header = parse_insert_header(&text)
                            .ok_or_else(|| format!("unrecognized INSERT header: {}", text.trim()))?;
                        self.header = Some(header);
                        self.state = State::Between;
                        continue;
                    } else if b == b';' {
                        return Err("INSERT statement has no VALUES list".to_string());
                    }
                    self.header_text.push(b);
                }
                State::Between => match b {
                    b'(' => {
                        self.state = State::Tuple;
                        self.depth = 1;
                        self.row.clear();
                        self.reset_field();
                    }
                    b';' => {
                        self.state = State::Done;
                        return Ok(true);
                    }
                    b',' => {}
                    c if c.is_ascii_whitespace() => {}
                    _ => self.state = State::Trailer,
                },
                State::Tuple => match b {
                    b'\'' => self.begin_string(b),
                    b'"' if self.backslash_escapes => self.begin_string(b),
                    b'(' => {
                        self.depth += 1;
                        self.push_raw(b);
                    }
                    b')' => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            let empty_tuple = self.row.is_empty()
                                && self.string.is_none()
                                && self.raw.iter().all(u8::is_ascii_whitespace);
                            if !empty_tuple {
                                self.finish_field();
                            }
                            let row = std::mem::take(&mut self.row);
                            if let Some(header) = &self.header {
                                on_row(header, row);
                            }
                            self.state = State::Between;
                        } else {
                            self.push_raw(b);
                        }
                    }
                    b',' if self.depth == 1 => self.finish_field(),
                    _ => self.push_raw(b),
                },
                State::Quoted(q) => {
                    if b == b'\\' && self.backslash_escapes {
                        self.state = State::Escape(q);
                    } else if b == q {
                        self.state = State::QuoteEnd(q);
                    } else {
                        self.push_string(&[b]);
                    }
                }
                State::Escape(q) => {
                    match b {
                        b'0' => self.push_string(&[0]),
                        b'b' => self.push_string(&[0x08]),
                        b'n' => self.push_string(b"\n"),
                        b'r' => self.push_string(b"\r"),
                        b't' => self.push_string(b"\t"),
                        b'Z' => self.push_string(&[0x1a]),
                        b'%' => self.push_string(b"\\%"),
                        b'_' => self.push_string(b"\\_"),
                        other => self.push_string(&[other]),
                    }
                    self.state = State::Quoted(q);
                }
                State::QuoteEnd(q) => {
                    if b == q {
                        self.push_string(&[q]);
                        self.state = State::Quoted(q);
                    } else {
                        self.state = State::Tuple;
                        continue;
                    }
                }
                State::Trailer => {
                    if b == b';' {
                        self.state = State::Done;
                        return Ok(true);
                    }
                }
                State::Done => return Ok(true),
            }
            i += 1;
        }
        Ok(self.state == State::Done)
    }

    fn ends_with_values(&self) -> bool {
        let text = String::from_utf8_lossy(&self.header_text);
        let trimmed = text.trim_end();
        let Some(split) = trimmed.len().checked_sub(6) else {
            return false;
        };
        match (trimmed.get(..split), trimmed.get(split..)) {
            (Some(before), Some(keyword)) => {
                keyword.eq_ignore_ascii_case("VALUES")
                    && before
                        .chars()
                        .last()
                        .is_some_and(|c| c.is_whitespace() || c == ')' || c == '`' || c == '"')
            }
            _ => false,
        }
    }

    fn reset_field(&mut self) {
        self.prefix.clear();
        self.raw.clear();
        self.string = None;
    }

    fn begin_string(&mut self, quote: u8) {
        if self.string.is_none() {
            self.prefix = std::mem::take(&mut self.raw);
            self.string = Some(Vec::new());
        }
        self.state = State::Quoted(quote);
    }

    fn push_raw(&mut self, b: u8) {
        if self.keep_values {
            self.raw.push(b);
        }
    }

    fn push_string(&mut self, bytes: &[u8]) {
        if self.keep_values {
            if let Some(string) = &mut self.string {
                string.extend_from_slice(bytes);
            }
        }
    }

    fn finish_field(&mut self) {
        let value = if !self.keep_values {
            Value::Null
        } else {
            match self.string.take() {
                Some(string) => quoted_value(&self.prefix, string),
                None => unquoted_value(&self.raw),
            }
        };
        self.row.push(value);
        self.reset_field();
    }
}

fn quoted_value(prefix: &[u8], bytes: Vec<u8>) -> Value {
    let prefix = String::from_utf8_lossy(prefix).trim().to_ascii_lowercase();
    match prefix.as_str() {
        "_binary" => Value::Bytes(bytes),
        "x" => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match decode_hex(&text) {
                Some(decoded) => Value::Bytes(decoded),
                None => Value::String(text),
            }
        }
        "b" => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match u64::from_str_radix(&text, 2) {
                Ok(n) => Value::Int64(n as i64),
                Err(_) => Value::String(text),
            }
        }
        _ => match String::from_utf8(bytes) {
            Ok(text) => Value::String(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
    }
}

fn unquoted_value(raw: &[u8]) -> Value {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("NULL") {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("TRUE") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("FALSE") {
        return Value::Bool(false);
    }
    if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        if let Some(bytes) = decode_hex(digits) {
            return Value::Bytes(bytes);
        }
    }
    match text.parse::<i64>() {
        Ok(n) => Value::Int64(n),
        Err(_) => Value::String(text.to_string()),
    }
}
