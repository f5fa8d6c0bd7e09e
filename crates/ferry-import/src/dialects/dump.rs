//! Line-oriented scanning shared by the PostgreSQL and MySQL dump readers
//!
//! Analysis makes one pass over the dump: DDL statements are accumulated and
//! handed to the dialect, data statements are counted and their byte offsets
//! recorded. The copy phase seeks straight to those offsets.

use indexmap::IndexMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use ferry_core::Value;

use crate::ImportError;
use crate::dialects::ddl::tokenize;
use crate::dialects::values::{InsertScanner, is_insert_start};
use crate::dialects::{
    LineReader, Projection, StatementScanner, bare_name, parse_identifier_list, starts_with_keyword,
};
use crate::row_stream::RowSink;
use crate::schema::{DataLocation, DataSegment, SegmentKind, SourceColumn, SourceSchema};
use crate::type_mapping::Dialect;

const READ_BUFFER: usize = 256 * 1024;

/// What differs between the text dump dialects
pub(crate) struct DumpSyntax {
    pub dialect: Dialect,
    /// Backslash escapes inside string literals (MySQL)
    pub backslash_escapes: bool,
    /// `$tag$ ... $tag$` bodies (PostgreSQL)
    pub dollar_quotes: bool,
    /// `COPY ... FROM stdin` blocks (PostgreSQL)
    pub copy_blocks: bool,
    /// Whether a statement starting with this text should be kept
    pub wants: fn(&str) -> bool,
    /// Apply one complete DDL statement
    pub apply: fn(&mut SourceSchema, &str),
}

/// Row counts and data offsets per table, keyed by the name used in the dump
#[derive(Debug, Default)]
struct DataIndex {
    entries: IndexMap<String, (u64, Vec<DataSegment>)>,
}

impl DataIndex {
    fn record(&mut self, table: &str, segment: DataSegment, rows: u64) {
        let entry = self.entries.entry(table.to_string()).or_default();
        entry.0 += rows;
        entry.1.push(segment);
    }

    fn attach(self, schema: &mut SourceSchema) {
        let mut counts: IndexMap<String, u64> =
            schema.tables.iter().map(|t| (t.name.clone(), 0)).collect();
        for (name, (rows, segments)) in self.entries {
            let Some(table) = schema.resolve_table_name(&name) else {
                schema.warn(format!(
                    "Ignored {} rows for table {} which has no CREATE TABLE",
                    rows, name
                ));
                continue;
            };
            *counts.entry(table.clone()).or_default() += rows;
            match schema
                .locations
                .entry(table)
                .or_insert_with(|| DataLocation::Segments(Vec::new()))
            {
                DataLocation::Segments(existing) => existing.extend(segments),
                other => *other = DataLocation::Segments(segments),
            }
        }
        schema.row_counts = counts;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CopyHeader {
    pub table: String,
    pub columns: Option<Vec<String>>,
}

/// `COPY [schema.]table [(cols)] FROM stdin;`
pub(crate) fn parse_copy_header(line: &str) -> Option<CopyHeader> {
    let tokens = tokenize(line.trim().trim_end_matches(';'));
    if !tokens.first()?.eq_ignore_ascii_case("COPY") {
        return None;
    }
    let from = tokens.iter().position(|t| t.eq_ignore_ascii_case("FROM"))?;
    if !tokens.get(from + 1)?.eq_ignore_ascii_case("stdin") {
        return None;
    }
    let columns = tokens
        .get(2)
        .filter(|t| t.starts_with('('))
        .map(|t| parse_identifier_list(t));
    Some(CopyHeader {
        table: bare_name(tokens.get(1)?),
        columns,
    })
}

fn is_copy_terminator(line: &[u8]) -> bool {
    line == b"\\."
}

#[tracing::instrument(skip(path, syntax), fields(path = %path.display()))]
pub(crate) fn scan_dump(path: &Path, syntax: &DumpSyntax) -> Result<SourceSchema, ImportError> {
    let file = File::open(path)?;
    let mut lines = LineReader::new(BufReader::with_capacity(READ_BUFFER, file));
    let mut schema = SourceSchema::new(syntax.dialect);
    let mut data = DataIndex::default();
    let mut statement = StatementScanner::new(syntax.backslash_escapes, syntax.dollar_quotes);

    while lines.advance()? {
        let text = lines.text().into_owned();
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        // psql meta-commands such as \connect
        if syntax.copy_blocks && trimmed.starts_with('\\') {
            continue;
        }
        if starts_with_keyword(trimmed, "DELIMITER") {
            skip_delimited_block(&mut lines, trimmed)?;
            continue;
        }

        let (offset, line) = (lines.offset, lines.line);
        if syntax.copy_blocks && starts_with_keyword(trimmed, "COPY") {
            if let Some(header) = parse_copy_header(trimmed) {
                let rows = count_copy_rows(&mut lines, path, line)?;
                tracing::debug!(table = %header.table, rows, line, "counted COPY block");
                data.record(
                    &header.table,
                    DataSegment {
                        offset,
                        line,
                        kind: SegmentKind::Copy,
                    },
                    rows,
                );
                continue;
            }
        }

        if is_insert_start(trimmed) {
            let (table, rows) = count_insert_rows(&mut lines, path, syntax.backslash_escapes)?;
            data.record(
                &table,
                DataSegment {
                    offset,
                    line,
                    kind: SegmentKind::Insert,
                },
                rows,
            );
            continue;
        }

        let keep = (syntax.wants)(trimmed);
        statement.begin(offset, line, keep);
        let mut done = statement.push_line(&text);
        while !done {
            if !lines.advance()? {
                break;
            }
            done = statement.push_line(&lines.text());
        }
        if keep {
            if done {
                (syntax.apply)(&mut schema, statement.text());
            } else {
                return Err(ImportError::parse(path, line, "statement is not terminated"));
            }
        }
    }

    data.attach(&mut schema);
    Ok(schema)
}

/// mysqldump wraps routines and triggers in `DELIMITER ;;` ... `DELIMITER ;`
fn skip_delimited_block<R: BufRead>(
    lines: &mut LineReader<R>,
    opening: &str,
) -> Result<(), ImportError> {
    let delimiter = opening["DELIMITER".len()..].trim();
    if delimiter == ";" || delimiter.is_empty() {
        return Ok(());
    }
    while lines.advance()? {
        let text = lines.text();
        let trimmed = text.trim();
        if starts_with_keyword(trimmed, "DELIMITER") && trimmed["DELIMITER".len()..].trim() == ";" {
            break;
        }
    }
    Ok(())
}

fn count_copy_rows<R: BufRead>(
    lines: &mut LineReader<R>,
    path: &Path,
    start_line: u64,
) -> Result<u64, ImportError> {
    let mut rows = 0u64;
    while lines.advance()? {
        if is_copy_terminator(lines.bytes()) {
            return Ok(rows);
        }
        rows += 1;
    }
    Err(ImportError::parse(path, start_line, "COPY block is not terminated by \\."))
}

fn count_insert_rows<R: BufRead>(
    lines: &mut LineReader<R>,
    path: &Path,
    backslash_escapes: bool,
) -> Result<(String, u64), ImportError> {
    let start = lines.line;
    let mut scanner = InsertScanner::new(backslash_escapes, false);
    let mut rows = 0u64;
    loop {
        let current = lines.line;
        let done = scanner
            .feed(lines.raw(), &mut |_, _| rows += 1)
            .map_err(|message| ImportError::parse(path, current, message))?;
        if done {
            break;
        }
        if !lines.advance()? {
            return Err(ImportError::parse(path, start, "INSERT statement is not terminated"));
        }
    }
    let table = scanner
        .header()
        .map(|h| h.table.clone())
        .ok_or_else(|| ImportError::parse(path, start, "INSERT statement has no target table"))?;
    Ok((table, rows))
}

/// Decode one field of a COPY text-format row
pub(crate) fn decode_copy_field(field: &[u8]) -> Value {
    if field == b"\\N" {
        return Value::Null;
    }
    if !field.contains(&b'\\') {
        return bytes_value(field.to_vec());
    }

    let mut out = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        let b = field[i];
        if b != b'\\' || i + 1 == field.len() {
            out.push(b);
            i += 1;
            continue;
        }
        let next = field[i + 1];
        i += 2;
        match next {
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(next - b'0');
                let mut taken = 1;
                while taken < 3 && i < field.len() && (b'0'..=b'7').contains(&field[i]) {
                    value = value * 8 + u32::from(field[i] - b'0');
                    i += 1;
                    taken += 1;
                }
                out.push((value & 0xff) as u8);
            }
            b'x' => {
                let mut value = 0u32;
                let mut taken = 0;
                while taken < 2 && i < field.len() && field[i].is_ascii_hexdigit() {
                    value = value * 16 + (field[i] as char).to_digit(16).unwrap_or(0);
                    i += 1;
                    taken += 1;
                }
                if taken == 0 {
                    out.push(b'x');
                } else {
                    out.push(value as u8);
                }
            }
            other => out.push(other),
        }
    }
    bytes_value(out)
}

fn bytes_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

pub(crate) fn split_copy_row(line: &[u8]) -> Vec<Value> {
    line.split(|&b| b == b'\t').map(decode_copy_field).collect()
}

/// Stream the rows stored at `segments`, in table column order.
///
/// Returns early, without error, once the consumer stops listening.
pub(crate) fn stream_segments(
    path: &Path,
    segments: &[DataSegment],
    columns: &[SourceColumn],
    backslash_escapes: bool,
    sink: &RowSink,
) -> Result<(), ImportError> {
    let file = File::open(path)?;
    let mut lines = LineReader::new(BufReader::with_capacity(READ_BUFFER, file));

    for segment in segments {
        if lines.position() != segment.offset {
            lines.get_mut().seek(SeekFrom::Start(segment.offset))?;
            lines.reset(segment.offset, segment.line);
        }
        if !lines.advance()? {
            return Err(ImportError::parse(path, segment.line, "data segment is past the end of the file"));
        }
        let keep_going = match segment.kind {
            SegmentKind::Copy => stream_copy(&mut lines, path, columns, sink)?,
            SegmentKind::Insert => stream_insert(&mut lines, path, columns, backslash_escapes, sink)?,
        };
        if !keep_going {
            return Ok(());
        }
    }
    Ok(())
}

fn stream_copy<R: BufRead>(
    lines: &mut LineReader<R>,
    path: &Path,
    columns: &[SourceColumn],
    sink: &RowSink,
) -> Result<bool, ImportError> {
    let start = lines.line;
    let header = parse_copy_header(&lines.text())
        .ok_or_else(|| ImportError::parse(path, start, "expected a COPY statement"))?;
    let projection = Projection::new(columns, header.columns.as_deref());

    while lines.advance()? {
        let bytes = lines.bytes();
        if is_copy_terminator(bytes) {
            return Ok(true);
        }
        let fields = split_copy_row(bytes);
        let found = fields.len();
        let delivered = match projection.apply(fields) {
            Some(row) => sink.send(row),
            None => sink.malformed(lines.line, found, projection.field_count()),
        };
        if !delivered {
            return Ok(false);
        }
    }
    Err(ImportError::parse(path, start, "COPY block is not terminated by \\."))
}

fn stream_insert<R: BufRead>(
    lines: &mut LineReader<R>,
    path: &Path,
    columns: &[SourceColumn],
    backslash_escapes: bool,
    sink: &RowSink,
) -> Result<bool, ImportError> {
    let start = lines.line;
    let mut scanner = InsertScanner::new(backslash_escapes, true);
    let mut projection: Option<Projection> = None;
    let mut delivered = true;

    loop {
        let current = lines.line;
        let done = scanner
            .feed(lines.raw(), &mut |header, fields| {
                if !delivered {
                    return;
                }
                let projection = projection
                    .get_or_insert_with(|| Projection::new(columns, header.columns.as_deref()));
                let found = fields.len();
                delivered = match projection.apply(fields) {
                    Some(row) => sink.send(row),
                    None => sink.malformed(current, found, projection.field_count()),
                };
            })
            .map_err(|message| ImportError::parse(path, current, message))?;
        if !delivered {
            return Ok(false);
        }
        if done {
            return Ok(true);
        }
        if !lines.advance()? {
            return Err(ImportError::parse(path, start, "INSERT statement is not terminated"));
        }
    }
}
