//! MySQL Shell dump directories (`util.dumpInstance`, `util.dumpSchemas`)
//!
//! Each table has a `schema@table.json` metadata file, a `schema@table.sql`
//! DDL file and one or more data chunks: `schema@table@N.tsv.zst`, with the
//! final chunk spelled `schema@table@@N.tsv.zst`, or a single unchunked
//! `schema@table.tsv.zst`.

use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use ferry_core::Value;

use crate::decompress::open_maybe_compressed;
use crate::dialects::dump::scan_dump;
use crate::dialects::{Projection, SourceReader, mysql, run_blocking};
use crate::row_stream::{RowSink, RowStream};
use crate::schema::{ChunkDialect, DataLocation, SourceColumn, SourceSchema, SourceTable};
use crate::type_mapping::Dialect;
use crate::{ImportError, SourceFormat};

const DATA_EXTENSIONS: &[&str] = &["tsv", "csv", "txt"];
const COMPRESSION_EXTENSIONS: &[&str] = &["zst", "gz"];

/// A data file name split into its table prefix and chunk position
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkName {
    /// `schema@table`
    pub prefix: String,
    /// `None` for an unchunked table
    pub index: Option<u64>,
    /// `@@N`, the last chunk of a table
    pub last: bool,
}

pub(crate) fn parse_chunk_name(name: &str) -> Option<ChunkName> {
    if name.ends_with(".idx") {
        return None;
    }
    let mut stem = name;
    if let Some((rest, ext)) = stem.rsplit_once('.') {
        if COMPRESSION_EXTENSIONS.contains(&ext) {
            stem = rest;
        }
    }
    let (stem, ext) = stem.rsplit_once('.')?;
    if !DATA_EXTENSIONS.contains(&ext) || stem.starts_with('@') || !stem.contains('@') {
        return None;
    }

    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if let Some((prefix, n)) = stem.rsplit_once("@@") {
        if is_number(n) && !prefix.is_empty() {
            return Some(ChunkName {
                prefix: prefix.to_string(),
                index: n.parse().ok(),
                last: true,
            });
        }
    }
    if let Some((prefix, n)) = stem.rsplit_once('@') {
        if is_number(n) && prefix.contains('@') {
            return Some(ChunkName {
                prefix: prefix.to_string(),
                index: n.parse().ok(),
                last: false,
            });
        }
    }
    Some(ChunkName {
        prefix: stem.to_string(),
        index: None,
        last: false,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableMetadata {
    options: TableOptions,
    #[serde(default)]
    primary_index: Option<String>,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    extension: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableOptions {
    #[serde(default)]
    schema: String,
    table: String,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default = "default_field_terminator")]
    fields_terminated_by: String,
    #[serde(default = "default_line_terminator")]
    lines_terminated_by: String,
    #[serde(default = "default_escape")]
    fields_escaped_by: String,
    #[serde(default)]
    fields_enclosed_by: String,
}

fn default_field_terminator() -> String {
    "\t".to_string()
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

fn default_escape() -> String {
    "\\".to_string()
}

impl TableOptions {
    fn dialect(&self) -> ChunkDialect {
        ChunkDialect {
            fields_terminated_by: self.fields_terminated_by.as_bytes().to_vec(),
            lines_terminated_by: self.lines_terminated_by.as_bytes().to_vec(),
            fields_escaped_by: self.fields_escaped_by.bytes().next(),
            fields_enclosed_by: self.fields_enclosed_by.bytes().next(),
        }
    }
}

pub struct MySqlShellReader {
    dir: PathBuf,
}

impl MySqlShellReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SourceReader for MySqlShellReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::MySqlShellDump
    }

    fn path(&self) -> &Path {
        &self.dir
    }

    async fn read_schema(&self) -> Result<SourceSchema, ImportError> {
        let dir = self.dir.clone();
        run_blocking(move || read_dump_directory(&dir)).await
    }

    fn open_rows(
        &self,
        schema: &SourceSchema,
        table: &SourceTable,
    ) -> Result<RowStream, ImportError> {
        let Some(DataLocation::Chunks {
            files,
            dialect,
            columns,
        }) = schema.locations.get(&table.name).cloned()
        else {
            return Ok(RowStream::spawn(|_| Ok(())));
        };
        let table_columns = table.columns.clone();
        Ok(RowStream::spawn(move |sink| {
            let listed = (!columns.is_empty()).then_some(columns.as_slice());
            let projection = Projection::new(&table_columns, listed);
            for file in &files {
                if !stream_chunk(file, &dialect, &projection, sink)? {
                    break;
                }
            }
            Ok(())
        }))
    }
}

#[tracing::instrument(fields(dir = %dir.display()), skip(dir))]
fn read_dump_directory(dir: &Path) -> Result<SourceSchema, ImportError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    let mut schema = SourceSchema::new(Dialect::MySql);
    let mut counts = Vec::new();
    for name in &names {
        let Some(prefix) = name.strip_suffix(".json") else {
            continue;
        };
        if prefix.starts_with('@') || !prefix.contains('@') {
            continue;
        }

        let metadata: TableMetadata = serde_json::from_slice(&fs::read(dir.join(name))?)?;
        let options = &metadata.options;
        if schema.table(&options.table).is_some() {
            schema.warn(format!(
                "Skipped {}.{}: another schema already has a table named {}",
                options.schema, options.table, options.table
            ));
            continue;
        }

        let table = load_table_ddl(dir, prefix, options, &mut schema)?;
        let columns = if options.columns.is_empty() {
            table.columns.iter().map(|c| c.name.clone()).collect()
        } else {
            options.columns.clone()
        };

        let mut chunks: Vec<(ChunkName, PathBuf)> = names
            .iter()
            .filter_map(|n| parse_chunk_name(n).map(|chunk| (chunk, dir.join(n))))
            .filter(|(chunk, _)| chunk.prefix == prefix)
            .collect();
        chunks.sort_by_key(|(chunk, _)| chunk.index.unwrap_or(0));
        if chunks.is_empty() && metadata.extension.is_some() {
            tracing::debug!(table = %options.table, "table has no data chunks");
        }

        let dialect = options.dialect();
        let mut rows = 0u64;
        for (_, path) in &chunks {
            rows += count_records(path, &dialect)?;
        }
        tracing::debug!(
            table = %options.table,
            chunks = chunks.len(),
            rows,
            compression = metadata.compression.as_deref().unwrap_or("none"),
            primary_index = metadata.primary_index.as_deref().unwrap_or(""),
            "read table metadata"
        );

        schema.locations.insert(
            table.name.clone(),
            DataLocation::Chunks {
                files: chunks.into_iter().map(|(_, path)| path).collect(),
                dialect,
                columns,
            },
        );
        counts.push((table.name.clone(), rows));
        schema.tables.push(table);
    }

    schema.row_counts = counts.into_iter().collect();
    Ok(schema)
}

/// Table definition from `prefix.sql`, or TEXT columns from the metadata
fn load_table_ddl(
    dir: &Path,
    prefix: &str,
    options: &TableOptions,
    schema: &mut SourceSchema,
) -> Result<SourceTable, ImportError> {
    let ddl_path = dir.join(format!("{}.sql", prefix));
    if ddl_path.is_file() {
        let mut ddl = scan_dump(&ddl_path, &mysql::SYNTAX)?;
        schema.warnings.append(&mut ddl.warnings);
        schema.skipped_indexes.append(&mut ddl.skipped_indexes);
        let position = ddl
            .tables
            .iter()
            .position(|t| t.name == options.table)
            .or_else(|| (ddl.tables.len() == 1).then_some(0));
        if let Some(position) = position {
            let mut table = ddl.tables.swap_remove(position);
            table.name = options.table.clone();
            return Ok(table);
        }
    }

    if options.columns.is_empty() {
        return Err(ImportError::UnsupportedSchema(format!(
            "{}.{} has neither a CREATE TABLE nor a column list",
            options.schema, options.table
        )));
    }
    schema.warn(format!(
        "No DDL for {}.{}; columns imported as TEXT",
        options.schema, options.table
    ));
    let mut table = SourceTable::new(options.table.clone());
    for column in &options.columns {
        table.columns.push(SourceColumn::new(column.clone(), "text"));
    }
    Ok(table)
}

/// Reads records of a chunk file, honoring escaped and enclosed terminators
struct RecordReader<R> {
    reader: R,
    dialect: ChunkDialect,
    buf: Vec<u8>,
}

impl<R: BufRead> RecordReader<R> {
    fn new(reader: R, dialect: ChunkDialect) -> Self {
        Self {
            reader,
            dialect,
            buf: Vec::new(),
        }
    }

    fn next_record(&mut self) -> io::Result<Option<&[u8]>> {
        self.buf.clear();
        let terminator = self.dialect.lines_terminated_by.clone();
        let Some(&last) = terminator.last() else {
            self.reader.read_to_end(&mut self.buf)?;
            return Ok((!self.buf.is_empty()).then_some(self.buf.as_slice()));
        };
        loop {
            let read = self.reader.read_until(last, &mut self.buf)?;
            if read == 0 {
                return Ok((!self.buf.is_empty()).then_some(self.buf.as_slice()));
            }
            if self.buf.ends_with(&terminator) {
                let body = self.buf.len() - terminator.len();
                if record_is_complete(&self.buf[..body], &self.dialect) {
                    self.buf.truncate(body);
                    return Ok(Some(self.buf.as_slice()));
                }
            }
        }
    }
}

/// False when the record so far ends inside an escape or an enclosure
fn record_is_complete(record: &[u8], dialect: &ChunkDialect) -> bool {
    let mut escaped = false;
    let mut enclosed = false;
    let mut field_start = true;
    let separator = &dialect.fields_terminated_by;
    let mut i = 0;
    while i < record.len() {
        let b = record[i];
        if escaped {
            escaped = false;
        } else if Some(b) == dialect.fields_escaped_by {
            escaped = true;
        } else if Some(b) == dialect.fields_enclosed_by && (enclosed || field_start) {
            enclosed = !enclosed;
        } else if !enclosed && !separator.is_empty() && record[i..].starts_with(separator) {
            field_start = true;
            i += separator.len();
            continue;
        }
        field_start = false;
        i += 1;
    }
    !escaped && !enclosed
}

/// Split one record into decoded fields
fn split_fields(record: &[u8], dialect: &ChunkDialect) -> Vec<Value> {
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut raw_null = false;
    let mut enclosed = false;
    let mut was_enclosed = false;
    let separator = &dialect.fields_terminated_by;
    let mut i = 0;

    let finish = |current: &mut Vec<u8>, raw_null: &mut bool, was_enclosed: &mut bool| {
        let value = if *raw_null && current.is_empty() {
            Value::Null
        } else {
            match String::from_utf8(std::mem::take(current)) {
                Ok(text) => Value::String(text),
                Err(e) => Value::Bytes(e.into_bytes()),
            }
        };
        current.clear();
        *raw_null = false;
        *was_enclosed = false;
        value
    };

    while i < record.len() {
        let b = record[i];
        if Some(b) == dialect.fields_escaped_by && i + 1 < record.len() {
            let next = record[i + 1];
            i += 2;
            match next {
                b'N' if current.is_empty() && !was_enclosed => raw_null = true,
                b'0' => current.push(0),
                b'b' => current.push(0x08),
                b'n' => current.push(b'\n'),
                b'r' => current.push(b'\r'),
                b't' => current.push(b'\t'),
                b'Z' => current.push(0x1a),
                other => current.push(other),
            }
            continue;
        }
        if Some(b) == dialect.fields_enclosed_by {
            if enclosed {
                if record.get(i + 1) == Some(&b) {
                    current.push(b);
                    i += 2;
                    continue;
                }
                enclosed = false;
                i += 1;
                continue;
            }
            if current.is_empty() && !was_enclosed {
                enclosed = true;
                was_enclosed = true;
                i += 1;
                continue;
            }
        }
        if !enclosed && !separator.is_empty() && record[i..].starts_with(separator) {
            fields.push(finish(&mut current, &mut raw_null, &mut was_enclosed));
            i += separator.len();
            continue;
        }
        if raw_null {
            // `\N` followed by more text is the literal text N...
            current.push(b'N');
            raw_null = false;
        }
        current.push(b);
        i += 1;
    }
    fields.push(finish(&mut current, &mut raw_null, &mut was_enclosed));
    fields
}

fn count_records(path: &Path, dialect: &ChunkDialect) -> Result<u64, ImportError> {
    let file = BufReader::new(open_maybe_compressed(path)?);
    let mut records = RecordReader::new(file, dialect.clone());
    let mut count = 0u64;
    while records.next_record()?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn stream_chunk(
    path: &Path,
    dialect: &ChunkDialect,
    projection: &Projection,
    sink: &RowSink,
) -> Result<bool, ImportError> {
    let file = BufReader::new(open_maybe_compressed(path)?);
    let mut records = RecordReader::new(file, dialect.clone());
    let mut record_no = 0u64;
    while let Some(record) = records.next_record()? {
        record_no += 1;
        let fields = split_fields(record, dialect);
        let found = fields.len();
        let delivered = match projection.apply(fields) {
            Some(row) => sink.send(row),
            None => sink.malformed(record_no, found, projection.field_count()),
        };
        if !delivered {
            return Ok(false);
        }
    }
    Ok(true)
}
