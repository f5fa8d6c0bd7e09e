//! PostgreSQL plain-format dumps (`pg_dump -Fp`)

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::dialects::ddl::{
    apply_alter_table, apply_create_index, define_table, parse_create_table, tokenize,
};
use crate::dialects::dump::{DumpSyntax, scan_dump, stream_segments};
use crate::dialects::{SourceReader, run_blocking, starts_with_keyword};
use crate::row_stream::RowStream;
use crate::schema::{DataLocation, SourceSchema, SourceTable};
use crate::type_mapping::Dialect;
use crate::{ImportError, SourceFormat};

const SYNTAX: DumpSyntax = DumpSyntax {
    dialect: Dialect::Postgres,
    backslash_escapes: false,
    dollar_quotes: true,
    copy_blocks: true,
    wants: wants_statement,
    apply: apply_statement,
};

pub struct PostgresDumpReader {
    path: PathBuf,
}

impl PostgresDumpReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceReader for PostgresDumpReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::PostgresDump
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn read_schema(&self) -> Result<SourceSchema, ImportError> {
        let path = self.path.clone();
        run_blocking(move || scan_dump(&path, &SYNTAX)).await
    }

    fn open_rows(
        &self,
        schema: &SourceSchema,
        table: &SourceTable,
    ) -> Result<RowStream, ImportError> {
        let segments = match schema.locations.get(&table.name) {
            Some(DataLocation::Segments(segments)) => segments.clone(),
            _ => Vec::new(),
        };
        let path = self.path.clone();
        let columns = table.columns.clone();
        Ok(RowStream::spawn(move |sink| {
            stream_segments(&path, &segments, &columns, false, sink)
        }))
    }
}

fn wants_statement(start: &str) -> bool {
    let tokens: Vec<String> = tokenize(start).into_iter().take(4).collect();
    let word = |i: usize| tokens.get(i).map(|t| t.to_ascii_uppercase()).unwrap_or_default();
    match word(0).as_str() {
        "CREATE" => match word(1).as_str() {
            "TABLE" | "INDEX" => true,
            "UNIQUE" => word(2) == "INDEX",
            "UNLOGGED" | "TEMP" | "TEMPORARY" => word(2) == "TABLE",
            _ => false,
        },
        "ALTER" => word(1) == "TABLE",
        _ => false,
    }
}

fn apply_statement(schema: &mut SourceSchema, statement: &str) {
    let statement = statement.trim().trim_end_matches(';');
    if starts_with_keyword(statement, "ALTER") {
        apply_alter_table(schema, statement);
        return;
    }
    if apply_create_index(schema, statement) {
        return;
    }
    if let Some((name, elements)) = parse_create_table(statement) {
        if statement.to_ascii_uppercase().contains(" PARTITION OF ") {
            schema.warn(format!("Skipped partition {}; its rows load through the parent", name));
            return;
        }
        define_table(schema, &name, elements);
    }
}
