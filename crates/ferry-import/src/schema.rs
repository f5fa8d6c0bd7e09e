//! Dialect-neutral description of a source schema
//!
//! Every reader produces a [`SourceSchema`]; everything downstream of the
//! readers (naming, ordering, DDL, copy) works only with these types.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::ImportError;
use crate::report::SkippedIndex;
use crate::type_mapping::Dialect;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceColumn {
    pub name: String,
    /// Declared type exactly as the source spelled it
    pub declared_type: String,
    pub not_null: bool,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub is_auto_increment: bool,
}

impl SourceColumn {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            not_null: false,
            is_primary_key: false,
            is_unique: false,
            is_auto_increment: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.is_auto_increment = true;
        self
    }
}

/// Single-column foreign key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceForeignKey {
    pub name: Option<String>,
    pub from_column: String,
    pub to_table: String,
    /// `None` when the source left the target column implicit
    pub to_column: Option<String>,
}

impl SourceForeignKey {
    pub fn new(
        from_column: impl Into<String>,
        to_table: impl Into<String>,
        to_column: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            from_column: from_column.into(),
            to_table: to_table.into(),
            to_column: Some(to_column.into()),
        }
    }
}

/// Column-based index as declared in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceTable {
    pub name: String,
    pub columns: Vec<SourceColumn>,
    pub foreign_keys: Vec<SourceForeignKey>,
    pub indexes: Vec<SourceIndex>,
}

impl SourceTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: SourceColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_foreign_key(mut self, fk: SourceForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn column(&self, name: &str) -> Option<&SourceColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut SourceColumn> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Case-insensitive lookup, for dialects that compare identifiers loosely
    pub fn find_column(&self, name: &str) -> Option<&SourceColumn> {
        self.column(name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    pub fn primary_key_columns(&self) -> Vec<&SourceColumn> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    /// Mark `columns` as the primary key; every member becomes NOT NULL
    pub fn set_primary_key(&mut self, columns: &[String]) {
        for column in &mut self.columns {
            if columns.iter().any(|c| c.eq_ignore_ascii_case(&column.name)) {
                column.is_primary_key = true;
                column.not_null = true;
            }
        }
    }
}

/// Where a reader will find a table's rows during the copy phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLocation {
    /// Query the source database directly
    Catalog,
    /// Byte offsets of data statements inside the dump file
    Segments(Vec<DataSegment>),
    /// Chunk files of a MySQL Shell dump, in load order
    Chunks {
        files: Vec<PathBuf>,
        dialect: ChunkDialect,
        /// Column order used by the chunk files
        columns: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// PostgreSQL `COPY ... FROM stdin` block
    Copy,
    /// `INSERT ... VALUES` statement
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSegment {
    pub offset: u64,
    pub line: u64,
    pub kind: SegmentKind,
}

/// Delimiters of a MySQL Shell chunk file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDialect {
    pub fields_terminated_by: Vec<u8>,
    pub lines_terminated_by: Vec<u8>,
    pub fields_escaped_by: Option<u8>,
    pub fields_enclosed_by: Option<u8>,
}

impl Default for ChunkDialect {
    fn default() -> Self {
        Self {
            fields_terminated_by: b"\t".to_vec(),
            lines_terminated_by: b"\n".to_vec(),
            fields_escaped_by: Some(b'\\'),
            fields_enclosed_by: None,
        }
    }
}

/// Everything one analysis pass learned about a source
#[derive(Debug, Clone)]
pub struct SourceSchema {
    pub dialect: Dialect,
    /// Tables in source declaration order
    pub tables: Vec<SourceTable>,
    pub row_counts: IndexMap<String, u64>,
    pub locations: HashMap<String, DataLocation>,
    pub skipped_indexes: Vec<SkippedIndex>,
    pub warnings: Vec<String>,
}

impl SourceSchema {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            tables: Vec::new(),
            row_counts: IndexMap::new(),
            locations: HashMap::new(),
            skipped_indexes: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&SourceTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut SourceTable> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Exact match first, then a unique case-insensitive match
    pub fn resolve_table_name(&self, name: &str) -> Option<String> {
        if self.table(name).is_some() {
            return Some(name.to_string());
        }
        let mut matches = self
            .tables
            .iter()
            .filter(|t| t.name.eq_ignore_ascii_case(name));
        match (matches.next(), matches.next()) {
            (Some(table), None) => Some(table.name.clone()),
            _ => None,
        }
    }

    pub fn row_count(&self, table: &str) -> u64 {
        self.row_counts.get(table).copied().unwrap_or(0)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "schema warning");
        self.warnings.push(message);
    }

    pub fn skip_index(
        &mut self,
        table: impl Into<String>,
        index: impl Into<String>,
        reason: impl Into<String>,
    ) {
        let skipped = SkippedIndex {
            table: table.into(),
            index: index.into(),
            reason: reason.into(),
        };
        tracing::debug!(table = %skipped.table, index = %skipped.index, reason = %skipped.reason, "index skipped");
        self.skipped_indexes.push(skipped);
    }

    /// Checks every reader gets for free: at most one foreign key per column,
    /// and foreign keys must name columns that exist on both ends.
    ///
    /// Foreign keys whose target table is absent are left in place so that
    /// ordering reports them as a missing referenced table.
    pub fn validate(&mut self) -> Result<(), ImportError> {
        for table in &self.tables {
            let mut seen = HashSet::new();
            for fk in &table.foreign_keys {
                if !seen.insert(fk.from_column.to_ascii_lowercase()) {
                    return Err(ImportError::AmbiguousForeignKey {
                        table: table.name.clone(),
                        column: fk.from_column.clone(),
                    });
                }
            }
        }

        let snapshot: Vec<SourceTable> = self.tables.clone();
        let lookup = |name: &str| -> Option<&SourceTable> {
            snapshot.iter().find(|t| t.name == name).or_else(|| {
                let mut ci = snapshot.iter().filter(|t| t.name.eq_ignore_ascii_case(name));
                match (ci.next(), ci.next()) {
                    (Some(t), None) => Some(t),
                    _ => None,
                }
            })
        };

        let mut warnings = Vec::new();
        for table in &mut self.tables {
            let own_columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
            let table_name = table.name.clone();
            table.foreign_keys.retain_mut(|fk| {
                let Some(from) = own_columns
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(&fk.from_column))
                else {
                    warnings.push(format!(
                        "Dropped foreign key on {}.{}: column does not exist",
                        table_name, fk.from_column
                    ));
                    return false;
                };
                fk.from_column = from.clone();

                let Some(target) = lookup(&fk.to_table) else {
                    return true;
                };
                fk.to_table = target.name.clone();

                let Some(to_column) = fk.to_column.clone() else {
                    warnings.push(format!(
                        "Dropped foreign key {}.{} -> {}: target column is implicit",
                        table_name, fk.from_column, fk.to_table
                    ));
                    return false;
                };
                match target.find_column(&to_column) {
                    Some(column) => {
                        fk.to_column = Some(column.name.clone());
                        true
                    }
                    None => {
                        warnings.push(format!(
                            "Dropped foreign key {}.{} -> {}.{}: target column does not exist",
                            table_name, fk.from_column, fk.to_table, to_column
                        ));
                        false
                    }
                }
            });
        }
        for warning in warnings {
            self.warn(warning);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> SourceTable {
        SourceTable::new("users")
            .with_column(SourceColumn::new("id", "INTEGER").primary_key())
            .with_column(SourceColumn::new("email", "TEXT"))
    }

    #[test]
    fn primary_key_members_become_not_null() {
        let mut table = SourceTable::new("memberships")
            .with_column(SourceColumn::new("user_id", "INTEGER"))
            .with_column(SourceColumn::new("group_id", "INTEGER"));
        table.set_primary_key(&["user_id".into(), "GROUP_ID".into()]);
        assert!(table.columns.iter().all(|c| c.is_primary_key && c.not_null));
        assert_eq!(table.primary_key_columns().len(), 2);
    }

    #[test]
    fn two_foreign_keys_on_one_column_are_ambiguous() {
        let mut schema = SourceSchema::new(Dialect::Sqlite);
        schema.tables.push(users());
        schema.tables.push(
            SourceTable::new("posts")
                .with_column(SourceColumn::new("author", "INTEGER"))
                .with_foreign_key(SourceForeignKey::new("author", "users", "id"))
                .with_foreign_key(SourceForeignKey::new("author", "users", "email")),
        );
        let err = schema.validate().unwrap_err();
        assert!(
            matches!(err, ImportError::AmbiguousForeignKey { table, column } if table == "posts" && column == "author")
        );
    }

    #[test]
    fn unresolved_target_columns_are_dropped_with_a_warning() {
        let mut schema = SourceSchema::new(Dialect::Sqlite);
        schema.tables.push(users());
        let mut implicit = SourceForeignKey::new("owner", "users", "id");
        implicit.to_column = None;
        schema.tables.push(
            SourceTable::new("posts")
                .with_column(SourceColumn::new("owner", "INTEGER"))
                .with_column(SourceColumn::new("editor", "INTEGER"))
                .with_column(SourceColumn::new("author", "INTEGER"))
                .with_foreign_key(implicit)
                .with_foreign_key(SourceForeignKey::new("editor", "users", "nope"))
                .with_foreign_key(SourceForeignKey::new("Author", "USERS", "ID")),
        );

        schema.validate().unwrap();
        let posts = schema.table("posts").unwrap();
        assert_eq!(posts.foreign_keys.len(), 1);
        assert_eq!(posts.foreign_keys[0].from_column, "author");
        assert_eq!(posts.foreign_keys[0].to_table, "users");
        assert_eq!(posts.foreign_keys[0].to_column.as_deref(), Some("id"));
        assert_eq!(schema.warnings.len(), 2);
    }

    #[test]
    fn missing_target_tables_survive_validation() {
        let mut schema = SourceSchema::new(Dialect::MySql);
        schema.tables.push(
            SourceTable::new("orders")
                .with_column(SourceColumn::new("customer_id", "int"))
                .with_foreign_key(SourceForeignKey::new("customer_id", "customers", "id")),
        );
        schema.validate().unwrap();
        assert_eq!(schema.tables[0].foreign_keys.len(), 1);
    }

    #[test]
    fn resolves_table_names_loosely() {
        let mut schema = SourceSchema::new(Dialect::MySql);
        schema.tables.push(users());
        assert_eq!(schema.resolve_table_name("Users").as_deref(), Some("users"));
        assert_eq!(schema.resolve_table_name("people"), None);
    }
}
