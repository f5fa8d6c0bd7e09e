//! SQLite catalog introspection
//!
//! Thin typed wrappers over `sqlite_master` and the `table_info`,
//! `foreign_key_list`, `index_list` and `index_info` pragmas.

use ferry_core::{Connection, Result, Row, Value};

use crate::SqliteConnection;

/// A user table listed in `sqlite_master`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTable {
    pub name: String,
    /// Original `CREATE TABLE` text
    pub sql: String,
}

impl CatalogTable {
    pub fn is_virtual(&self) -> bool {
        self.sql
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("CREATE VIRTUAL TABLE")
    }

    pub fn has_autoincrement(&self) -> bool {
        self.sql.to_ascii_uppercase().contains("AUTOINCREMENT")
    }
}

/// One row of `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub cid: i64,
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// 1-based position inside the primary key, 0 when not part of it
    pub pk_position: i64,
}

/// One row of `PRAGMA foreign_key_list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogForeignKey {
    pub id: i64,
    pub seq: i64,
    pub table: String,
    pub from: String,
    /// `None` when the constraint implicitly targets the parent's primary key
    pub to: Option<String>,
}

/// One row of `PRAGMA index_list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogIndex {
    pub name: String,
    pub unique: bool,
    /// `c` for CREATE INDEX, `u` for a UNIQUE constraint, `pk` for the primary key
    pub origin: String,
    pub partial: bool,
}

/// One row of `PRAGMA index_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogIndexColumn {
    pub seqno: i64,
    pub cid: i64,
    /// `None` for an expression term
    pub name: Option<String>,
}

fn text(row: &Row, idx: usize) -> Option<String> {
    match row.get(idx) {
        Some(Value::Null) | None => None,
        Some(value) => Some(value.to_string()),
    }
}

fn int(row: &Row, idx: usize) -> i64 {
    row.get(idx).and_then(Value::as_i64).unwrap_or(0)
}

fn quote_literal(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

impl SqliteConnection {
    /// User tables in name order, internal `sqlite_*` tables excluded
    #[tracing::instrument(skip(self))]
    pub async fn list_tables(&self) -> Result<Vec<CatalogTable>> {
        let result = self
            .query(
                "SELECT name, COALESCE(sql, '') FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;

        let tables: Vec<CatalogTable> = result
            .rows
            .iter()
            .filter_map(|row| {
                Some(CatalogTable {
                    name: text(row, 0)?,
                    sql: text(row, 1).unwrap_or_default(),
                })
            })
            .collect();
        tracing::debug!(table_count = tables.len(), "tables listed");
        Ok(tables)
    }

    /// Columns of `table` in declaration order
    pub async fn table_columns(&self, table: &str) -> Result<Vec<CatalogColumn>> {
        let result = self
            .query(&format!("PRAGMA table_info({})", quote_literal(table)), &[])
            .await?;
        Ok(result
            .rows
            .iter()
            .map(|row| CatalogColumn {
                cid: int(row, 0),
                name: text(row, 1).unwrap_or_default(),
                declared_type: text(row, 2).unwrap_or_default(),
                not_null: int(row, 3) != 0,
                default_value: text(row, 4),
                pk_position: int(row, 5),
            })
            .collect())
    }

    pub async fn foreign_keys(&self, table: &str) -> Result<Vec<CatalogForeignKey>> {
        let result = self
            .query(
                &format!("PRAGMA foreign_key_list({})", quote_literal(table)),
                &[],
            )
            .await?;
        Ok(result
            .rows
            .iter()
            .map(|row| CatalogForeignKey {
                id: int(row, 0),
                seq: int(row, 1),
                table: text(row, 2).unwrap_or_default(),
                from: text(row, 3).unwrap_or_default(),
                to: text(row, 4),
            })
            .collect())
    }

    pub async fn index_list(&self, table: &str) -> Result<Vec<CatalogIndex>> {
        let result = self
            .query(&format!("PRAGMA index_list({})", quote_literal(table)), &[])
            .await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| {
                Some(CatalogIndex {
                    name: text(row, 1)?,
                    unique: int(row, 2) != 0,
                    origin: text(row, 3).unwrap_or_else(|| "c".to_string()),
                    partial: int(row, 4) != 0,
                })
            })
            .collect())
    }

    pub async fn index_columns(&self, index: &str) -> Result<Vec<CatalogIndexColumn>> {
        let result = self
            .query(&format!("PRAGMA index_info({})", quote_literal(index)), &[])
            .await?;
        Ok(result
            .rows
            .iter()
            .map(|row| CatalogIndexColumn {
                seqno: int(row, 0),
                cid: int(row, 1),
                name: text(row, 2),
            })
            .collect())
    }

    /// `SELECT COUNT(*)` for one table
    pub async fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
        let result = self.query(&sql, &[]).await?;
        Ok(result.scalar().and_then(Value::as_i64).unwrap_or(0).max(0) as u64)
    }
}
