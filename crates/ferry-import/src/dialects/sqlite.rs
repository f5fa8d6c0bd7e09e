//! SQLite database files, read through catalog introspection

use async_trait::async_trait;
use ferry_driver_sqlite::{CatalogIndex, SqliteConnection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::dialects::SourceReader;
use crate::row_stream::{ROW_CHANNEL_CAPACITY, RowStream};
use crate::schema::{
    DataLocation, SourceColumn, SourceForeignKey, SourceIndex, SourceSchema, SourceTable,
};
use crate::sql::quote_identifier;
use crate::type_mapping::Dialect;
use crate::{ImportError, SourceFormat};

pub struct SqliteReader {
    path: PathBuf,
    conn: Arc<SqliteConnection>,
}

impl SqliteReader {
    /// Open `path` read-only; the source file is never written
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ImportError> {
        let path = path.into();
        let conn = SqliteConnection::open_read_only(&path)?;
        Ok(Self {
            path,
            conn: Arc::new(conn),
        })
    }

    async fn read_table(
        &self,
        schema: &mut SourceSchema,
        name: &str,
        autoincrement: bool,
    ) -> Result<SourceTable, ImportError> {
        let mut table = SourceTable::new(name);
        let catalog_columns = self.conn.table_columns(name).await?;
        let pk_width = catalog_columns.iter().filter(|c| c.pk_position > 0).count();
        for column in &catalog_columns {
            let mut source = SourceColumn::new(&column.name, &column.declared_type);
            source.not_null = column.not_null;
            if column.pk_position > 0 {
                source = source.primary_key();
                if pk_width == 1 && autoincrement {
                    source = source.auto_increment();
                }
            }
            table.columns.push(source);
        }

        let mut groups: BTreeMap<i64, Vec<_>> = BTreeMap::new();
        for fk in self.conn.foreign_keys(name).await? {
            groups.entry(fk.id).or_default().push(fk);
        }
        for (_, mut members) in groups {
            if members.len() > 1 {
                members.sort_by_key(|fk| fk.seq);
                let columns: Vec<&str> = members.iter().map(|fk| fk.from.as_str()).collect();
                schema.warn(format!(
                    "Skipped composite foreign key on {} ({}) -> {}",
                    name,
                    columns.join(", "),
                    members[0].table
                ));
                continue;
            }
            let Some(fk) = members.pop() else {
                continue;
            };
            table.foreign_keys.push(SourceForeignKey {
                name: None,
                from_column: fk.from,
                to_table: fk.table,
                to_column: fk.to,
            });
        }

        for index in self.conn.index_list(name).await? {
            self.read_index(schema, &mut table, index).await?;
        }
        Ok(table)
    }

    async fn read_index(
        &self,
        schema: &mut SourceSchema,
        table: &mut SourceTable,
        index: CatalogIndex,
    ) -> Result<(), ImportError> {
        if index.origin == "pk" {
            return Ok(());
        }
        if index.partial {
            schema.skip_index(&table.name, &index.name, "partial");
            return Ok(());
        }

        let mut terms = self.conn.index_columns(&index.name).await?;
        terms.sort_by_key(|term| term.seqno);
        let Some(columns) = terms
            .into_iter()
            .map(|term| term.name)
            .collect::<Option<Vec<String>>>()
        else {
            schema.skip_index(&table.name, &index.name, "expression");
            return Ok(());
        };

        if let [only] = columns.as_slice() {
            if index.unique && matches!(index.origin.as_str(), "u" | "c") {
                if let Some(column) = table.column_mut(only) {
                    column.is_unique = true;
                    return Ok(());
                }
            }
        }
        table.indexes.push(SourceIndex {
            name: index.name,
            columns,
            is_unique: index.unique,
        });
        Ok(())
    }
}

#[async_trait]
impl SourceReader for SqliteReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    async fn read_schema(&self) -> Result<SourceSchema, ImportError> {
        let mut schema = SourceSchema::new(Dialect::Sqlite);
        for catalog in self.conn.list_tables().await? {
            if catalog.is_virtual() {
                return Err(ImportError::UnsupportedSchema(format!(
                    "virtual table '{}' cannot be imported",
                    catalog.name
                )));
            }
            let table = self
                .read_table(&mut schema, &catalog.name, catalog.has_autoincrement())
                .await?;
            let rows = self.conn.count_rows(&catalog.name).await?;
            tracing::debug!(table = %catalog.name, rows, "table read from catalog");
            schema.row_counts.insert(catalog.name.clone(), rows);
            schema.locations.insert(catalog.name.clone(), DataLocation::Catalog);
            schema.tables.push(table);
        }
        Ok(schema)
    }

    fn open_rows(
        &self,
        _schema: &SourceSchema,
        table: &SourceTable,
    ) -> Result<RowStream, ImportError> {
        let columns: Vec<String> = table.columns.iter().map(|c| quote_identifier(&c.name)).collect();
        let sql = format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            quote_identifier(&table.name)
        );
        Ok(RowStream::from_cursor(
            self.conn.stream_rows(&sql, ROW_CHANNEL_CAPACITY),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_stream::RowEvent;
    use ferry_core::{Connection, Value};
    use pretty_assertions::assert_eq;

    async fn fixture(dir: &Path, sql: &str) -> PathBuf {
        let path = dir.join("source.db");
        let conn = SqliteConnection::open(&path).unwrap();
        conn.execute_batch(sql).await.unwrap();
        conn.query("PRAGMA journal_mode = DELETE", &[]).await.unwrap();
        drop(conn);
        path
    }

    const SHOP: &str = "
        CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email TEXT NOT NULL UNIQUE, name TEXT);
        CREATE TABLE posts (
            id INTEGER PRIMARY KEY,
            user_id INTEGER REFERENCES users(id),
            owner INTEGER REFERENCES users,
            slug TEXT,
            title TEXT,
            published INTEGER
        );
        CREATE UNIQUE INDEX posts_slug ON posts(slug);
        CREATE UNIQUE INDEX posts_user_title ON posts(user_id, title);
        CREATE INDEX posts_lower_title ON posts(lower(title));
        CREATE INDEX posts_live ON posts(title) WHERE published = 1;
        CREATE INDEX posts_title ON posts(title);
        INSERT INTO users (email, name) VALUES ('ada@example.com', 'Ada'), ('bob@example.com', NULL);
        INSERT INTO posts VALUES (1, 1, 1, 'hello', 'Hello', 1), (2, 2, NULL, 'again', 'Again', 0);
    ";

    #[tokio::test]
    async fn reads_catalog_into_source_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), SHOP).await;
        let schema = SqliteReader::open(&path).unwrap().read_schema().await.unwrap();

        assert_eq!(schema.row_count("users"), 2);
        assert_eq!(schema.row_count("posts"), 2);

        let users = schema.table("users").unwrap();
        let id = users.column("id").unwrap();
        assert!(id.is_primary_key && id.is_auto_increment);
        assert!(users.column("email").unwrap().is_unique);
        assert!(users.indexes.is_empty());

        let posts = schema.table("posts").unwrap();
        assert!(!posts.column("id").unwrap().is_auto_increment);
        assert!(posts.column("slug").unwrap().is_unique);
        assert_eq!(posts.foreign_keys.len(), 2);
        let implicit = posts
            .foreign_keys
            .iter()
            .find(|fk| fk.from_column == "owner")
            .unwrap();
        assert_eq!(implicit.to_column, None);

        let mut index_names: Vec<&str> = posts.indexes.iter().map(|i| i.name.as_str()).collect();
        index_names.sort();
        assert_eq!(index_names, vec!["posts_title", "posts_user_title"]);

        let mut skipped: Vec<(&str, &str)> = schema
            .skipped_indexes
            .iter()
            .map(|s| (s.index.as_str(), s.reason.as_str()))
            .collect();
        skipped.sort();
        assert_eq!(
            skipped,
            vec![("posts_live", "partial"), ("posts_lower_title", "expression")]
        );
    }

    #[tokio::test]
    async fn streams_rows_in_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), SHOP).await;
        let reader = SqliteReader::open(&path).unwrap();
        let schema = reader.read_schema().await.unwrap();

        let mut stream = reader
            .open_rows(&schema, schema.table("users").unwrap())
            .unwrap();
        let mut rows = Vec::new();
        while let Some(event) = stream.next().await {
            if let RowEvent::Row(row) = event.unwrap() {
                rows.push(row);
            }
        }
        assert_eq!(
            rows,
            vec![
                vec![
                    Value::Int64(1),
                    Value::String("ada@example.com".into()),
                    Value::String("Ada".into()),
                ],
                vec![
                    Value::Int64(2),
                    Value::String("bob@example.com".into()),
                    Value::Null,
                ],
            ]
        );
    }

    #[tokio::test]
    async fn composite_foreign_keys_are_skipped_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(
            dir.path(),
            "CREATE TABLE a (x INTEGER, y INTEGER, PRIMARY KEY (x, y));
             CREATE TABLE b (x INTEGER, y INTEGER, FOREIGN KEY (x, y) REFERENCES a (x, y));",
        )
        .await;
        let schema = SqliteReader::open(&path).unwrap().read_schema().await.unwrap();
        assert!(schema.table("b").unwrap().foreign_keys.is_empty());
        assert_eq!(schema.table("a").unwrap().primary_key_columns().len(), 2);
        assert_eq!(schema.warnings.len(), 1);
        assert!(schema.warnings[0].contains("composite foreign key"));
    }

    #[tokio::test]
    async fn virtual_tables_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), "CREATE VIRTUAL TABLE docs USING fts5(body);").await;
        let err = SqliteReader::open(&path)
            .unwrap()
            .read_schema()
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedSchema(msg) if msg.contains("docs")));
    }
}
