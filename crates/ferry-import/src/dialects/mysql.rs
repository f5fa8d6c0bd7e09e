//! `mysqldump` / `mariadb-dump` output

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::dialects::ddl::{apply_alter_table, apply_create_index, define_table, parse_create_table};
use crate::dialects::dump::{DumpSyntax, scan_dump, stream_segments};
use crate::dialects::{SourceReader, run_blocking, starts_with_keyword};
use crate::row_stream::RowStream;
use crate::schema::{DataLocation, SourceSchema, SourceTable};
use crate::type_mapping::Dialect;
use crate::{ImportError, SourceFormat};

pub(crate) const SYNTAX: DumpSyntax = DumpSyntax {
    dialect: Dialect::MySql,
    backslash_escapes: true,
    dollar_quotes: false,
    copy_blocks: false,
    wants: wants_statement,
    apply: apply_statement,
};

pub struct MySqlDumpReader {
    path: PathBuf,
}

impl MySqlDumpReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceReader for MySqlDumpReader {
    fn format(&self) -> SourceFormat {
        SourceFormat::MySqlDump
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
            stream_segments(&path, &segments, &columns, true, sink)
        }))
    }
}

fn wants_statement(start: &str) -> bool {
    starts_with_keyword(start, "CREATE TABLE")
        || starts_with_keyword(start, "CREATE INDEX")
        || starts_with_keyword(start, "CREATE UNIQUE INDEX")
        || starts_with_keyword(start, "ALTER TABLE")
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
        define_table(schema, &name, elements);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row_stream::RowEvent;
    use ferry_core::Value;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const DUMP: &str = indoc! {r"
        -- MySQL dump 10.13  Distrib 8.0.36, for Linux (x86_64)
        --
        -- Host: localhost    Database: shop
        /*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;
        /*!40101 SET NAMES utf8mb4 */;

        DROP TABLE IF EXISTS `orders`;
        CREATE TABLE `orders` (
          `id` int unsigned NOT NULL AUTO_INCREMENT,
          `customer_id` int NOT NULL,
          `note` varchar(200) DEFAULT NULL COMMENT 'free; text',
          `paid` tinyint(1) NOT NULL DEFAULT '0',
          PRIMARY KEY (`id`),
          KEY `idx_customer` (`customer_id`),
          FULLTEXT KEY `ft_note` (`note`),
          CONSTRAINT `fk_customer` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`)
        ) ENGINE=InnoDB AUTO_INCREMENT=3 DEFAULT CHARSET=utf8mb4;

        DROP TABLE IF EXISTS `customers`;
        CREATE TABLE `customers` (
          `id` int NOT NULL AUTO_INCREMENT,
          `email` varchar(255) NOT NULL,
          PRIMARY KEY (`id`),
          UNIQUE KEY `email` (`email`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;

        LOCK TABLES `customers` WRITE;
        /*!40000 ALTER TABLE `customers` DISABLE KEYS */;
        INSERT INTO `customers` VALUES (1,'ada@example.com'),(2,'bob@example.com');
        /*!40000 ALTER TABLE `customers` ENABLE KEYS */;
        UNLOCK TABLES;

        LOCK TABLES `orders` WRITE;
        INSERT INTO `orders` VALUES (1,1,'first (rush), \'gift\'',1),(2,2,NULL,0);
        INSERT INTO `orders` VALUES (3,1,'multi
        line',0);
        UNLOCK TABLES;

        DELIMITER ;;
        CREATE TRIGGER `t` BEFORE INSERT ON `orders` FOR EACH ROW BEGIN
          SET NEW.note = 'x';
        END ;;
        DELIMITER ;
    "};

    fn write_dump(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn reads_tables_keys_and_counts() {
        let file = write_dump(DUMP);
        let schema = MySqlDumpReader::new(file.path()).read_schema().await.unwrap();

        let names: Vec<&str> = schema.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["orders", "customers"]);
        assert_eq!(schema.row_count("customers"), 2);
        assert_eq!(schema.row_count("orders"), 3);

        let orders = schema.table("orders").unwrap();
        assert_eq!(orders.columns.len(), 4);
        assert_eq!(orders.columns[0].declared_type, "int unsigned");
        assert!(orders.columns[0].is_primary_key && orders.columns[0].is_auto_increment);
        assert_eq!(orders.columns[3].declared_type, "tinyint(1)");
        assert_eq!(orders.foreign_keys.len(), 1);
        assert_eq!(orders.foreign_keys[0].name.as_deref(), Some("fk_customer"));
        assert_eq!(orders.indexes.len(), 1);

        let customers = schema.table("customers").unwrap();
        assert_eq!(customers.indexes.len(), 1);
        assert!(customers.indexes[0].is_unique);

        assert_eq!(schema.skipped_indexes.len(), 1);
        assert_eq!(schema.skipped_indexes[0].reason, "fulltext");
    }

    #[tokio::test]
    async fn streams_rows_across_statements_and_lines() {
        let file = write_dump(DUMP);
        let reader = MySqlDumpReader::new(file.path());
        let schema = reader.read_schema().await.unwrap();

        let mut stream = reader.open_rows(&schema, schema.table("orders").unwrap()).unwrap();
        let mut rows = Vec::new();
        while let Some(event) = stream.next().await {
            if let RowEvent::Row(row) = event.unwrap() {
                rows.push(row);
            }
        }
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][2], Value::String("first (rush), 'gift'".into()));
        assert_eq!(rows[1][2], Value::Null);
        assert_eq!(rows[2][2], Value::String("multi\nline".into()));
        assert_eq!(rows[2][0], Value::Int64(3));
    }

    #[tokio::test]
    async fn tables_without_rows_count_zero() {
        let file = write_dump("CREATE TABLE `empty` (\n  `id` int NOT NULL\n);\n");
        let reader = MySqlDumpReader::new(file.path());
        let schema = reader.read_schema().await.unwrap();
        assert_eq!(schema.row_count("empty"), 0);

        let mut stream = reader.open_rows(&schema, schema.table("empty").unwrap()).unwrap();
        assert!(stream.next().await.is_none());
    }
}
