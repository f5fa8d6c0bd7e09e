//! Turning a source schema into an ordered, fully named import plan
//!
//! Everything that can reject a source (ambiguous foreign keys, identifier
//! collisions, missing tables, cycles) happens here, before the destination
//! is touched.

use std::path::Path;

use crate::naming::{IdentifierCase, IndexNamer, NameMaps, build_name_maps};
use crate::ordering::toposort;
use crate::report::{GenericAnalysisResult, SkippedIndex};
use crate::schema::{SourceSchema, SourceTable};
use crate::sql::{ColumnSpec, TableSpec, create_index_sql};
use crate::type_mapping::{DestType, get_type_mapper};
use crate::{ImportError, SourceFormat};

#[derive(Debug, Clone)]
pub struct TablePlan {
    pub source: SourceTable,
    pub spec: TableSpec,
    /// Rows counted during analysis
    pub row_count: u64,
}

impl TablePlan {
    pub fn source_name(&self) -> &str {
        &self.source.name
    }

    pub fn dest_name(&self) -> &str {
        &self.spec.name
    }

    pub fn column_types(&self) -> Vec<DestType> {
        self.spec.columns.iter().map(|c| c.ty).collect()
    }

    pub fn column_count(&self) -> usize {
        self.spec.columns.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub source_name: String,
    pub source_table: String,
    pub dest_name: String,
    pub dest_table: String,
    pub dest_column: String,
    pub unique: bool,
    pub sql: String,
}

#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub format: SourceFormat,
    /// Tables in dependency order
    pub tables: Vec<TablePlan>,
    pub indexes: Vec<IndexPlan>,
    pub skipped_indexes: Vec<SkippedIndex>,
    pub warnings: Vec<String>,
    pub names: NameMaps,
    pub schema: SourceSchema,
}

impl ImportPlan {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }

    pub fn analysis(&self, source_path: &Path) -> GenericAnalysisResult {
        GenericAnalysisResult {
            source_path: source_path.to_path_buf(),
            format: self.format,
            table_names: self.tables.iter().map(|t| t.source.name.clone()).collect(),
            row_counts: self
                .tables
                .iter()
                .map(|t| (t.source.name.clone(), t.row_count))
                .collect(),
            skipped_indexes: self.skipped_indexes.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

#[tracing::instrument(skip(schema), fields(tables = schema.tables.len()))]
pub fn build_plan(
    mut schema: SourceSchema,
    format: SourceFormat,
    case: IdentifierCase,
) -> Result<ImportPlan, ImportError> {
    schema.validate()?;
    let names = build_name_maps(&schema.tables, case)?;
    let ordered: Vec<SourceTable> = toposort(&schema.tables)?.into_iter().cloned().collect();
    let mapper = get_type_mapper(schema.dialect);

    let mut tables = Vec::with_capacity(ordered.len());
    for table in ordered {
        let source_name = table.name.clone();
        let columns = table
            .columns
            .iter()
            .map(|col| {
                let references = table
                    .foreign_keys
                    .iter()
                    .find(|fk| fk.from_column == col.name)
                    .and_then(|fk| {
                        let to_column = fk.to_column.as_deref()?;
                        Some((
                            names.table(&fk.to_table).to_string(),
                            names.column(&fk.to_table, to_column).to_string(),
                        ))
                    });
                ColumnSpec {
                    name: names.column(&source_name, &col.name).to_string(),
                    ty: mapper.map_type(&col.declared_type),
                    not_null: col.not_null,
                    unique: col.is_unique,
                    references,
                }
            })
            .collect();
        let primary_key = table
            .primary_key_columns()
            .iter()
            .map(|c| names.column(&source_name, &c.name).to_string())
            .collect();

        let spec = TableSpec {
            name: names.table(&source_name).to_string(),
            columns,
            primary_key,
        };
        tables.push(TablePlan {
            row_count: schema.row_count(&source_name),
            spec,
            source: table,
        });
    }

    let mut skipped_indexes = schema.skipped_indexes.clone();
    let mut namer = IndexNamer::with_reserved(tables.iter().map(|t| t.spec.name.as_str()));
    let mut indexes = Vec::new();

    for plan in &tables {
        for index in &plan.source.indexes {
            let skip = |reason: &str| SkippedIndex {
                index: index.name.clone(),
                table: plan.source.name.clone(),
                reason: reason.to_string(),
            };
            let column = match index.columns.as_slice() {
                [] => {
                    skipped_indexes.push(skip("no columns"));
                    continue;
                }
                [column] => column,
                _ => {
                    skipped_indexes.push(skip("composite"));
                    continue;
                }
            };
            let Some(source_column) = plan.source.find_column(column) else {
                skipped_indexes.push(skip("unknown column"));
                continue;
            };

            let dest_table = plan.spec.name.clone();
            let dest_column = names
                .column(&plan.source.name, &source_column.name)
                .to_string();
            let dest_name = namer.assign(&dest_table, &case.apply(&index.name));
            indexes.push(IndexPlan {
                sql: create_index_sql(&dest_name, &dest_table, &dest_column, index.is_unique),
                source_name: index.name.clone(),
                source_table: plan.source.name.clone(),
                dest_name,
                dest_table,
                dest_column,
                unique: index.is_unique,
            });
        }
    }

    let mut warnings = schema.warnings.clone();
    for skipped in &skipped_indexes {
        tracing::info!(
            table = %skipped.table,
            index = %skipped.index,
            reason = %skipped.reason,
            "index will not be created"
        );
        warnings.push(format!(
            "Skipped index {} on {} ({})",
            skipped.index, skipped.table, skipped.reason
        ));
    }

    Ok(ImportPlan {
        format,
        tables,
        indexes,
        skipped_indexes,
        warnings,
        names,
        schema,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::StandardDestination;
    use crate::schema::{SourceColumn, SourceForeignKey, SourceIndex};
    use crate::type_mapping::Dialect;
    use pretty_assertions::assert_eq;

    fn index(name: &str, columns: &[&str], unique: bool) -> SourceIndex {
        SourceIndex {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            is_unique: unique,
        }
    }

    fn shop_schema() -> SourceSchema {
        let mut schema = SourceSchema::new(Dialect::MySql);
        let mut orders = SourceTable::new("Orders")
            .with_column(SourceColumn::new("ID", "int(11)").primary_key())
            .with_column(SourceColumn::new("CustomerId", "int(11)"))
            .with_column(SourceColumn::new("Total", "decimal(10,2)"))
            .with_foreign_key(SourceForeignKey::new("CustomerId", "Customers", "ID"));
        orders.indexes.push(index("idx_customer", &["CustomerId"], false));
        orders.indexes.push(index("idx_pair", &["CustomerId", "Total"], false));
        let mut customers = SourceTable::new("Customers")
            .with_column(SourceColumn::new("ID", "int(11)").primary_key())
            .with_column(SourceColumn::new("Email", "varchar(255)").not_null());
        customers.indexes.push(index("idx_customer", &["Email"], true));
        schema.tables.push(orders);
        schema.tables.push(customers);
        schema.row_counts.insert("Orders".into(), 5);
        schema.row_counts.insert("Customers".into(), 2);
        schema
    }

    #[test]
    fn plans_tables_in_dependency_order_with_mapped_names() {
        let plan = build_plan(
            shop_schema(),
            SourceFormat::MySqlDump,
            IdentifierCase::Lowercase,
        )
        .unwrap();
        let order: Vec<&str> = plan.tables.iter().map(|t| t.dest_name()).collect();
        assert_eq!(order, vec!["customers", "orders"]);
        assert_eq!(
            plan.tables[1].spec.create_sql(&StandardDestination),
            r#"CREATE TABLE "orders" ("id" INTEGER PRIMARY KEY NOT NULL, "customerid" INTEGER REFERENCES "customers" ("id"), "total" DECIMAL(10,2))"#
        );
        assert_eq!(
            plan.tables[1].spec.insert_sql(&StandardDestination),
            r#"INSERT INTO "orders" ("id", "customerid", "total") VALUES (?, ?, CAST(? AS DECIMAL(10,2)))"#
        );
        assert_eq!(plan.total_rows(), 7);
    }

    #[test]
    fn composite_indexes_are_skipped_and_names_deduplicated() {
        let plan = build_plan(
            shop_schema(),
            SourceFormat::MySqlDump,
            IdentifierCase::Lowercase,
        )
        .unwrap();
        assert_eq!(plan.indexes.len(), 2);
        assert_eq!(plan.indexes[0].dest_name, "idx_customer");
        assert!(plan.indexes[0].unique);
        assert_eq!(plan.indexes[1].dest_name, "orders_idx_customer");
        assert_eq!(
            plan.skipped_indexes,
            vec![SkippedIndex {
                index: "idx_pair".into(),
                table: "Orders".into(),
                reason: "composite".into(),
            }]
        );
        assert_eq!(
            plan.warnings,
            vec!["Skipped index idx_pair on Orders (composite)".to_string()]
        );
    }

    #[test]
    fn reader_skips_are_warned_alongside_plan_skips() {
        let mut schema = shop_schema();
        schema.skip_index("Customers", "idx_lower_email", "expression");
        let plan = build_plan(schema, SourceFormat::MySqlDump, IdentifierCase::Lowercase).unwrap();
        assert_eq!(
            plan.warnings,
            vec![
                "Skipped index idx_lower_email on Customers (expression)".to_string(),
                "Skipped index idx_pair on Orders (composite)".to_string(),
            ]
        );
        assert_eq!(plan.analysis(Path::new("shop.sql")).warnings, plan.warnings);
    }

    #[test]
    fn analysis_reports_counts_in_plan_order() {
        let plan = build_plan(
            shop_schema(),
            SourceFormat::MySqlDump,
            IdentifierCase::Preserve,
        )
        .unwrap();
        let analysis = plan.analysis(Path::new("shop.sql"));
        assert_eq!(analysis.table_names, vec!["Customers", "Orders"]);
        assert_eq!(analysis.row_counts["Orders"], 5);
        assert_eq!(analysis.total_rows(), 7);
    }

    #[test]
    fn collisions_fail_planning() {
        let mut schema = shop_schema();
        schema
            .tables
            .push(SourceTable::new("orders").with_column(SourceColumn::new("id", "int")));
        let err = build_plan(schema, SourceFormat::MySqlDump, IdentifierCase::Lowercase).unwrap_err();
        assert!(matches!(err, ImportError::IdentifierCollision { .. }));
    }
}
