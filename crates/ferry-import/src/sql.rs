//! Destination SQL generation

use crate::destination::DestinationDialect;
use crate::type_mapping::DestType;

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// One destination column, names already mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: DestType,
    pub not_null: bool,
    pub unique: bool,
    /// `(table, column)` of an inline foreign key
    pub references: Option<(String, String)>,
}

/// One destination table, names already mapped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub primary_key: Vec<String>,
}

impl TableSpec {
    pub fn create_sql(&self, dialect: &dyn DestinationDialect) -> String {
        let single_pk = match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };

        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let is_pk = single_pk == Some(col.name.as_str());
                let mut sql = format!(
                    "{} {}",
                    quote_identifier(&col.name),
                    dialect.column_type(&col.ty)
                );
                if is_pk {
                    sql.push_str(" PRIMARY KEY");
                }
                if col.not_null || self.primary_key.contains(&col.name) {
                    sql.push_str(" NOT NULL");
                }
                if col.unique && !is_pk {
                    sql.push_str(" UNIQUE");
                }
                if let Some((table, column)) = &col.references {
                    sql.push_str(&format!(
                        " REFERENCES {} ({})",
                        quote_identifier(table),
                        quote_identifier(column)
                    ));
                }
                sql
            })
            .collect();

        if self.primary_key.len() > 1 {
            let cols: Vec<String> = self.primary_key.iter().map(|c| quote_identifier(c)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }

        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(&self.name),
            parts.join(", ")
        )
    }

    /// Parameterized single-row insert, casting where `dialect` asks for it
    pub fn insert_sql(&self, dialect: &dyn DestinationDialect) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| quote_identifier(&c.name)).collect();
        let placeholders: Vec<String> = self
            .columns
            .iter()
            .map(|c| dialect.placeholder(&c.ty))
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_identifier(&self.name),
            names.join(", "),
            placeholders.join(", ")
        )
    }
}

pub fn create_index_sql(index: &str, table: &str, column: &str, unique: bool) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_identifier(index),
        quote_identifier(table),
        quote_identifier(column)
    )
}
