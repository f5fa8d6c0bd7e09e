//! Type mapping from source dialects to the destination vocabulary
//!
//! Each dialect has a [`TypeMapper`] that turns a declared column type into a
//! [`DestType`]. Mapping is a pure function of the declared string.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default parameters for a decimal column declared without them
pub const DEFAULT_DECIMAL_PRECISION: u32 = 18;
pub const DEFAULT_DECIMAL_SCALE: u32 = 4;

/// Source dialect a declared type was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

/// Column types the destination understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Decimal { precision: u32, scale: Option<u32> },
    Uuid,
    Timestamp,
}

impl DestType {
    pub fn default_decimal() -> Self {
        DestType::Decimal {
            precision: DEFAULT_DECIMAL_PRECISION,
            scale: Some(DEFAULT_DECIMAL_SCALE),
        }
    }

}

impl fmt::Display for DestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestType::Integer => f.write_str("INTEGER"),
            DestType::Real => f.write_str("REAL"),
            DestType::Text => f.write_str("TEXT"),
            DestType::Blob => f.write_str("BLOB"),
            DestType::Boolean => f.write_str("BOOLEAN"),
            DestType::Decimal {
                precision,
                scale: Some(scale),
            } => write!(f, "DECIMAL({},{})", precision, scale),
            DestType::Decimal {
                precision,
                scale: None,
            } => write!(f, "DECIMAL({})", precision),
            DestType::Uuid => f.write_str("UUID"),
            DestType::Timestamp => f.write_str("TIMESTAMP"),
        }
    }
}

/// Maps declared source types of one dialect
pub trait TypeMapper: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn map_type(&self, declared: &str) -> DestType;
}

#[derive(Debug, Clone, Default)]
pub struct SqliteTypeMapper;

impl TypeMapper for SqliteTypeMapper {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn map_type(&self, declared: &str) -> DestType {
        let ty = DeclaredType::parse(declared);
        let base = ty.base.as_str();

        if base.starts_with("bool") {
            return DestType::Boolean;
        }
        if base == "uuid" || base == "guid" {
            return DestType::Uuid;
        }
        // Affinity rules, in SQLite's own precedence order.
        if base.contains("int") {
            return DestType::Integer;
        }
        if base.starts_with("decimal") || base.starts_with("numeric") {
            return ty.decimal();
        }
        if base.contains("char") || base.contains("clob") || base.contains("text") {
            return DestType::Text;
        }
        if base.contains("blob") {
            return DestType::Blob;
        }
        if base.contains("real") || base.contains("floa") || base.contains("doub") {
            return DestType::Real;
        }
        if base.starts_with("datetime") || base.starts_with("timestamp") {
            return DestType::Timestamp;
        }
        DestType::Text
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresTypeMapper;

impl TypeMapper for PostgresTypeMapper {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn map_type(&self, declared: &str) -> DestType {
        let ty = DeclaredType::parse(declared);
        if ty.is_array {
            return DestType::Text;
        }
        match ty.base.as_str() {
            "smallint" | "integer" | "int" | "int2" | "int4" | "int8" | "bigint"
            | "smallserial" | "serial" | "bigserial" | "serial2" | "serial4" | "serial8" => {
                DestType::Integer
            }
            "real" | "float4" | "float8" | "double precision" | "float" => DestType::Real,
            "numeric" | "decimal" => ty.decimal(),
            "money" => DestType::Decimal {
                precision: 19,
                scale: Some(4),
            },
            "boolean" | "bool" => DestType::Boolean,
            "uuid" => DestType::Uuid,
            "bytea" => DestType::Blob,
            base if base.starts_with("timestamp") => DestType::Timestamp,
            _ => DestType::Text,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MySqlTypeMapper;

impl TypeMapper for MySqlTypeMapper {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn map_type(&self, declared: &str) -> DestType {
        let ty = DeclaredType::parse(declared);
        match ty.base.as_str() {
            "tinyint" if ty.params.as_deref() == Some("1") => DestType::Boolean,
            "bool" | "boolean" => DestType::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "bit"
            | "year" => DestType::Integer,
            "float" | "double" | "double precision" | "real" => DestType::Real,
            "decimal" | "numeric" | "dec" | "fixed" => ty.decimal(),
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                DestType::Blob
            }
            "datetime" | "timestamp" => DestType::Timestamp,
            _ => DestType::Text,
        }
    }
}

/// Get the type mapper for a source dialect
pub fn get_type_mapper(dialect: Dialect) -> Box<dyn TypeMapper> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteTypeMapper),
        Dialect::Postgres => Box::new(PostgresTypeMapper),
        Dialect::MySql => Box::new(MySqlTypeMapper),
    }
}

pub fn map_type(dialect: Dialect, declared: &str) -> DestType {
    get_type_mapper(dialect).map_type(declared)
}

/// A declared type split into a normalized base name and its first
/// parenthesized parameter list
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeclaredType {
    base: String,
    params: Option<String>,
    is_array: bool,
}

impl DeclaredType {
    fn parse(declared: &str) -> Self {
        let lower = declared.trim().to_lowercase();
        let is_array = lower.ends_with("[]") || lower.starts_with('_');

        let mut base = String::with_capacity(lower.len());
        let mut params: Option<String> = None;
        let mut depth = 0usize;
        let mut current = String::new();
        for ch in lower.chars() {
            match ch {
                '(' => {
                    if depth > 0 {
                        current.push(ch);
                    }
                    depth += 1;
                }
                ')' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        if params.is_none() {
                            params = Some(current.trim().to_string());
                        }
                        current.clear();
                    } else {
                        current.push(ch);
                    }
                }
                '[' | ']' if depth == 0 => {}
                _ if depth > 0 => current.push(ch),
                _ => base.push(ch),
            }
        }

        let base = base
            .split_whitespace()
            .filter(|word| !matches!(*word, "unsigned" | "signed" | "zerofill"))
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            base,
            params,
            is_array,
        }
    }

    /// Decimal with the declared `(p,s)` or `(p)`, else the default
    fn decimal(&self) -> DestType {
        let Some(params) = self.params.as_deref() else {
            return DestType::default_decimal();
        };
        let mut parts = params.split(',').map(str::trim);
        let precision = parts.next().and_then(|p| p.parse::<u32>().ok());
        let scale = parts.next().map(|s| s.parse::<u32>().ok());
        match (precision, scale) {
            (Some(precision), None) => DestType::Decimal {
                precision,
                scale: None,
            },
            (Some(precision), Some(Some(scale))) => DestType::Decimal {
                precision,
                scale: Some(scale),
            },
            _ => DestType::default_decimal(),
        }
    }
}
