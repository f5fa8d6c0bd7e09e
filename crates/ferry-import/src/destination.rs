//! How a destination spells column types and bound-parameter casts
//!
//! Plans carry destination-neutral [`DestType`]s. The statements sent to a
//! connection are rendered by the [`DestinationDialect`] chosen from the
//! connection's driver name.

use crate::type_mapping::DestType;

pub trait DestinationDialect: Send + Sync {
    /// Driver name this dialect renders for
    fn name(&self) -> &'static str;

    /// Declared type used in `CREATE TABLE`
    fn column_type(&self, ty: &DestType) -> String;

    /// Target of the `CAST` wrapped around a bound parameter, if any
    fn cast_target(&self, ty: &DestType) -> Option<String>;

    /// Placeholder expression used in `INSERT` statements
    fn placeholder(&self, ty: &DestType) -> String {
        match self.cast_target(ty) {
            Some(target) => format!("CAST(? AS {})", target),
            None => "?".to_string(),
        }
    }
}

/// Stores with native decimal and UUID types
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDestination;

impl DestinationDialect for StandardDestination {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn column_type(&self, ty: &DestType) -> String {
        ty.to_string()
    }

    fn cast_target(&self, ty: &DestType) -> Option<String> {
        match ty {
            DestType::Decimal { .. } | DestType::Uuid => Some(ty.to_string()),
            _ => None,
        }
    }
}

/// SQLite has neither type. `UUID` and `DECIMAL` declarations get numeric
/// affinity there, and a numeric cast rewrites the text (`'1e10aaaa-…'`
/// becomes `10000000000`, `'12.50'` becomes `12.5`). Both are stored as
/// text instead, digit for digit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDestination;

impl DestinationDialect for SqliteDestination {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn column_type(&self, ty: &DestType) -> String {
        match ty {
            DestType::Decimal { .. } | DestType::Uuid => "TEXT".to_string(),
            _ => ty.to_string(),
        }
    }

    fn cast_target(&self, ty: &DestType) -> Option<String> {
        match ty {
            DestType::Decimal { .. } | DestType::Uuid => Some("TEXT".to_string()),
            _ => None,
        }
    }
}

/// Get the dialect for a connection's driver name
pub fn get_destination_dialect(driver_name: &str) -> Box<dyn DestinationDialect> {
    match driver_name.to_lowercase().as_str() {
        "sqlite" | "sqlite3" => Box::new(SqliteDestination),
        _ => Box::new(StandardDestination),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dec(precision: u32, scale: u32) -> DestType {
        DestType::Decimal {
            precision,
            scale: Some(scale),
        }
    }

    #[test]
    fn standard_casts_decimal_and_uuid() {
        let dialect = StandardDestination;
        assert_eq!(dialect.column_type(&dec(10, 2)), "DECIMAL(10,2)");
        assert_eq!(dialect.placeholder(&dec(10, 2)), "CAST(? AS DECIMAL(10,2))");
        assert_eq!(dialect.placeholder(&DestType::Uuid), "CAST(? AS UUID)");
        assert_eq!(dialect.placeholder(&DestType::Text), "?");
        assert_eq!(dialect.placeholder(&DestType::Boolean), "?");
    }

    #[test]
    fn sqlite_keeps_decimal_and_uuid_as_text() {
        let dialect = get_destination_dialect("sqlite");
        assert_eq!(dialect.name(), "sqlite");
        assert_eq!(dialect.column_type(&DestType::Uuid), "TEXT");
        assert_eq!(dialect.column_type(&dec(10, 2)), "TEXT");
        assert_eq!(dialect.column_type(&DestType::Boolean), "BOOLEAN");
        assert_eq!(dialect.placeholder(&DestType::Uuid), "CAST(? AS TEXT)");
        assert_eq!(dialect.placeholder(&dec(18, 4)), "CAST(? AS TEXT)");
        assert_eq!(dialect.placeholder(&DestType::Integer), "?");
    }

    #[test]
    fn unknown_drivers_get_the_standard_rendering() {
        assert_eq!(get_destination_dialect("postgres").name(), "standard");
        assert_eq!(get_destination_dialect("SQLite").name(), "sqlite");
    }
}
