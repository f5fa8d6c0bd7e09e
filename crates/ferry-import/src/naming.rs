//! Identifier normalization
//!
//! One policy applies to a whole run. Every table name and, separately,
//! every table's column names must stay distinct after normalization.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use crate::ImportError;
use crate::schema::SourceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierCase {
    Lowercase,
    Preserve,
}

impl IdentifierCase {
    pub fn from_lowercase_flag(lowercase: bool) -> Self {
        if lowercase {
            IdentifierCase::Lowercase
        } else {
            IdentifierCase::Preserve
        }
    }

    pub fn apply(&self, name: &str) -> String {
        match self {
            IdentifierCase::Lowercase => name.to_lowercase(),
            IdentifierCase::Preserve => name.to_string(),
        }
    }
}

/// Source → destination names for tables and their columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMaps {
    pub tables: IndexMap<String, String>,
    pub columns: HashMap<String, IndexMap<String, String>>,
}

impl NameMaps {
    pub fn table<'a>(&'a self, source: &'a str) -> &'a str {
        self.tables.get(source).map(String::as_str).unwrap_or(source)
    }

    pub fn column<'a>(&'a self, table: &str, column: &'a str) -> &'a str {
        self.columns
            .get(table)
            .and_then(|columns| columns.get(column))
            .map(String::as_str)
            .unwrap_or(column)
    }
}

/// Build the table and column maps, failing on the first collision
pub fn build_name_maps(
    tables: &[SourceTable],
    case: IdentifierCase,
) -> Result<NameMaps, ImportError> {
    let mut maps = NameMaps::default();

    let table_names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    maps.tables = map_namespace("tables", &table_names, case)?;

    for table in tables {
        let column_names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        let scope = format!("columns of table '{}'", table.name);
        let columns = map_namespace(&scope, &column_names, case)?;
        maps.columns.insert(table.name.clone(), columns);
    }

    tracing::debug!(tables = maps.tables.len(), "name maps built");
    Ok(maps)
}

fn map_namespace(
    scope: &str,
    names: &[&str],
    case: IdentifierCase,
) -> Result<IndexMap<String, String>, ImportError> {
    let mut forward = IndexMap::with_capacity(names.len());
    let mut reverse: HashMap<String, &str> = HashMap::with_capacity(names.len());

    for &name in names {
        let normalized = case.apply(name);
        match reverse.get(&normalized) {
            Some(&existing) if existing != name => {
                return Err(ImportError::IdentifierCollision {
                    scope: scope.to_string(),
                    first: existing.to_string(),
                    second: name.to_string(),
                    normalized,
                });
            }
            Some(_) => {}
            None => {
                reverse.insert(normalized.clone(), name);
            }
        }
        forward.insert(name.to_string(), normalized);
    }
    Ok(forward)
}

/// Hands out index names that are unique across the destination
#[derive(Debug, Default)]
pub struct IndexNamer {
    taken: HashSet<String>,
}

impl IndexNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `names` already taken; table names share the index namespace
    pub fn with_reserved<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            taken: names.into_iter().map(str::to_lowercase).collect(),
        }
    }

    /// `index`, else `<table>_<index>`, else `<table>_<index>_<n>`
    pub fn assign(&mut self, table: &str, index: &str) -> String {
        if self.taken.insert(index.to_lowercase()) {
            return index.to_string();
        }
        let prefixed = format!("{}_{}", table, index);
        if self.taken.insert(prefixed.to_lowercase()) {
            return prefixed;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", prefixed, n);
            if self.taken.insert(candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}
