//! Foreign-key dependency ordering

use std::collections::{HashMap, VecDeque};

use crate::ImportError;
use crate::schema::SourceTable;

/// Order `tables` so every table follows the tables it references.
///
/// Kahn's algorithm over "A depends on B" edges taken from A's foreign keys.
/// Self references add no edge. Tables that become ready at the same time
/// keep their source declaration order.
pub fn toposort(tables: &[SourceTable]) -> Result<Vec<&SourceTable>, ImportError> {
    let position: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    // dependents[b] = tables that must come after b
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    let mut in_degree: Vec<usize> = vec![0; tables.len()];

    for (i, table) in tables.iter().enumerate() {
        let mut seen = Vec::new();
        for fk in &table.foreign_keys {
            let target = position.get(fk.to_table.as_str()).copied().or_else(|| {
                tables
                    .iter()
                    .position(|t| t.name.eq_ignore_ascii_case(&fk.to_table))
            });
            let Some(target) = target else {
                return Err(ImportError::MissingReferencedTable {
                    table: table.name.clone(),
                    referenced: fk.to_table.clone(),
                });
            };
            if target == i || seen.contains(&target) {
                continue;
            }
            seen.push(target);
            dependents[target].push(i);
            in_degree[i] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(tables.len());

    while let Some(current) = queue.pop_front() {
        ordered.push(&tables[current]);
        let mut ready: Vec<usize> = dependents[current]
            .iter()
            .copied()
            .filter(|&dep| {
                in_degree[dep] -= 1;
                in_degree[dep] == 0
            })
            .collect();
        ready.sort_unstable();
        queue.extend(ready);
    }

    if ordered.len() < tables.len() {
        let mut cycle: Vec<String> = (0..tables.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| tables[i].name.clone())
            .collect();
        cycle.sort();
        return Err(ImportError::DependencyCycle(cycle));
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SourceColumn, SourceForeignKey};

    fn make_table(name: &str, references: &[&str]) -> SourceTable {
        let mut table = SourceTable::new(name).with_column(SourceColumn::new("id", "int"));
        for (i, target) in references.iter().enumerate() {
            let column = format!("ref_{}", i);
            table.columns.push(SourceColumn::new(column.clone(), "int"));
            table
                .foreign_keys
                .push(SourceForeignKey::new(column, *target, "id"));
        }
        table
    }

    fn names<'a>(tables: &[&'a SourceTable]) -> Vec<&'a str> {
        tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_toposort_linear_chain() {
        let tables = vec![
            make_table("a", &["b"]),
            make_table("b", &["c"]),
            make_table("c", &[]),
        ];
        let sorted = toposort(&tables).unwrap();
        assert_eq!(names(&sorted), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_toposort_independent_tables_keep_declaration_order() {
        let tables = vec![make_table("z", &[]), make_table("a", &[]), make_table("m", &[])];
        let sorted = toposort(&tables).unwrap();
        assert_eq!(names(&sorted), vec!["z", "a", "m"]);
    }

    #[test]
    fn test_toposort_every_table_follows_its_dependencies() {
        let tables = vec![
            make_table("order_items", &["orders", "products"]),
            make_table("orders", &["customers"]),
            make_table("products", &["categories"]),
            make_table("customers", &[]),
            make_table("categories", &["categories"]),
        ];
        let sorted = toposort(&tables).unwrap();
        let order = names(&sorted);
        let pos = |n: &str| order.iter().position(|&x| x == n).unwrap();
        for table in &tables {
            for fk in &table.foreign_keys {
                if fk.to_table != table.name {
                    assert!(
                        pos(&fk.to_table) < pos(&table.name),
                        "{} must precede {}: {:?}",
                        fk.to_table,
                        table.name,
                        order
                    );
                }
            }
        }
    }

    #[test]
    fn test_toposort_self_reference_is_not_a_cycle() {
        let tables = vec![make_table("employees", &["employees"])];
        let sorted = toposort(&tables).unwrap();
        assert_eq!(names(&sorted), vec!["employees"]);
    }

    #[test]
    fn test_toposort_cycle_names_tables_sorted() {
        let tables = vec![
            make_table("root", &[]),
            make_table("b", &["a"]),
            make_table("a", &["b"]),
        ];
        let err = toposort(&tables).unwrap_err();
        match err {
            ImportError::DependencyCycle(cycle) => assert_eq!(cycle, vec!["a", "b"]),
            other => panic!("expected a cycle, got {other}"),
        }
    }

    #[test]
    fn test_toposort_missing_reference_is_an_error() {
        let tables = vec![make_table("orders", &["customers"])];
        let err = toposort(&tables).unwrap_err();
        assert!(matches!(
            err,
            ImportError::MissingReferencedTable { table, referenced }
                if table == "orders" && referenced == "customers"
        ));
    }
}
