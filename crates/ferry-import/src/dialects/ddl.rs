//! `CREATE TABLE` body elements shared by the text dump dialects
//!
//! Each comma-separated element of a table body (or the tail of an
//! `ALTER TABLE ... ADD`) parses into one [`TableElement`], which is then
//! applied to a table of the [`SourceSchema`] being built.

use crate::dialects::{
    bare_name, matching_paren, parse_identifier_list, split_top_level, unquote_identifier,
};
use crate::schema::{SourceColumn, SourceForeignKey, SourceIndex, SourceSchema, SourceTable};

const SERIAL_TYPES: &[&str] = &[
    "serial",
    "bigserial",
    "smallserial",
    "serial2",
    "serial4",
    "serial8",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TableElement {
    Column(ColumnDef),
    PrimaryKey(Vec<String>),
    Index(IndexDef),
    ForeignKey(ForeignKeyDef),
    /// Index kinds that are never created, e.g. FULLTEXT
    Skipped { name: String, reason: String },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub column: SourceColumn,
    /// Inline `REFERENCES table [(column)]`
    pub references: Option<(String, Option<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKey {
    Column(String),
    /// `col(10)`
    Prefix(String),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: Option<String>,
    pub keys: Vec<IndexKey>,
    pub unique: bool,
}

impl IndexDef {
    /// Plain column index, or the name and reason it cannot be created
    pub fn resolve(self, table: &str) -> Result<SourceIndex, (String, &'static str)> {
        let mut columns = Vec::with_capacity(self.keys.len());
        let mut problem = None;
        for key in &self.keys {
            match key {
                IndexKey::Column(name) => columns.push(name.clone()),
                IndexKey::Prefix(name) => {
                    columns.push(name.clone());
                    problem.get_or_insert("prefix length");
                }
                IndexKey::Expression(_) => {
                    problem = Some("expression");
                }
            }
        }
        let name = self.name.unwrap_or_else(|| {
            let suffix = if self.unique { "key" } else { "idx" };
            if columns.is_empty() {
                format!("{}_expr_{}", table, suffix)
            } else {
                format!("{}_{}_{}", table, columns.join("_"), suffix)
            }
        });
        match problem {
            Some(reason) => Err((name, reason)),
            None => Ok(SourceIndex {
                name,
                columns,
                is_unique: self.unique,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub table: String,
    pub ref_columns: Vec<String>,
}

/// Split on whitespace outside quotes and parentheses; a parenthesized group
/// is always its own token, so `decimal(10,2)` yields `decimal`, `(10,2)`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' && q == '\'' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                if depth == 0 && !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = (depth - 1).max(0);
                current.push(ch);
                if depth == 0 {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn is_group(token: &str) -> bool {
    token.starts_with('(')
}

fn is_keyword(token: &str, keyword: &str) -> bool {
    token.eq_ignore_ascii_case(keyword)
}

fn is_identifier(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if matches!((first, last), (b'"', b'"') | (b'`', b'`') | (b'[', b']')) {
            return true;
        }
    }
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Parse `(a, b(10), lower(c))` into index keys
pub fn parse_index_keys(group: &str) -> Vec<IndexKey> {
    let trimmed = group.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(trimmed);

    split_top_level(inner, ',')
        .iter()
        .map(|item| {
            let item = item.trim();
            let tokens = tokenize(item);
            match tokens.as_slice() {
                [first, rest @ ..] if is_identifier(first) => match rest.first() {
                    Some(group) if is_group(group) => {
                        let digits = group.trim_matches(|c| c == '(' || c == ')').trim();
                        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                            IndexKey::Prefix(unquote_identifier(first))
                        } else {
                            IndexKey::Expression(item.to_string())
                        }
                    }
                    // ASC, DESC, NULLS LAST, operator classes
                    _ => IndexKey::Column(unquote_identifier(first)),
                },
                _ => IndexKey::Expression(item.to_string()),
            }
        })
        .collect()
}

/// Byte index of the first `ch` outside quotes
pub fn find_unquoted(text: &str, ch: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => quote = Some(c),
            None if c == ch => return Some(i),
            None => {}
        }
    }
    None
}

/// `CREATE [TEMPORARY|UNLOGGED] TABLE [IF NOT EXISTS] name (...) ...`
pub fn parse_create_table(statement: &str) -> Option<(String, Vec<TableElement>)> {
    let open = find_unquoted(statement, '(')?;
    let close = matching_paren(statement, open)?;
    let head = tokenize(&statement[..open]);
    let table_at = head.iter().position(|t| is_keyword(t, "TABLE"))?;
    if head.len() <= table_at + 1 {
        return None;
    }
    let name = bare_name(head.last()?);
    Some((name, parse_table_body(&statement[open + 1..close])))
}

/// Parse every element of a `CREATE TABLE` body (text between the parens)
pub fn parse_table_body(body: &str) -> Vec<TableElement> {
    split_top_level(body, ',')
        .iter()
        .map(|element| parse_element(element))
        .collect()
}

pub fn parse_element(text: &str) -> TableElement {
    let tokens = tokenize(text.trim());
    let Some(first) = tokens.first() else {
        return TableElement::Other;
    };
    let has_group = tokens.iter().any(|t| is_group(t));

    match first.to_ascii_uppercase().as_str() {
        "CONSTRAINT" if tokens.len() > 2 => {
            let name = unquote_identifier(&tokens[1]);
            parse_constraint(&tokens[2..], Some(name))
        }
        "PRIMARY" | "FOREIGN" | "CHECK" | "EXCLUDE" | "LIKE" => parse_constraint(&tokens, None),
        "UNIQUE" | "KEY" | "INDEX" | "FULLTEXT" | "SPATIAL" if has_group => {
            parse_constraint(&tokens, None)
        }
        _ => TableElement::Column(parse_column(&tokens)),
    }
}

fn parse_constraint(tokens: &[String], name: Option<String>) -> TableElement {
    let Some(head) = tokens.first() else {
        return TableElement::Other;
    };
    let group = tokens.iter().position(|t| is_group(t));
    match head.to_ascii_uppercase().as_str() {
        "PRIMARY" => match group {
            Some(at) => TableElement::PrimaryKey(parse_identifier_list(&tokens[at])),
            None => TableElement::Other,
        },
        "UNIQUE" | "KEY" | "INDEX" => {
            let Some(at) = group else {
                return TableElement::Other;
            };
            let name = name.or_else(|| index_name(&tokens[1..at]));
            TableElement::Index(IndexDef {
                name,
                keys: parse_index_keys(&tokens[at]),
                unique: is_keyword(head, "UNIQUE"),
            })
        }
        "FULLTEXT" | "SPATIAL" => {
            let keys = group.map(|at| parse_index_keys(&tokens[at])).unwrap_or_default();
            let name = name
                .or_else(|| index_name(&tokens[1..group.unwrap_or(tokens.len())]))
                .unwrap_or_else(|| {
                    keys.iter()
                        .map(|k| match k {
                            IndexKey::Column(c) | IndexKey::Prefix(c) => c.clone(),
                            IndexKey::Expression(e) => e.clone(),
                        })
                        .collect::<Vec<_>>()
                        .join("_")
                });
            TableElement::Skipped {
                name,
                reason: head.to_ascii_lowercase(),
            }
        }
        "FOREIGN" => {
            let Some(at) = group else {
                return TableElement::Other;
            };
            let Some(refs) = tokens.iter().position(|t| is_keyword(t, "REFERENCES")) else {
                return TableElement::Other;
            };
            let Some(table) = tokens.get(refs + 1) else {
                return TableElement::Other;
            };
            let ref_columns = tokens
                .get(refs + 2)
                .filter(|t| is_group(t))
                .map(|t| parse_identifier_list(t))
                .unwrap_or_default();
            TableElement::ForeignKey(ForeignKeyDef {
                name: name.or_else(|| index_name(&tokens[1..at])),
                columns: parse_identifier_list(&tokens[at]),
                table: bare_name(table),
                ref_columns,
            })
        }
        _ => TableElement::Other,
    }
}

/// The index name among the words between the key kind and the column list
fn index_name(words: &[String]) -> Option<String> {
    const NOISE: &[&str] = &[
        "KEY", "INDEX", "NULLS", "NOT", "DISTINCT", "USING", "BTREE", "HASH",
    ];
    words
        .iter()
        .find(|w| !NOISE.iter().any(|n| is_keyword(w, n)))
        .map(|w| unquote_identifier(w))
}

fn parse_column(tokens: &[String]) -> ColumnDef {
    let mut column = SourceColumn::new(unquote_identifier(&tokens[0]), "");
    let mut i = 1;
    let mut declared = String::new();

    if let Some(head) = tokens.get(1) {
        declared.push_str(head);
        i = 2;
    }
    while let Some(token) = tokens.get(i) {
        let lower = token.to_ascii_lowercase();
        if is_group(token) || token.starts_with('[') {
            declared.push_str(token);
        } else if matches!(
            lower.as_str(),
            "unsigned" | "signed" | "zerofill" | "varying" | "precision"
        ) {
            declared.push(' ');
            declared.push_str(token);
        } else if (lower == "with" || lower == "without")
            && tokens.get(i + 1).is_some_and(|t| is_keyword(t, "time"))
            && tokens.get(i + 2).is_some_and(|t| is_keyword(t, "zone"))
        {
            declared.push_str(&format!(" {} {} {}", token, tokens[i + 1], tokens[i + 2]));
            i += 3;
            continue;
        } else {
            break;
        }
        i += 1;
    }
    column.declared_type = declared;

    let base = column
        .declared_type
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if SERIAL_TYPES.contains(&base.as_str()) {
        column.is_auto_increment = true;
        column.not_null = true;
    }

    let mut references = None;
    while i < tokens.len() {
        let token = &tokens[i];
        let next = tokens.get(i + 1);
        match token.to_ascii_uppercase().as_str() {
            "NOT" if next.is_some_and(|t| is_keyword(t, "NULL")) => {
                column.not_null = true;
                i += 2;
                continue;
            }
            "PRIMARY" if next.is_some_and(|t| is_keyword(t, "KEY")) => {
                column.is_primary_key = true;
                column.not_null = true;
                i += 2;
                continue;
            }
            "UNIQUE" => {
                column.is_unique = true;
                if next.is_some_and(|t| is_keyword(t, "KEY")) {
                    i += 1;
                }
            }
            "AUTO_INCREMENT" | "AUTOINCREMENT" | "IDENTITY" => column.is_auto_increment = true,
            "DEFAULT" => {
                if next.is_some_and(|t| t.to_ascii_lowercase().starts_with("nextval")) {
                    column.is_auto_increment = true;
                }
                i += 2;
                continue;
            }
            "GENERATED" => {
                if tokens[i..].iter().any(|t| is_keyword(t, "IDENTITY")) {
                    column.is_auto_increment = true;
                }
            }
            "REFERENCES" => {
                if let Some(table) = next {
                    let target = tokens
                        .get(i + 2)
                        .filter(|t| is_group(t))
                        .and_then(|t| parse_identifier_list(t).into_iter().next());
                    references = Some((bare_name(table), target));
                    i += 2;
                    continue;
                }
            }
            "COMMENT" | "COLLATE" => {
                i += 2;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    ColumnDef { column, references }
}

/// Apply `element` to the already registered table `table_name`
pub fn apply_element(schema: &mut SourceSchema, table_name: &str, element: TableElement) {
    let mut warning = None;
    let mut skipped = None;

    let Some(table) = schema.table_mut(table_name) else {
        schema.warn(format!("Ignored constraint on unknown table {}", table_name));
        return;
    };
    match element {
        TableElement::Column(def) => {
            if let Some((to_table, to_column)) = def.references {
                table.foreign_keys.push(SourceForeignKey {
                    name: None,
                    from_column: def.column.name.clone(),
                    to_table,
                    to_column,
                });
            }
            table.columns.push(def.column);
        }
        TableElement::PrimaryKey(columns) => table.set_primary_key(&columns),
        TableElement::Index(index) => match index.resolve(table_name) {
            Ok(index) => table.indexes.push(index),
            Err((name, reason)) => skipped = Some((name, reason.to_string())),
        },
        TableElement::ForeignKey(fk) => match (fk.columns.as_slice(), fk.ref_columns.as_slice()) {
            ([from], []) => table.foreign_keys.push(SourceForeignKey {
                name: fk.name,
                from_column: from.clone(),
                to_table: fk.table,
                to_column: None,
            }),
            ([from], [to]) => table.foreign_keys.push(SourceForeignKey {
                name: fk.name,
                from_column: from.clone(),
                to_table: fk.table,
                to_column: Some(to.clone()),
            }),
            _ => {
                warning = Some(format!(
                    "Skipped composite foreign key {} on {} ({}) -> {}",
                    fk.name.as_deref().unwrap_or("(unnamed)"),
                    table_name,
                    fk.columns.join(", "),
                    fk.table
                ));
            }
        },
        TableElement::Skipped { name, reason } => skipped = Some((name, reason)),
        TableElement::Other => {}
    }

    if let Some(message) = warning {
        schema.warn(message);
    }
    if let Some((index, reason)) = skipped {
        schema.skip_index(table_name, index, reason);
    }
}

/// Register `name` and apply its body; columns go first so that table-level
/// constraints can refer to any of them.
pub fn define_table(schema: &mut SourceSchema, name: &str, elements: Vec<TableElement>) {
    if let Some(position) = schema.tables.iter().position(|t| t.name == name) {
        schema.tables.remove(position);
        schema.warn(format!("Table {} is defined more than once; using the last definition", name));
    }
    schema.tables.push(SourceTable::new(name));

    let (columns, constraints): (Vec<_>, Vec<_>) = elements
        .into_iter()
        .partition(|e| matches!(e, TableElement::Column(_)));
    for element in columns.into_iter().chain(constraints) {
        apply_element(schema, name, element);
    }
}

/// `ALTER TABLE [ONLY] [IF EXISTS] name <action>`
pub fn apply_alter_table(schema: &mut SourceSchema, statement: &str) {
    let tokens = tokenize(statement);
    let mut at = 2;
    while tokens
        .get(at)
        .is_some_and(|t| ["ONLY", "IF", "EXISTS"].iter().any(|k| t.eq_ignore_ascii_case(k)))
    {
        at += 1;
    }
    let Some(raw_name) = tokens.get(at) else {
        return;
    };
    let name = bare_name(raw_name);
    let action = &tokens[at + 1..];
    let Some(verb) = action.first() else {
        return;
    };

    if verb.eq_ignore_ascii_case("ADD") {
        let element = parse_element(&action[1..].join(" "));
        if matches!(element, TableElement::Column(_)) {
            return;
        }
        if let Some(table) = schema.resolve_table_name(&name) {
            apply_element(schema, &table, element);
        }
        return;
    }

    if verb.eq_ignore_ascii_case("ALTER") {
        let mut rest = &action[1..];
        if rest.first().is_some_and(|t| t.eq_ignore_ascii_case("COLUMN")) {
            rest = &rest[1..];
        }
        let Some(column) = rest.first().map(|c| unquote_identifier(c)) else {
            return;
        };
        let upper: Vec<String> = rest[1..].iter().map(|t| t.to_ascii_uppercase()).collect();
        let sets_sequence_default = upper.len() >= 3
            && upper[0] == "SET"
            && upper[1] == "DEFAULT"
            && upper[2].starts_with("NEXTVAL");
        let adds_identity = upper.first().is_some_and(|t| t == "ADD")
            && upper.iter().any(|t| t == "IDENTITY");
        if sets_sequence_default || adds_identity {
            let Some(table) = schema.resolve_table_name(&name) else {
                return;
            };
            if let Some(col) = schema
                .table_mut(&table)
                .and_then(|t| t.columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(&column)))
            {
                col.is_auto_increment = true;
            }
        }
    }
}

/// `CREATE [UNIQUE] INDEX [CONCURRENTLY] [IF NOT EXISTS] name ON [ONLY] t
/// [USING method] (keys) [WHERE ...]`; returns false for anything else
pub fn apply_create_index(schema: &mut SourceSchema, statement: &str) -> bool {
    let tokens = tokenize(statement);
    let unique = tokens.get(1).is_some_and(|t| t.eq_ignore_ascii_case("UNIQUE"));
    let index_at = if unique { 2 } else { 1 };
    if !tokens.get(index_at).is_some_and(|t| t.eq_ignore_ascii_case("INDEX")) {
        return false;
    }
    let Some(on) = tokens.iter().position(|t| t.eq_ignore_ascii_case("ON")) else {
        return true;
    };
    let name = tokens[index_at + 1..on]
        .iter()
        .rev()
        .find(|t| !["CONCURRENTLY", "IF", "NOT", "EXISTS"].iter().any(|k| t.eq_ignore_ascii_case(k)))
        .map(|t| bare_name(t));
    let mut table_at = on + 1;
    if tokens.get(table_at).is_some_and(|t| t.eq_ignore_ascii_case("ONLY")) {
        table_at += 1;
    }
    let Some(table_token) = tokens.get(table_at) else {
        return true;
    };
    let Some(table) = schema.resolve_table_name(&bare_name(table_token)) else {
        schema.warn(format!("Ignored index on unknown table {}", bare_name(table_token)));
        return true;
    };
    let Some(group) = tokens[table_at..].iter().position(|t| t.starts_with('(')) else {
        return true;
    };
    let group = table_at + group;
    let def = IndexDef {
        name,
        keys: parse_index_keys(&tokens[group]),
        unique,
    };

    let partial = tokens[group..].iter().any(|t| t.eq_ignore_ascii_case("WHERE"));
    if partial {
        let name = def
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_partial_idx", table));
        schema.skip_index(&table, name, "partial");
        return true;
    }
    apply_element(schema, &table, TableElement::Index(def));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_mapping::Dialect;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokenizer_splits_groups_from_words() {
        assert_eq!(
            tokenize("`price` decimal(10,2) unsigned NOT NULL DEFAULT '0.00'"),
            vec!["`price`", "decimal", "(10,2)", "unsigned", "NOT", "NULL", "DEFAULT", "'0.00'"]
        );
        assert_eq!(
            tokenize("id integer DEFAULT nextval('users_id_seq'::regclass)"),
            vec!["id", "integer", "DEFAULT", "nextval", "('users_id_seq'::regclass)"]
        );
    }

    #[test]
    fn parses_mysql_columns() {
        let TableElement::Column(def) = parse_element("`id` int(11) unsigned NOT NULL AUTO_INCREMENT") else {
            panic!("expected a column");
        };
        assert_eq!(def.column.name, "id");
        assert_eq!(def.column.declared_type, "int(11) unsigned");
        assert!(def.column.not_null && def.column.is_auto_increment);

        let TableElement::Column(def) =
            parse_element("`note` varchar(20) CHARACTER SET utf8mb4 DEFAULT NULL COMMENT 'x'")
        else {
            panic!("expected a column");
        };
        assert_eq!(def.column.declared_type, "varchar(20)");
        assert!(!def.column.not_null);
    }

    #[test]
    fn parses_postgres_columns() {
        let TableElement::Column(def) =
            parse_element("created_at timestamp(3) with time zone NOT NULL")
        else {
            panic!("expected a column");
        };
        assert_eq!(def.column.declared_type, "timestamp(3) with time zone");

        let TableElement::Column(def) = parse_element("name character varying(255)") else {
            panic!("expected a column");
        };
        assert_eq!(def.column.declared_type, "character varying(255)");

        let TableElement::Column(def) = parse_element("id bigserial PRIMARY KEY") else {
            panic!("expected a column");
        };
        assert!(def.column.is_auto_increment && def.column.is_primary_key);

        let TableElement::Column(def) =
            parse_element("owner_id integer REFERENCES public.users(id) ON DELETE CASCADE")
        else {
            panic!("expected a column");
        };
        assert_eq!(def.references, Some(("users".into(), Some("id".into()))));

        let TableElement::Column(def) =
            parse_element("id integer GENERATED ALWAYS AS IDENTITY")
        else {
            panic!("expected a column");
        };
        assert!(def.column.is_auto_increment);
    }

    #[test]
    fn parses_keys_and_constraints() {
        assert_eq!(
            parse_element("PRIMARY KEY (`a`,`b`)"),
            TableElement::PrimaryKey(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            parse_element("UNIQUE KEY `email` (`email`)"),
            TableElement::Index(IndexDef {
                name: Some("email".into()),
                keys: vec![IndexKey::Column("email".into())],
                unique: true,
            })
        );
        assert_eq!(
            parse_element("KEY `idx_name` (`name`(10))"),
            TableElement::Index(IndexDef {
                name: Some("idx_name".into()),
                keys: vec![IndexKey::Prefix("name".into())],
                unique: false,
            })
        );
        assert_eq!(
            parse_element("FULLTEXT KEY `ft_body` (`body`)"),
            TableElement::Skipped {
                name: "ft_body".into(),
                reason: "fulltext".into(),
            }
        );
        assert_eq!(
            parse_element(
                "CONSTRAINT `fk_customer` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`) ON DELETE CASCADE"
            ),
            TableElement::ForeignKey(ForeignKeyDef {
                name: Some("fk_customer".into()),
                columns: vec!["customer_id".into()],
                table: "customers".into(),
                ref_columns: vec!["id".into()],
            })
        );
        assert_eq!(parse_element("CONSTRAINT positive CHECK (qty > 0)"), TableElement::Other);
    }

    #[test]
    fn parses_create_table_statements() {
        let (name, elements) = parse_create_table(
            "CREATE TABLE IF NOT EXISTS `shop`.`orders` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;",
        )
        .unwrap();
        assert_eq!(name, "orders");
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[1], TableElement::PrimaryKey(vec!["id".into()]));
        assert!(parse_create_table("CREATE TABLE broken").is_none());
    }

    #[test]
    fn a_column_named_key_is_still_a_column() {
        assert!(matches!(parse_element("key text NOT NULL"), TableElement::Column(_)));
    }

    #[test]
    fn index_keys_classify_expressions() {
        assert_eq!(
            parse_index_keys("(lower(email), name DESC, \"Code\" text_pattern_ops)"),
            vec![
                IndexKey::Expression("lower(email)".into()),
                IndexKey::Column("name".into()),
                IndexKey::Column("Code".into()),
            ]
        );
    }

    #[test]
    fn defines_tables_with_deferred_constraints() {
        let mut schema = SourceSchema::new(Dialect::MySql);
        let elements = parse_table_body(
            "PRIMARY KEY (`order_id`, `line`),\n\
             `order_id` int NOT NULL,\n\
             `line` int NOT NULL,\n\
             `sku` varchar(20),\n\
             KEY `idx_sku` (`sku`),\n\
             KEY `idx_prefix` (`sku`(4)),\n\
             CONSTRAINT `fk_pair` FOREIGN KEY (`order_id`, `line`) REFERENCES `x` (`a`, `b`)",
        );
        define_table(&mut schema, "order_lines", elements);

        let table = schema.table("order_lines").unwrap();
        assert_eq!(table.columns.len(), 3);
        assert_eq!(table.primary_key_columns().len(), 2);
        assert_eq!(table.indexes.len(), 1);
        assert!(table.foreign_keys.is_empty());
        assert_eq!(schema.skipped_indexes.len(), 1);
        assert_eq!(schema.skipped_indexes[0].reason, "prefix length");
        assert_eq!(schema.warnings.len(), 1);
        assert!(schema.warnings[0].contains("composite foreign key fk_pair"));
    }
}
