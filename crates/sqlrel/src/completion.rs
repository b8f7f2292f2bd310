use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ResolvedTableReference, TableDef};
use crate::errors::{Result, validation};
use crate::functions::OperatorTable;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionHintKind {
    Column,
    Table,
    View,
    Schema,
    Catalog,
    Repository,
    Function,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionHint {
    #[serde(rename = "type")]
    pub kind: CompletionHintKind,
    /// Qualified name of the suggestion, outermost part first.
    pub qualified_names: Vec<String>,
    /// Text before the cursor the suggestion replaces.
    pub replaced_prefix: String,
}

const KEYWORDS: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "DELETE", "DESC", "DISTINCT",
    "ELSE", "END", "EXISTS", "FALSE", "FROM", "FULL", "GROUP", "HAVING", "IN", "INNER", "INSERT",
    "INTO", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER",
    "OUTER", "RIGHT", "SELECT", "SET", "THEN", "TRUE", "UPDATE", "USING", "VALUES", "WHEN",
    "WHERE", "WITH",
];

/// Suggests completions for partially written statements.
pub struct Completer<'a> {
    catalog: &'a dyn Catalog,
    functions: &'a OperatorTable,
    database: &'a str,
}

impl<'a> Completer<'a> {
    pub fn new(catalog: &'a dyn Catalog, functions: &'a OperatorTable, database: &'a str) -> Self {
        Completer {
            catalog,
            functions,
            database,
        }
    }

    /// Complete the word ending at byte offset `cursor`.
    ///
    /// When `visible_tables` is non-empty only those tables are offered as
    /// table suggestions. Their columns are always offered, in addition to
    /// columns of any table named in the statement itself.
    pub fn complete(
        &self,
        sql: &str,
        cursor: usize,
        visible_tables: &[String],
    ) -> Result<Vec<CompletionHint>> {
        if cursor > sql.len() || !sql.is_char_boundary(cursor) {
            return Err(validation!(
                "Cursor position {cursor} is out of range for statement of length {}",
                sql.len()
            ));
        }
        let before = &sql[..cursor];
        let word_start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '.')
            .last()
            .map(|(idx, _)| idx)
            .unwrap_or(cursor);
        let word = &before[word_start..];

        let tables = self.catalog.list_tables(self.database)?;
        let mut hints = BTreeSet::new();

        if let Some((qualifier, partial)) = word.rsplit_once('.') {
            let qualifier = qualifier.rsplit('.').next().unwrap_or(qualifier);
            if let Some(table) = self.resolve_qualifier(sql, qualifier, &tables)? {
                self.add_columns(&mut hints, &table, partial);
            }
            return Ok(hints.into_iter().collect());
        }

        let partial = word;
        for keyword in KEYWORDS {
            if starts_with_ignore_case(keyword, partial) {
                let names = vec![keyword.to_string()];
                hints.insert(hint(CompletionHintKind::Keyword, names, partial));
            }
        }

        let is_visible = |table: &TableDef| {
            visible_tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&table.name))
        };

        for table in &tables {
            if starts_with_ignore_case(&table.name, partial) {
                let kind = if table.is_view() {
                    CompletionHintKind::View
                } else if visible_tables.is_empty() || is_visible(table) {
                    CompletionHintKind::Table
                } else {
                    continue;
                };
                hints.insert(hint(
                    kind,
                    vec![self.database.to_string(), table.name.clone()],
                    partial,
                ));
            }
        }

        let mentioned = statement_words(sql);
        for table in &tables {
            if is_visible(table) || mentioned.contains(&table.name.to_lowercase()) {
                self.add_columns(&mut hints, table, partial);
            }
        }

        for name in self.functions.names() {
            if starts_with_ignore_case(name, partial) {
                hints.insert(hint(
                    CompletionHintKind::Function,
                    vec![name.to_uppercase()],
                    partial,
                ));
            }
        }

        Ok(hints.into_iter().collect())
    }

    /// Find the table a qualifier refers to, either by name or by an alias
    /// written after the table name in the statement.
    fn resolve_qualifier(
        &self,
        sql: &str,
        qualifier: &str,
        tables: &[TableDef],
    ) -> Result<Option<TableDef>> {
        let qualifier = qualifier.to_lowercase();
        if let Some(table) = self
            .catalog
            .get_table(&ResolvedTableReference::new(self.database, &qualifier))?
        {
            return Ok(Some(table));
        }

        let words = statement_word_list(sql);
        for (idx, word) in words.iter().enumerate() {
            if *word != qualifier || idx == 0 {
                continue;
            }
            let mut prev = idx - 1;
            if words[prev] == "as" && prev > 0 {
                prev -= 1;
            }
            if let Some(table) = tables.iter().find(|t| t.name == words[prev]) {
                return Ok(Some(table.clone()));
            }
        }
        Ok(None)
    }

    fn add_columns(&self, hints: &mut BTreeSet<CompletionHint>, table: &TableDef, partial: &str) {
        for column in &table.columns {
            if starts_with_ignore_case(&column.name, partial) {
                hints.insert(hint(
                    CompletionHintKind::Column,
                    vec![table.name.clone(), column.name.clone()],
                    partial,
                ));
            }
        }
    }
}

fn hint(kind: CompletionHintKind, names: Vec<String>, replaced: &str) -> CompletionHint {
    CompletionHint {
        kind,
        qualified_names: names,
        replaced_prefix: replaced.to_string(),
    }
}

fn starts_with_ignore_case(candidate: &str, prefix: &str) -> bool {
    candidate.len() >= prefix.len()
        && candidate.is_char_boundary(prefix.len())
        && candidate[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Lowercased words of a statement, in order.
fn statement_word_list(sql: &str) -> Vec<String> {
    sql.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn statement_words(sql: &str) -> BTreeSet<String> {
    statement_word_list(sql).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, MemoryCatalog};
    use crate::types::DataType;

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.insert(
            "sales",
            TableDef::table(
                "orders",
                vec![
                    ColumnDef::new("id", DataType::BigInt),
                    ColumnDef::new("total", DataType::Double),
                    ColumnDef::new("tag", DataType::Text),
                ],
            ),
        );
        catalog.insert("sales", TableDef::view("v_orders", "SELECT * FROM orders"));
        catalog
    }

    #[test]
    fn qualified_columns_by_alias() {
        let catalog = catalog();
        let functions = OperatorTable::builtin();
        let completer = Completer::new(&catalog, &functions, "sales");

        let sql = "SELECT o.t FROM orders o";
        let hints = completer.complete(sql, "SELECT o.t".len(), &[]).unwrap();
        let names: Vec<_> = hints.iter().map(|h| h.qualified_names.join(".")).collect();
        assert_eq!(vec!["orders.tag", "orders.total"], names);
        assert!(hints.iter().all(|h| h.replaced_prefix == "t"));
    }

    #[test]
    fn tables_keywords_and_columns() {
        let catalog = catalog();
        let functions = OperatorTable::builtin();
        let completer = Completer::new(&catalog, &functions, "sales");

        let hints = completer.complete("SELECT * FROM o", 15, &[]).unwrap();
        let kinds: Vec<_> = hints
            .iter()
            .map(|h| (h.kind, h.qualified_names.join(".")))
            .collect();
        assert!(kinds.contains(&(CompletionHintKind::Table, "sales.orders".to_string())));
        assert!(kinds.contains(&(CompletionHintKind::Keyword, "OR".to_string())));
        assert!(!kinds.iter().any(|(k, _)| *k == CompletionHintKind::Column));

        let hints = completer
            .complete("SELECT to", 9, &["orders".to_string()])
            .unwrap();
        assert!(
            hints
                .iter()
                .any(|h| h.kind == CompletionHintKind::Column && h.qualified_names[1] == "total")
        );

        let hints = completer.complete("SELECT v_", 9, &[]).unwrap();
        assert_eq!(CompletionHintKind::View, hints[0].kind);

        let hints = completer
            .complete("SELECT * FROM ", 14, &["customers".to_string()])
            .unwrap();
        assert!(!hints.iter().any(|h| h.kind == CompletionHintKind::Table));
    }

    #[test]
    fn cursor_out_of_range() {
        let catalog = catalog();
        let functions = OperatorTable::builtin();
        let completer = Completer::new(&catalog, &functions, "sales");
        assert!(completer.complete("SELECT", 10, &[]).is_err());
    }
}
