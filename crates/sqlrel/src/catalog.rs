use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlparser::ast;

use crate::types::{DataType, Field};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid table reference: {0}")]
    InvalidTableReference(String),
    #[error("Object '{0}' not found")]
    MissingTable(String),
    #[error("failed to load catalog: {0}")]
    Load(String),
}

/// Normalize an identifier the way unquoted SQL identifiers are folded.
///
/// Quoted identifiers keep their case.
pub fn normalize_ident(ident: &ast::Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

/// Normalize a possibly qualified object name into a dotted string.
pub fn normalize_object_name(name: &ast::ObjectName) -> String {
    name.0
        .iter()
        .map(normalize_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// A fully resolved table reference.
#[derive(Debug, Hash, PartialEq, Eq, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedTableReference {
    pub database: String,
    pub base: String,
}

impl ResolvedTableReference {
    pub fn new(database: impl Into<String>, base: impl Into<String>) -> Self {
        ResolvedTableReference {
            database: database.into(),
            base: base.into(),
        }
    }
}

impl fmt::Display for ResolvedTableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.base)
    }
}

/// Reference to a table as written in a statement.
#[derive(Debug, Hash, PartialEq, Eq, Clone)]
pub enum TableReference {
    /// Only the base name of the table.
    ///
    /// "table"
    Unqualified { base: String },
    /// A table name qualified with its database.
    ///
    /// "database.table"
    Qualified { database: String, base: String },
}

impl TableReference {
    pub fn base(&self) -> &str {
        match self {
            Self::Unqualified { base } | Self::Qualified { base, .. } => base,
        }
    }

    pub fn resolve_with_default(self, database: &str) -> ResolvedTableReference {
        match self {
            Self::Unqualified { base } => ResolvedTableReference {
                database: database.to_string(),
                base,
            },
            Self::Qualified { database, base } => ResolvedTableReference { database, base },
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unqualified { base } => write!(f, "{}", base),
            Self::Qualified { database, base } => write!(f, "{}.{}", database, base),
        }
    }
}

impl TryFrom<&ast::ObjectName> for TableReference {
    type Error = CatalogError;

    fn try_from(value: &ast::ObjectName) -> Result<Self, Self::Error> {
        match value.0.as_slice() {
            [base] => Ok(TableReference::Unqualified {
                base: normalize_ident(base),
            }),
            [database, base] => Ok(TableReference::Qualified {
                database: normalize_ident(database),
                base: normalize_ident(base),
            }),
            _ => Err(CatalogError::InvalidTableReference(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub datatype: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        ColumnDef {
            name: name.into(),
            datatype,
            nullable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableKind {
    Table,
    /// A stored query. Columns are derived from the definition when the view
    /// is expanded.
    View { definition: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(flatten)]
    pub kind: TableKind,
}

impl TableDef {
    pub fn table(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        TableDef {
            name: name.into(),
            columns,
            kind: TableKind::Table,
        }
    }

    pub fn view(name: impl Into<String>, definition: impl Into<String>) -> Self {
        TableDef {
            name: name.into(),
            columns: Vec::new(),
            kind: TableKind::View {
                definition: definition.into(),
            },
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self.kind, TableKind::View { .. })
    }

    pub fn fields(&self) -> Vec<Field> {
        self.columns
            .iter()
            .map(|c| Field::new(&c.name, c.datatype, c.nullable))
            .collect()
    }
}

pub trait Catalog {
    /// Look up a table or view. Returns `None` if it doesn't exist.
    fn get_table(&self, tbl: &ResolvedTableReference) -> Result<Option<TableDef>, CatalogError>;

    /// List every table and view in a database.
    fn list_tables(&self, database: &str) -> Result<Vec<TableDef>, CatalogError>;

    /// Drop any cached knowledge of a table.
    fn invalidate(&self, _tbl: &ResolvedTableReference) {}
}

/// Get a table, erroring if it doesn't exist.
pub fn require_table(
    catalog: &dyn Catalog,
    tbl: &ResolvedTableReference,
) -> Result<TableDef, CatalogError> {
    catalog
        .get_table(tbl)?
        .ok_or_else(|| CatalogError::MissingTable(tbl.to_string()))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    databases: HashMap<String, Vec<TableDef>>,
}

/// A catalog held entirely in memory.
///
/// Names are stored as given. Unquoted identifiers arrive lowercased, so
/// definitions should use lowercase names unless they are meant to be quoted.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    databases: RwLock<HashMap<String, HashMap<String, TableDef>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog from a JSON document of the form
    /// `{"databases": {"<db>": [<table>, ...]}}`.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError::Load(e.to_string()))?;
        let catalog = MemoryCatalog::new();
        for (database, tables) in file.databases {
            for table in tables {
                catalog.insert(&database, table);
            }
        }
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Insert or replace a table definition.
    pub fn insert(&self, database: &str, table: TableDef) {
        self.databases
            .write()
            .entry(database.to_string())
            .or_default()
            .insert(table.name.clone(), table);
    }

    pub fn remove(&self, tbl: &ResolvedTableReference) -> Option<TableDef> {
        self.databases
            .write()
            .get_mut(&tbl.database)
            .and_then(|tables| tables.remove(&tbl.base))
    }
}

impl Catalog for MemoryCatalog {
    fn get_table(&self, tbl: &ResolvedTableReference) -> Result<Option<TableDef>, CatalogError> {
        Ok(self
            .databases
            .read()
            .get(&tbl.database)
            .and_then(|tables| tables.get(&tbl.base))
            .cloned())
    }

    fn list_tables(&self, database: &str) -> Result<Vec<TableDef>, CatalogError> {
        let mut tables: Vec<_> = self
            .databases
            .read()
            .get(database)
            .map(|tables| tables.values().cloned().collect())
            .unwrap_or_default();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_reference_from_object_name() {
        let name = ast::ObjectName(vec![ast::Ident::new("Orders")]);
        let tbl = TableReference::try_from(&name).unwrap();
        assert_eq!(
            TableReference::Unqualified {
                base: "orders".to_string()
            },
            tbl
        );
        assert_eq!(
            ResolvedTableReference::new("sales", "orders"),
            tbl.resolve_with_default("sales")
        );

        let quoted = ast::ObjectName(vec![
            ast::Ident::new("db"),
            ast::Ident::with_quote('"', "Orders"),
        ]);
        let tbl = TableReference::try_from(&quoted).unwrap();
        assert_eq!("db.Orders", tbl.to_string());

        let too_long = ast::ObjectName(vec![
            ast::Ident::new("a"),
            ast::Ident::new("b"),
            ast::Ident::new("c"),
        ]);
        assert!(TableReference::try_from(&too_long).is_err());
    }

    #[test]
    fn memory_catalog_from_json() {
        let json = r#"{
            "databases": {
                "sales": [
                    {"name": "orders", "kind": "table", "columns": [
                        {"name": "id", "type": "BIGINT", "nullable": false},
                        {"name": "total", "type": "DOUBLE"}
                    ]},
                    {"name": "v_orders", "kind": "view", "definition": "SELECT id FROM orders"}
                ]
            }
        }"#;
        let catalog = MemoryCatalog::from_json(json).unwrap();

        let orders = catalog
            .get_table(&ResolvedTableReference::new("sales", "orders"))
            .unwrap()
            .unwrap();
        assert_eq!(2, orders.columns.len());
        assert!(!orders.columns[0].nullable);
        assert!(orders.columns[1].nullable);

        let view = require_table(&catalog, &ResolvedTableReference::new("sales", "v_orders"))
            .unwrap();
        assert!(view.is_view());

        let missing = require_table(&catalog, &ResolvedTableReference::new("sales", "nope"));
        assert!(matches!(missing, Err(CatalogError::MissingTable(_))));

        let names: Vec<_> = catalog
            .list_tables("sales")
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(vec!["orders", "v_orders"], names);
    }
}
