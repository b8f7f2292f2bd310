use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlrel::Catalog;
use sqlrel::capture::IdentifierCapture;
use sqlrel::catalog::{ResolvedTableReference, TableKind};
use sqlrel::parse::{SqlDialect, parse_statement};
use tracing::trace;

use crate::errors::{PlanServerError, Result};

/// Tables a statement touches, by kind of access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessedObjects {
    pub tables_selected_from: BTreeSet<String>,
    pub tables_inserted_into: BTreeSet<String>,
    pub tables_updated_in: BTreeSet<String>,
    pub tables_deleted_from: BTreeSet<String>,
}

impl AccessedObjects {
    pub fn is_empty(&self) -> bool {
        self.tables_selected_from.is_empty()
            && self.tables_inserted_into.is_empty()
            && self.tables_updated_in.is_empty()
            && self.tables_deleted_from.is_empty()
    }

    /// Replace views in the select set with the base tables they read.
    ///
    /// Insert, update and delete targets can't be views and are copied as is.
    pub fn resolve(&self, catalog: &dyn Catalog, database: &str) -> Result<AccessedObjects> {
        Ok(AccessedObjects {
            tables_selected_from: resolve_views(catalog, database, &self.tables_selected_from)?,
            ..self.clone()
        })
    }
}

impl From<IdentifierCapture> for AccessedObjects {
    fn from(capture: IdentifierCapture) -> Self {
        AccessedObjects {
            tables_selected_from: capture.selects,
            tables_inserted_into: capture.inserts,
            tables_updated_in: capture.updates,
            tables_deleted_from: capture.deletes,
        }
    }
}

/// Resolve every view in `names` to the base tables it reads, transitively.
///
/// Names that aren't views are returned unchanged. Only objects in
/// `database` are resolved, names qualified with another database are kept
/// as written.
pub fn resolve_views(
    catalog: &dyn Catalog,
    database: &str,
    names: &BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let mut resolved = BTreeSet::new();
    let mut in_progress = Vec::new();
    for name in names {
        resolve_name(catalog, database, name, &mut in_progress, &mut resolved)?;
    }
    Ok(resolved)
}

fn resolve_name(
    catalog: &dyn Catalog,
    database: &str,
    name: &str,
    in_progress: &mut Vec<String>,
    resolved: &mut BTreeSet<String>,
) -> Result<()> {
    let Some(reference) = reference_in(database, name) else {
        resolved.insert(name.to_string());
        return Ok(());
    };

    let definition = match catalog.get_table(&reference)?.map(|t| t.kind) {
        Some(TableKind::View { definition }) => definition,
        Some(TableKind::Table) | None => {
            resolved.insert(name.to_string());
            return Ok(());
        }
    };

    let key = reference.to_string();
    if in_progress.contains(&key) {
        let mut cycle = in_progress.clone();
        cycle.push(key);
        return Err(PlanServerError::ViewCycle(cycle));
    }

    trace!(view = %key, depth = in_progress.len(), "resolving view");
    let statement = parse_statement(&definition, SqlDialect::Postgres)?;
    let capture = IdentifierCapture::from_statement(&statement);

    in_progress.push(key);
    for inner in &capture.selects {
        resolve_name(catalog, database, inner, in_progress, resolved)?;
    }
    in_progress.pop();

    Ok(())
}

/// Reference for a captured name if it lives in `database`.
fn reference_in(database: &str, name: &str) -> Option<ResolvedTableReference> {
    match name.split('.').collect::<Vec<_>>().as_slice() {
        [base] => Some(ResolvedTableReference::new(database, *base)),
        [db, base] if *db == database => Some(ResolvedTableReference::new(database, *base)),
        _ => None,
    }
}
