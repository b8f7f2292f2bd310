use crate::catalog::{Catalog, require_table};
use crate::errors::{Result, validation};
use crate::plan::LogicalPlan;

/// Serialize a plan to its JSON form.
pub fn plan_to_json(plan: &LogicalPlan) -> Result<String> {
    Ok(serde_json::to_string(plan)?)
}

pub fn plan_to_json_pretty(plan: &LogicalPlan) -> Result<String> {
    Ok(serde_json::to_string_pretty(plan)?)
}

/// Reads serialized plans back, checking every scanned table against the
/// catalog.
pub struct PlanReader<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> PlanReader<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        PlanReader { catalog }
    }

    pub fn read(&self, json: &str) -> Result<LogicalPlan> {
        let mut plan: LogicalPlan = serde_json::from_str(json)?;

        plan.walk_mut_post(&mut |node| {
            if let LogicalPlan::Scan(scan) = node {
                let def = require_table(self.catalog, &scan.table)?;
                if def.is_view() {
                    return Err(validation!(
                        "Serialized plan scans view '{}' directly",
                        scan.table
                    ));
                }
                let fields = def.fields();
                let same_columns = fields.len() == scan.fields.len()
                    && fields
                        .iter()
                        .zip(scan.fields.iter())
                        .all(|(a, b)| a.name == b.name);
                if !same_columns {
                    return Err(validation!(
                        "Columns of table '{}' changed since the plan was serialized",
                        scan.table
                    ));
                }
                // The catalog is authoritative for types and nullability.
                scan.fields = fields;
            }
            Ok(())
        })?;

        plan.output_fields()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, MemoryCatalog, ResolvedTableReference, TableDef};
    use crate::expr::ScalarExpr;
    use crate::plan::{Filter, Scan};
    use crate::types::{DataType, Field};

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.insert(
            "db",
            TableDef::table(
                "t",
                vec![
                    ColumnDef::new("a", DataType::BigInt),
                    ColumnDef::new("b", DataType::Boolean),
                ],
            ),
        );
        catalog
    }

    fn plan(fields: Vec<Field>) -> LogicalPlan {
        LogicalPlan::Filter(Filter {
            condition: ScalarExpr::column(1),
            input: Box::new(LogicalPlan::Scan(Scan {
                table: ResolvedTableReference::new("db", "t"),
                fields,
            })),
        })
    }

    #[test]
    fn read_back() {
        let catalog = catalog();
        let original = plan(vec![
            Field::new("a", DataType::BigInt, true),
            Field::new("b", DataType::Boolean, true),
        ]);
        let json = plan_to_json(&original).unwrap();
        let read = PlanReader::new(&catalog).read(&json).unwrap();
        assert_eq!(original, read);
    }

    #[test]
    fn stale_columns() {
        let catalog = catalog();
        let stale = plan(vec![Field::new("a", DataType::BigInt, true)]);
        let json = plan_to_json(&stale).unwrap();
        let err = PlanReader::new(&catalog).read(&json).unwrap_err();
        assert!(err.is_validation(), "{err}");
    }

    #[test]
    fn garbage() {
        let catalog = catalog();
        let err = PlanReader::new(&catalog).read("{\"relOp\": \"Nope\"}").unwrap_err();
        assert!(matches!(err, crate::errors::SqlRelError::Json(_)));
    }
}
