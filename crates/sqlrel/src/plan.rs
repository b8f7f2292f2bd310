use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::ResolvedTableReference;
use crate::errors::{Result, internal};
use crate::expr::ScalarExpr;
use crate::types::{DataType, Field, ScalarValue};

/// A logical relational plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "relOp")]
pub enum LogicalPlan {
    /// A base table scan.
    #[serde(rename = "LogicalTableScan")]
    Scan(Scan),
    /// Compute expressions from the input.
    ///
    /// "SELECT ..."
    #[serde(rename = "LogicalProject")]
    Project(Project),
    /// Evaluate a filter on all inputs.
    ///
    /// "WHERE ..."
    #[serde(rename = "LogicalFilter")]
    Filter(Filter),
    #[serde(rename = "LogicalJoin")]
    Join(Join),
    /// "GROUP BY ..."
    #[serde(rename = "LogicalAggregate")]
    Aggregate(Aggregate),
    /// "ORDER BY ... LIMIT ... OFFSET ..."
    #[serde(rename = "LogicalSort")]
    Sort(Sort),
    /// Constant rows.
    #[serde(rename = "LogicalValues")]
    Values(Values),
    /// INSERT, UPDATE or DELETE against a base table.
    #[serde(rename = "LogicalTableModify")]
    TableModify(TableModify),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub table: ResolvedTableReference,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub exprs: Vec<ScalarExpr>,
    /// Output column names, one per expression.
    pub names: Vec<String>,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub condition: ScalarExpr,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    /// Whether columns from the left input may be null extended.
    pub fn generates_nulls_on_left(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    /// Whether columns from the right input may be null extended.
    pub fn generates_nulls_on_right(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "inner",
            JoinType::Left => "left",
            JoinType::Right => "right",
            JoinType::Full => "full",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub join_type: JoinType,
    /// Condition over the concatenation of left and right columns.
    pub condition: ScalarExpr,
    pub left: Box<LogicalPlan>,
    pub right: Box<LogicalPlan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "count" => AggregateFunction::Count,
            "sum" => AggregateFunction::Sum,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            "avg" => AggregateFunction::Avg,
            _ => return None,
        })
    }

    pub fn return_type(&self, arg: Option<DataType>) -> DataType {
        match self {
            AggregateFunction::Count => DataType::BigInt,
            AggregateFunction::Avg => DataType::Double,
            AggregateFunction::Sum => match arg {
                Some(t) if t.is_integer() => DataType::BigInt,
                Some(DataType::Any) => DataType::Any,
                _ => DataType::Double,
            },
            AggregateFunction::Min | AggregateFunction::Max => arg.unwrap_or(DataType::Any),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Avg => "AVG",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    /// Input column ordinals.
    pub args: Vec<usize>,
    pub distinct: bool,
    pub name: String,
    pub return_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Input columns to group on. Output starts with these columns.
    pub group_keys: Vec<usize>,
    /// Aggregates, output after the group keys.
    pub aggregates: Vec<AggregateCall>,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub index: usize,
    pub descending: bool,
    pub nulls_first: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub keys: Vec<SortKey>,
    pub offset: Option<u64>,
    pub fetch: Option<u64>,
    pub input: Box<LogicalPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Values {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<ScalarValue>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModifyOperation {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableModify {
    pub table: ResolvedTableReference,
    pub operation: ModifyOperation,
    /// Columns assigned by an UPDATE, in the order of the trailing input
    /// columns holding the new values.
    #[serde(default)]
    pub update_columns: Vec<String>,
    pub input: Box<LogicalPlan>,
}

impl LogicalPlan {
    /// Compute the output fields of this operator.
    pub fn output_fields(&self) -> Result<Vec<Field>> {
        Ok(match self {
            LogicalPlan::Scan(scan) => scan.fields.clone(),
            LogicalPlan::Project(project) => {
                let input = project.input.output_fields()?;
                if project.names.len() != project.exprs.len() {
                    return Err(internal!(
                        "project has {} names for {} expressions",
                        project.names.len(),
                        project.exprs.len()
                    ));
                }
                project
                    .exprs
                    .iter()
                    .zip(project.names.iter())
                    .map(|(expr, name)| {
                        Ok(Field::new(
                            name.clone(),
                            expr.datatype(&input)?,
                            expr.nullable(&input),
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            LogicalPlan::Filter(filter) => filter.input.output_fields()?,
            LogicalPlan::Sort(sort) => sort.input.output_fields()?,
            LogicalPlan::Join(join) => {
                let mut left = join.left.output_fields()?;
                let mut right = join.right.output_fields()?;
                if join.join_type.generates_nulls_on_left() {
                    left.iter_mut().for_each(|f| f.nullable = true);
                }
                if join.join_type.generates_nulls_on_right() {
                    right.iter_mut().for_each(|f| f.nullable = true);
                }
                left.append(&mut right);
                left
            }
            LogicalPlan::Aggregate(agg) => {
                let input = agg.input.output_fields()?;
                let mut fields = Vec::with_capacity(agg.group_keys.len() + agg.aggregates.len());
                for key in &agg.group_keys {
                    let field = input
                        .get(*key)
                        .ok_or_else(|| internal!("group key ${key} out of range"))?;
                    fields.push(field.clone());
                }
                for call in &agg.aggregates {
                    let nullable = call.function != AggregateFunction::Count;
                    fields.push(Field::new(call.name.clone(), call.return_type, nullable));
                }
                fields
            }
            LogicalPlan::Values(values) => values.fields.clone(),
            LogicalPlan::TableModify(_) => vec![Field::new("ROWCOUNT", DataType::BigInt, false)],
        })
    }

    /// A plan producing no columns and no rows.
    pub fn empty() -> Self {
        LogicalPlan::Values(Values {
            fields: Vec::new(),
            rows: Vec::new(),
        })
    }

    /// Replace every child with the result of `f`.
    pub fn map_children(
        mut self,
        f: &mut impl FnMut(LogicalPlan) -> Result<LogicalPlan>,
    ) -> Result<LogicalPlan> {
        for child in self.children_mut() {
            let owned = std::mem::replace(child, LogicalPlan::empty());
            *child = f(owned)?;
        }
        Ok(self)
    }

    pub fn num_columns(&self) -> Result<usize> {
        Ok(self.output_fields()?.len())
    }

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan(_) | LogicalPlan::Values(_) => Vec::new(),
            LogicalPlan::Project(p) => vec![p.input.as_ref()],
            LogicalPlan::Filter(p) => vec![p.input.as_ref()],
            LogicalPlan::Aggregate(p) => vec![p.input.as_ref()],
            LogicalPlan::Sort(p) => vec![p.input.as_ref()],
            LogicalPlan::TableModify(p) => vec![p.input.as_ref()],
            LogicalPlan::Join(p) => vec![p.left.as_ref(), p.right.as_ref()],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut LogicalPlan> {
        match self {
            LogicalPlan::Scan(_) | LogicalPlan::Values(_) => Vec::new(),
            LogicalPlan::Project(p) => vec![p.input.as_mut()],
            LogicalPlan::Filter(p) => vec![p.input.as_mut()],
            LogicalPlan::Aggregate(p) => vec![p.input.as_mut()],
            LogicalPlan::Sort(p) => vec![p.input.as_mut()],
            LogicalPlan::TableModify(p) => vec![p.input.as_mut()],
            LogicalPlan::Join(p) => vec![p.left.as_mut(), p.right.as_mut()],
        }
    }

    /// Walk the plan, calling `f` on every node before its children.
    pub fn walk(&self, f: &mut impl FnMut(&LogicalPlan)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Walk the plan mutably, visiting children before their parent.
    pub fn walk_mut_post(
        &mut self,
        f: &mut impl FnMut(&mut LogicalPlan) -> Result<()>,
    ) -> Result<()> {
        for child in self.children_mut() {
            child.walk_mut_post(f)?;
        }
        f(self)
    }

    /// All base tables scanned by this plan.
    pub fn scanned_tables(&self) -> Vec<ResolvedTableReference> {
        let mut tables = Vec::new();
        self.walk(&mut |plan| {
            if let LogicalPlan::Scan(scan) = plan {
                tables.push(scan.table.clone());
            }
        });
        tables
    }

    /// Format the plan as an indented operator tree.
    pub fn explain(&self) -> String {
        let mut buf = String::new();
        self.explain_indent(&mut buf, 0);
        buf
    }

    fn explain_indent(&self, buf: &mut String, depth: usize) {
        for _ in 0..depth {
            buf.push_str("  ");
        }
        buf.push_str(&self.explain_node());
        buf.push('\n');
        for child in self.children() {
            child.explain_indent(buf, depth + 1);
        }
    }

    fn explain_node(&self) -> String {
        match self {
            LogicalPlan::Scan(scan) => format!(
                "LogicalTableScan(table=[[{}, {}]])",
                scan.table.database, scan.table.base
            ),
            LogicalPlan::Project(project) => {
                let items: Vec<_> = project
                    .names
                    .iter()
                    .zip(project.exprs.iter())
                    .map(|(name, expr)| format!("{name}=[{expr}]"))
                    .collect();
                format!("LogicalProject({})", items.join(", "))
            }
            LogicalPlan::Filter(filter) => {
                format!("LogicalFilter(condition=[{}])", filter.condition)
            }
            LogicalPlan::Join(join) => format!(
                "LogicalJoin(condition=[{}], joinType=[{}])",
                join.condition, join.join_type
            ),
            LogicalPlan::Aggregate(agg) => {
                let keys: Vec<_> = agg.group_keys.iter().map(|k| k.to_string()).collect();
                let mut s = format!("LogicalAggregate(group=[{{{}}}]", keys.join(", "));
                for call in &agg.aggregates {
                    let args: Vec<_> = call.args.iter().map(|a| format!("${a}")).collect();
                    let distinct = if call.distinct { "DISTINCT " } else { "" };
                    s.push_str(&format!(
                        ", {}=[{}({distinct}{})]",
                        call.name,
                        call.function,
                        args.join(", ")
                    ));
                }
                s.push(')');
                s
            }
            LogicalPlan::Sort(sort) => {
                let mut parts = Vec::new();
                for (i, key) in sort.keys.iter().enumerate() {
                    parts.push(format!("sort{i}=[${}]", key.index));
                    let dir = if key.descending { "DESC" } else { "ASC" };
                    parts.push(format!("dir{i}=[{dir}]"));
                }
                if let Some(offset) = sort.offset {
                    parts.push(format!("offset=[{offset}]"));
                }
                if let Some(fetch) = sort.fetch {
                    parts.push(format!("fetch=[{fetch}]"));
                }
                format!("LogicalSort({})", parts.join(", "))
            }
            LogicalPlan::Values(values) => {
                let rows: Vec<_> = values
                    .rows
                    .iter()
                    .map(|row| {
                        let vals: Vec<_> = row.iter().map(|v| v.to_string()).collect();
                        format!("{{ {} }}", vals.join(", "))
                    })
                    .collect();
                format!("LogicalValues(tuples=[[{}]])", rows.join(", "))
            }
            LogicalPlan::TableModify(modify) => {
                let mut s = format!(
                    "LogicalTableModify(table=[[{}, {}]], operation=[{:?}]",
                    modify.table.database, modify.table.base, modify.operation
                );
                if !modify.update_columns.is_empty() {
                    s.push_str(&format!(
                        ", updateColumnList=[[{}]]",
                        modify.update_columns.join(", ")
                    ));
                }
                s.push(')');
                s
            }
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.explain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOperator;

    fn orders_scan() -> LogicalPlan {
        LogicalPlan::Scan(Scan {
            table: ResolvedTableReference::new("sales", "orders"),
            fields: vec![
                Field::new("id", DataType::BigInt, false),
                Field::new("total", DataType::Double, true),
            ],
        })
    }

    #[test]
    fn explain_tree() {
        let plan = LogicalPlan::Project(Project {
            exprs: vec![ScalarExpr::column(0)],
            names: vec!["id".to_string()],
            input: Box::new(LogicalPlan::Filter(Filter {
                condition: ScalarExpr::binary(
                    BinaryOperator::Gt,
                    ScalarExpr::column(1),
                    ScalarExpr::literal(ScalarValue::Int64(100)),
                ),
                input: Box::new(orders_scan()),
            })),
        });

        let expected = "\
LogicalProject(id=[$0])
  LogicalFilter(condition=[>($1, 100)])
    LogicalTableScan(table=[[sales, orders]])
";
        assert_eq!(expected, plan.explain());
    }

    #[test]
    fn join_output_nullability() {
        let join = LogicalPlan::Join(Join {
            join_type: JoinType::Left,
            condition: ScalarExpr::boolean(true),
            left: Box::new(orders_scan()),
            right: Box::new(orders_scan()),
        });
        let fields = join.output_fields().unwrap();
        assert_eq!(4, fields.len());
        assert!(!fields[0].nullable);
        assert!(fields[2].nullable);
    }

    #[test]
    fn json_tagging() {
        let json = serde_json::to_value(orders_scan()).unwrap();
        assert_eq!("LogicalTableScan", json["relOp"]);
        assert_eq!("orders", json["table"]["base"]);
    }
}
