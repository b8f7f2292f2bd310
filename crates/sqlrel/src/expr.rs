use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, internal, validation};
use crate::types::{DataType, Field, ScalarValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    StringConcat,
}

impl BinaryOperator {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "MOD",
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::StringConcat => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Negate,
}

/// A scalar expression evaluated against the output of an input operator.
///
/// Columns are referenced by their ordinal in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalarExpr {
    Column {
        index: usize,
    },
    Literal {
        value: ScalarValue,
    },
    Binary {
        op: BinaryOperator,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<ScalarExpr>,
    },
    IsNull {
        expr: Box<ScalarExpr>,
        negated: bool,
    },
    /// `expr IS [NOT] TRUE`
    IsTrue {
        expr: Box<ScalarExpr>,
        negated: bool,
    },
    Like {
        expr: Box<ScalarExpr>,
        pattern: Box<ScalarExpr>,
        negated: bool,
    },
    /// Call to a scalar function. The return type is fixed when bound.
    Call {
        name: String,
        args: Vec<ScalarExpr>,
        return_type: DataType,
    },
}

impl ScalarExpr {
    pub fn column(index: usize) -> Self {
        ScalarExpr::Column { index }
    }

    pub fn literal(value: ScalarValue) -> Self {
        ScalarExpr::Literal { value }
    }

    pub fn boolean(b: bool) -> Self {
        ScalarExpr::literal(ScalarValue::Boolean(b))
    }

    pub fn binary(op: BinaryOperator, left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: ScalarExpr, right: ScalarExpr) -> Self {
        Self::binary(BinaryOperator::And, left, right)
    }

    pub fn is_true(expr: ScalarExpr) -> Self {
        ScalarExpr::IsTrue {
            expr: Box::new(expr),
            negated: false,
        }
    }

    /// Combine predicates with AND. Returns `None` if there are none.
    pub fn and_all(exprs: impl IntoIterator<Item = ScalarExpr>) -> Option<ScalarExpr> {
        exprs.into_iter().reduce(ScalarExpr::and)
    }

    pub fn as_column(&self) -> Option<usize> {
        match self {
            ScalarExpr::Column { index } => Some(*index),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            ScalarExpr::Literal {
                value: ScalarValue::Boolean(b),
            } => Some(*b),
            _ => None,
        }
    }

    /// Split a predicate into its top-level conjuncts.
    pub fn split_conjunction(self) -> Vec<ScalarExpr> {
        let mut out = Vec::new();
        self.split_conjunction_inner(&mut out);
        out
    }

    fn split_conjunction_inner(self, out: &mut Vec<ScalarExpr>) {
        match self {
            ScalarExpr::Binary {
                op: BinaryOperator::And,
                left,
                right,
            } => {
                left.split_conjunction_inner(out);
                right.split_conjunction_inner(out);
            }
            other => out.push(other),
        }
    }

    pub fn children(&self) -> Vec<&ScalarExpr> {
        match self {
            ScalarExpr::Column { .. } | ScalarExpr::Literal { .. } => Vec::new(),
            ScalarExpr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ScalarExpr::Unary { expr, .. }
            | ScalarExpr::IsNull { expr, .. }
            | ScalarExpr::IsTrue { expr, .. } => vec![expr.as_ref()],
            ScalarExpr::Like { expr, pattern, .. } => vec![expr.as_ref(), pattern.as_ref()],
            ScalarExpr::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut ScalarExpr> {
        match self {
            ScalarExpr::Column { .. } | ScalarExpr::Literal { .. } => Vec::new(),
            ScalarExpr::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            ScalarExpr::Unary { expr, .. }
            | ScalarExpr::IsNull { expr, .. }
            | ScalarExpr::IsTrue { expr, .. } => vec![expr.as_mut()],
            ScalarExpr::Like { expr, pattern, .. } => vec![expr.as_mut(), pattern.as_mut()],
            ScalarExpr::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    /// Rewrite the expression bottom up.
    pub fn transform_up(self, f: &mut impl FnMut(ScalarExpr) -> ScalarExpr) -> ScalarExpr {
        let mut expr = self;
        for child in expr.children_mut() {
            let owned = std::mem::replace(child, ScalarExpr::boolean(true));
            *child = owned.transform_up(f);
        }
        f(expr)
    }

    /// Collect the input columns this expression references.
    pub fn column_refs(&self, out: &mut BTreeSet<usize>) {
        match self {
            ScalarExpr::Column { index } => {
                out.insert(*index);
            }
            other => other.children().into_iter().for_each(|c| c.column_refs(out)),
        }
    }

    pub fn references(&self) -> BTreeSet<usize> {
        let mut refs = BTreeSet::new();
        self.column_refs(&mut refs);
        refs
    }

    /// Replace every column reference `$i` with `exprs[i]`.
    pub fn substitute(self, exprs: &[ScalarExpr]) -> Result<ScalarExpr> {
        let mut err = None;
        let out = self.transform_up(&mut |e| match e {
            ScalarExpr::Column { index } => match exprs.get(index) {
                Some(replacement) => replacement.clone(),
                None => {
                    err = Some(internal!("column ${index} out of range for substitution"));
                    ScalarExpr::Column { index }
                }
            },
            other => other,
        });
        match err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Remap every column reference through `f`.
    pub fn map_columns(self, f: &impl Fn(usize) -> usize) -> ScalarExpr {
        self.transform_up(&mut |e| match e {
            ScalarExpr::Column { index } => ScalarExpr::Column { index: f(index) },
            other => other,
        })
    }

    /// Shift every column reference by `offset`.
    pub fn shift(self, offset: isize) -> ScalarExpr {
        self.map_columns(&|idx| idx.saturating_add_signed(offset))
    }

    /// Compute the output type of the expression against the given input.
    pub fn datatype(&self, input: &[Field]) -> Result<DataType> {
        Ok(match self {
            ScalarExpr::Column { index } => {
                input
                    .get(*index)
                    .ok_or_else(|| internal!("column ${index} out of range"))?
                    .datatype
            }
            ScalarExpr::Literal { value } => value.datatype(),
            ScalarExpr::Binary { op, left, right } => {
                let l = left.datatype(input)?;
                let r = right.datatype(input)?;
                if op.is_comparison() {
                    if !DataType::comparable(l, r) {
                        return Err(validation!(
                            "Cannot apply '{}' to arguments of type <{l}> and <{r}>",
                            op.symbol()
                        ));
                    }
                    DataType::Boolean
                } else if op.is_logical() {
                    if !l.is_boolean_like() || !r.is_boolean_like() {
                        return Err(validation!(
                            "Cannot apply '{}' to arguments of type <{l}> and <{r}>",
                            op.symbol()
                        ));
                    }
                    DataType::Boolean
                } else if *op == BinaryOperator::StringConcat {
                    DataType::Text
                } else {
                    DataType::arithmetic_result(l, r).ok_or_else(|| {
                        validation!(
                            "Cannot apply '{}' to arguments of type <{l}> and <{r}>",
                            op.symbol()
                        )
                    })?
                }
            }
            ScalarExpr::Unary { op, expr } => {
                let t = expr.datatype(input)?;
                match op {
                    UnaryOperator::Not => DataType::Boolean,
                    UnaryOperator::Negate if t.is_numeric() || t == DataType::Any => t,
                    UnaryOperator::Negate => {
                        return Err(validation!("Cannot negate argument of type <{t}>"));
                    }
                }
            }
            ScalarExpr::IsNull { .. } | ScalarExpr::IsTrue { .. } | ScalarExpr::Like { .. } => {
                DataType::Boolean
            }
            ScalarExpr::Call { return_type, .. } => *return_type,
        })
    }

    /// Whether the output of this expression may be null.
    pub fn nullable(&self, input: &[Field]) -> bool {
        match self {
            ScalarExpr::Column { index } => input.get(*index).map(|f| f.nullable).unwrap_or(true),
            ScalarExpr::Literal { value } => *value == ScalarValue::Null,
            ScalarExpr::IsNull { .. } | ScalarExpr::IsTrue { .. } => false,
            other => other.children().into_iter().any(|c| c.nullable(input)),
        }
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Column { index } => write!(f, "${index}"),
            ScalarExpr::Literal { value } => write!(f, "{value}"),
            ScalarExpr::Binary { op, left, right } => {
                write!(f, "{}({left}, {right})", op.symbol())
            }
            ScalarExpr::Unary { op, expr } => match op {
                UnaryOperator::Not => write!(f, "NOT({expr})"),
                UnaryOperator::Negate => write!(f, "-({expr})"),
            },
            ScalarExpr::IsNull { expr, negated } => {
                let op = if *negated { "IS NOT NULL" } else { "IS NULL" };
                write!(f, "{op}({expr})")
            }
            ScalarExpr::IsTrue { expr, negated } => {
                let op = if *negated { "IS NOT TRUE" } else { "IS TRUE" };
                write!(f, "{op}({expr})")
            }
            ScalarExpr::Like {
                expr,
                pattern,
                negated,
            } => {
                let op = if *negated { "NOT LIKE" } else { "LIKE" };
                write!(f, "{op}({expr}, {pattern})")
            }
            ScalarExpr::Call { name, args, .. } => {
                write!(f, "{}(", name.to_uppercase())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(n: i64) -> ScalarExpr {
        ScalarExpr::literal(ScalarValue::Int64(n))
    }

    #[test]
    fn substitute_columns() {
        let expr = ScalarExpr::binary(BinaryOperator::Gt, ScalarExpr::column(1), lit(10));
        let replaced = expr
            .substitute(&[
                ScalarExpr::column(5),
                ScalarExpr::binary(BinaryOperator::Plus, ScalarExpr::column(2), lit(1)),
            ])
            .unwrap();
        assert_eq!(">(+($2, 1), 10)", replaced.to_string());
    }

    #[test]
    fn substitute_out_of_range() {
        let expr = ScalarExpr::column(3);
        assert!(expr.substitute(&[ScalarExpr::column(0)]).is_err());
    }

    #[test]
    fn split_and_recombine() {
        let pred = ScalarExpr::and(
            ScalarExpr::and(ScalarExpr::column(0), ScalarExpr::column(1)),
            ScalarExpr::column(2),
        );
        let parts = pred.clone().split_conjunction();
        assert_eq!(3, parts.len());
        assert_eq!(Some(pred), ScalarExpr::and_all(parts));
    }

    #[test]
    fn shift_and_refs() {
        let expr = ScalarExpr::binary(
            BinaryOperator::Eq,
            ScalarExpr::column(0),
            ScalarExpr::column(4),
        );
        let shifted = expr.shift(3);
        assert_eq!(BTreeSet::from([3, 7]), shifted.references());
    }

    #[test]
    fn comparison_type_checks() {
        let input = vec![
            Field::new("a", DataType::Integer, true),
            Field::new("b", DataType::Text, true),
        ];
        let ok = ScalarExpr::binary(BinaryOperator::Gt, ScalarExpr::column(0), lit(1));
        assert_eq!(DataType::Boolean, ok.datatype(&input).unwrap());

        let bad = ScalarExpr::binary(BinaryOperator::Gt, ScalarExpr::column(1), lit(1));
        assert!(bad.datatype(&input).is_err());
    }
}
