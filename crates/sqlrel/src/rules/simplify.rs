use crate::errors::Result;
use crate::expr::{BinaryOperator, ScalarExpr, UnaryOperator};
use crate::plan::LogicalPlan;
use crate::types::ScalarValue;

/// Fold boolean constants out of an expression.
pub fn simplify_expr(expr: ScalarExpr) -> ScalarExpr {
    expr.transform_up(&mut |e| match e {
        ScalarExpr::Binary {
            op: BinaryOperator::And,
            left,
            right,
        } => match (left.as_boolean(), right.as_boolean()) {
            (Some(false), _) | (_, Some(false)) => ScalarExpr::boolean(false),
            (Some(true), _) => *right,
            (_, Some(true)) => *left,
            _ => ScalarExpr::and(*left, *right),
        },
        ScalarExpr::Binary {
            op: BinaryOperator::Or,
            left,
            right,
        } => match (left.as_boolean(), right.as_boolean()) {
            (Some(true), _) | (_, Some(true)) => ScalarExpr::boolean(true),
            (Some(false), _) => *right,
            (_, Some(false)) => *left,
            _ => ScalarExpr::binary(BinaryOperator::Or, *left, *right),
        },
        ScalarExpr::Unary {
            op: UnaryOperator::Not,
            expr,
        } => match *expr {
            ScalarExpr::Literal {
                value: ScalarValue::Boolean(b),
            } => ScalarExpr::boolean(!b),
            ScalarExpr::Unary {
                op: UnaryOperator::Not,
                expr: inner,
            } => *inner,
            other => ScalarExpr::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(other),
            },
        },
        ScalarExpr::IsTrue { expr, negated } => match expr.as_ref() {
            ScalarExpr::Literal { value } => {
                let is_true = *value == ScalarValue::Boolean(true);
                ScalarExpr::boolean(is_true != negated)
            }
            _ => ScalarExpr::IsTrue { expr, negated },
        },
        ScalarExpr::IsNull { expr, negated } => match expr.as_ref() {
            ScalarExpr::Literal { value } => {
                let is_null = *value == ScalarValue::Null;
                ScalarExpr::boolean(is_null != negated)
            }
            _ => ScalarExpr::IsNull { expr, negated },
        },
        other => other,
    })
}

/// Simplify filter and join conditions, dropping filters that are always
/// true.
pub fn simplify_predicates(mut plan: LogicalPlan) -> Result<LogicalPlan> {
    plan.walk_mut_post(&mut |node| {
        match node {
            LogicalPlan::Filter(filter) => {
                let condition = std::mem::replace(&mut filter.condition, ScalarExpr::boolean(true));
                filter.condition = simplify_expr(condition);
                if filter.condition.as_boolean() == Some(true) {
                    let input = std::mem::replace(filter.input.as_mut(), LogicalPlan::empty());
                    *node = input;
                }
            }
            LogicalPlan::Join(join) => {
                let condition = std::mem::replace(&mut join.condition, ScalarExpr::boolean(true));
                join.condition = simplify_expr(condition);
            }
            _ => (),
        }
        Ok(())
    })?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Filter;
    use crate::rules::testutil::scan;

    #[test]
    fn fold_and_or() {
        let expr = ScalarExpr::and(ScalarExpr::boolean(true), ScalarExpr::column(0));
        assert_eq!(ScalarExpr::column(0), simplify_expr(expr));

        let expr = ScalarExpr::binary(
            BinaryOperator::Or,
            ScalarExpr::column(0),
            ScalarExpr::boolean(true),
        );
        assert_eq!(ScalarExpr::boolean(true), simplify_expr(expr));

        let expr = ScalarExpr::and(ScalarExpr::column(1), ScalarExpr::boolean(false));
        assert_eq!(ScalarExpr::boolean(false), simplify_expr(expr));
    }

    #[test]
    fn double_negation() {
        let expr = ScalarExpr::Unary {
            op: UnaryOperator::Not,
            expr: Box::new(ScalarExpr::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(ScalarExpr::column(2)),
            }),
        };
        assert_eq!(ScalarExpr::column(2), simplify_expr(expr));
    }

    #[test]
    fn drop_true_filter() {
        let plan = LogicalPlan::Filter(Filter {
            condition: ScalarExpr::and(ScalarExpr::boolean(true), ScalarExpr::boolean(true)),
            input: Box::new(scan("t", &["a"])),
        });
        assert_eq!(scan("t", &["a"]), simplify_predicates(plan).unwrap());
    }
}
