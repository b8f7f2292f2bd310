use crate::errors::Result;
use crate::expr::{BinaryOperator, ScalarExpr};
use crate::plan::LogicalPlan;

/// Replace `x IS TRUE` with `x` where the two are equivalent.
///
/// Only positions reached through AND and OR from the root of a filter or
/// join condition are rewritten. In those positions a null result rejects
/// the row just like false does.
pub fn remove_is_true(mut plan: LogicalPlan) -> Result<LogicalPlan> {
    plan.walk_mut_post(&mut |node| {
        let condition = match node {
            LogicalPlan::Filter(filter) => &mut filter.condition,
            LogicalPlan::Join(join) => &mut join.condition,
            _ => return Ok(()),
        };
        let owned = std::mem::replace(condition, ScalarExpr::boolean(true));
        *condition = strip(owned);
        Ok(())
    })?;
    Ok(plan)
}

fn strip(expr: ScalarExpr) -> ScalarExpr {
    match expr {
        ScalarExpr::Binary { op, left, right }
            if matches!(op, BinaryOperator::And | BinaryOperator::Or) =>
        {
            ScalarExpr::binary(op, strip(*left), strip(*right))
        }
        ScalarExpr::IsTrue {
            expr,
            negated: false,
        } => strip(*expr),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::UnaryOperator;
    use crate::plan::Filter;
    use crate::rules::testutil::scan;

    fn filter(condition: ScalarExpr) -> LogicalPlan {
        LogicalPlan::Filter(Filter {
            condition,
            input: Box::new(scan("t", &["a", "b"])),
        })
    }

    #[test]
    fn strip_conjunction() {
        let plan = filter(ScalarExpr::and(
            ScalarExpr::is_true(ScalarExpr::column(0)),
            ScalarExpr::is_true(ScalarExpr::column(1)),
        ));
        let out = remove_is_true(plan).unwrap();
        assert_eq!(
            filter(ScalarExpr::and(ScalarExpr::column(0), ScalarExpr::column(1))),
            out
        );
    }

    #[test]
    fn keep_under_not() {
        let negated = ScalarExpr::Unary {
            op: UnaryOperator::Not,
            expr: Box::new(ScalarExpr::is_true(ScalarExpr::column(0))),
        };
        let plan = filter(negated.clone());
        assert_eq!(filter(negated), remove_is_true(plan).unwrap());
    }
}
