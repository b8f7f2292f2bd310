use super::{RewriteRule, Transformed};
use crate::errors::Result;
use crate::expr::ScalarExpr;
use crate::plan::{Filter, LogicalPlan};

/// Combine two stacked filters into one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterMergeRule;

impl RewriteRule for FilterMergeRule {
    fn name(&self) -> &'static str {
        "filter_merge"
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        let LogicalPlan::Filter(top) = plan else {
            return Ok(Transformed::No(plan));
        };
        let LogicalPlan::Filter(bottom) = *top.input else {
            return Ok(Transformed::No(LogicalPlan::Filter(top)));
        };

        Ok(Transformed::Yes(LogicalPlan::Filter(Filter {
            condition: ScalarExpr::and(bottom.condition, top.condition),
            input: bottom.input,
        })))
    }
}
