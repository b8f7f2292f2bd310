use super::{RewriteRule, Transformed};
use crate::errors::Result;
use crate::plan::{Filter, LogicalPlan, Project};

/// Push a filter below the projection it sits on.
///
/// `Filter(c, Project(e, x))` becomes `Project(e, Filter(c[e], x))` where
/// `c[e]` replaces column references in the condition with the projected
/// expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterProjectTransposeRule;

impl RewriteRule for FilterProjectTransposeRule {
    fn name(&self) -> &'static str {
        "filter_project_transpose"
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        let LogicalPlan::Filter(filter) = plan else {
            return Ok(Transformed::No(plan));
        };
        let LogicalPlan::Project(project) = *filter.input else {
            return Ok(Transformed::No(LogicalPlan::Filter(filter)));
        };

        let condition = filter.condition.substitute(&project.exprs)?;
        Ok(Transformed::Yes(LogicalPlan::Project(Project {
            exprs: project.exprs,
            names: project.names,
            input: Box::new(LogicalPlan::Filter(Filter {
                condition,
                input: project.input,
            })),
        })))
    }
}
