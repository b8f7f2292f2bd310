use super::{RewriteRule, Transformed};
use crate::errors::Result;
use crate::plan::LogicalPlan;

/// Remove projections that return their input unchanged.
///
/// A projection that renames columns is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectRemoveRule;

impl RewriteRule for ProjectRemoveRule {
    fn name(&self) -> &'static str {
        "project_remove"
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        let LogicalPlan::Project(project) = plan else {
            return Ok(Transformed::No(plan));
        };

        let input_fields = project.input.output_fields()?;
        let trivial = project.exprs.len() == input_fields.len()
            && project
                .exprs
                .iter()
                .enumerate()
                .all(|(idx, expr)| expr.as_column() == Some(idx))
            && project
                .names
                .iter()
                .zip(input_fields.iter())
                .all(|(name, field)| name == &field.name);

        if trivial {
            Ok(Transformed::Yes(*project.input))
        } else {
            Ok(Transformed::No(LogicalPlan::Project(project)))
        }
    }
}
