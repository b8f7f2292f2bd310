use super::{RewriteRule, Transformed};
use crate::errors::Result;
use crate::plan::{LogicalPlan, Project};

/// Merge a projection into the projection below it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectMergeRule;

impl RewriteRule for ProjectMergeRule {
    fn name(&self) -> &'static str {
        "project_merge"
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        let LogicalPlan::Project(top) = plan else {
            return Ok(Transformed::No(plan));
        };
        let LogicalPlan::Project(bottom) = *top.input else {
            return Ok(Transformed::No(LogicalPlan::Project(top)));
        };

        let exprs = top
            .exprs
            .into_iter()
            .map(|expr| expr.substitute(&bottom.exprs))
            .collect::<Result<Vec<_>>>()?;

        Ok(Transformed::Yes(LogicalPlan::Project(Project {
            exprs,
            names: top.names,
            input: bottom.input,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testutil::{project, scan};

    #[test]
    fn merge_keeps_top_names() {
        let plan = project(
            project(scan("t", &["a", "b", "c"]), &[2, 0], &["c", "a"]),
            &[1],
            &["renamed"],
        );
        let out = ProjectMergeRule.rewrite(plan).unwrap().into_inner();
        assert_eq!(
            "LogicalProject(renamed=[$0])\n  LogicalTableScan(table=[[db, t]])\n",
            out.explain()
        );
    }
}
