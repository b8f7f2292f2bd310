use super::{RewriteRule, Transformed};
use crate::errors::Result;
use crate::expr::ScalarExpr;
use crate::plan::{Join, LogicalPlan, Project};

/// Which join inputs a [`JoinProjectTransposeRule`] pulls projections from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
    /// Only matches when both inputs are projections.
    Both,
}

/// Pull projections on join inputs above the join.
///
/// Inputs that may be null extended by an outer join are only pulled when
/// their projection is made up of plain column references, since computed
/// expressions would otherwise be evaluated before null extension.
#[derive(Debug, Clone, Copy)]
pub struct JoinProjectTransposeRule {
    side: JoinSide,
}

impl JoinProjectTransposeRule {
    pub fn new(side: JoinSide) -> Self {
        JoinProjectTransposeRule { side }
    }
}

/// Parts of a join input after optionally pulling up its projection.
struct Pulled {
    exprs: Vec<ScalarExpr>,
    names: Vec<String>,
    input: LogicalPlan,
}

impl Pulled {
    fn pull(plan: LogicalPlan) -> Self {
        match plan {
            LogicalPlan::Project(project) => Pulled {
                exprs: project.exprs,
                names: project.names,
                input: *project.input,
            },
            other => Pulled {
                exprs: Vec::new(),
                names: Vec::new(),
                input: other,
            },
        }
    }

    fn keep(plan: LogicalPlan) -> Result<Self> {
        let fields = plan.output_fields()?;
        Ok(Pulled {
            exprs: (0..fields.len()).map(ScalarExpr::column).collect(),
            names: fields.into_iter().map(|f| f.name).collect(),
            input: plan,
        })
    }
}

fn can_pull(plan: &LogicalPlan, null_extended: bool) -> bool {
    match plan {
        LogicalPlan::Project(project) => {
            !null_extended || project.exprs.iter().all(|e| e.as_column().is_some())
        }
        _ => false,
    }
}

impl RewriteRule for JoinProjectTransposeRule {
    fn name(&self) -> &'static str {
        match self.side {
            JoinSide::Left => "join_project_left_transpose",
            JoinSide::Right => "join_project_right_transpose",
            JoinSide::Both => "join_project_both_transpose",
        }
    }

    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>> {
        let LogicalPlan::Join(join) = plan else {
            return Ok(Transformed::No(plan));
        };

        let left_ok = can_pull(&join.left, join.join_type.generates_nulls_on_left());
        let right_ok = can_pull(&join.right, join.join_type.generates_nulls_on_right());
        let (pull_left, pull_right) = match self.side {
            JoinSide::Left => (left_ok, false),
            JoinSide::Right => (false, right_ok),
            JoinSide::Both => {
                let both = left_ok && right_ok;
                (both, both)
            }
        };
        if !pull_left && !pull_right {
            return Ok(Transformed::No(LogicalPlan::Join(join)));
        }

        let left = if pull_left {
            Pulled::pull(*join.left)
        } else {
            Pulled::keep(*join.left)?
        };
        let right = if pull_right {
            Pulled::pull(*join.right)
        } else {
            Pulled::keep(*join.right)?
        };

        // Right expressions now sit after all columns of the new left input.
        let left_width = left.input.num_columns()? as isize;
        let mut exprs = left.exprs;
        exprs.extend(right.exprs.into_iter().map(|e| e.shift(left_width)));
        let mut names = left.names;
        names.extend(right.names);

        let condition = join.condition.substitute(&exprs)?;

        Ok(Transformed::Yes(LogicalPlan::Project(Project {
            exprs,
            names,
            input: Box::new(LogicalPlan::Join(Join {
                join_type: join.join_type,
                condition,
                left: Box::new(left.input),
                right: Box::new(right.input),
            })),
        })))
    }
}
