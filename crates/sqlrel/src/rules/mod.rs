//! Plan rewrites.
//!
//! Local rules implement [`RewriteRule`] and are applied by a [`RuleProgram`].
//! Whole-plan passes are plain functions.

mod filter_merge;
mod filter_project;
mod filter_pushdown;
mod is_true;
mod join_project;
mod project_merge;
mod project_remove;
mod simplify;

pub use filter_merge::FilterMergeRule;
pub use filter_project::FilterProjectTransposeRule;
pub use filter_pushdown::{FilterPushDownHint, push_down_filters};
pub use is_true::remove_is_true;
pub use join_project::{JoinProjectTransposeRule, JoinSide};
pub use project_merge::ProjectMergeRule;
pub use project_remove::ProjectRemoveRule;
pub use simplify::{simplify_expr, simplify_predicates};

use std::fmt;

use tracing::trace;

use crate::errors::Result;
use crate::plan::LogicalPlan;

/// Result of trying to apply a rule to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed<T> {
    Yes(T),
    No(T),
}

impl<T> Transformed<T> {
    pub fn into_inner(self) -> T {
        match self {
            Transformed::Yes(t) | Transformed::No(t) => t,
        }
    }

    pub fn is_transformed(&self) -> bool {
        matches!(self, Transformed::Yes(_))
    }
}

/// A rule matching on a single operator and its direct inputs.
pub trait RewriteRule: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Rewrite the node if the rule matches, otherwise hand it back unchanged.
    fn rewrite(&self, plan: LogicalPlan) -> Result<Transformed<LogicalPlan>>;
}

/// An ordered collection of rules applied in a single bottom-up pass.
///
/// Every node is visited once, after its inputs. Each rule is tried once per
/// node, in order, against whatever the previous rules produced.
#[derive(Debug)]
pub struct RuleProgram {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleProgram {
    pub fn new(rules: Vec<Box<dyn RewriteRule>>) -> Self {
        RuleProgram { rules }
    }

    /// Rules used to flatten projections and filters around joins.
    pub fn view_simplification() -> Self {
        RuleProgram::new(vec![
            Box::new(FilterProjectTransposeRule),
            Box::new(ProjectMergeRule),
            Box::new(ProjectRemoveRule),
            Box::new(FilterMergeRule),
            Box::new(JoinProjectTransposeRule::new(JoinSide::Left)),
            Box::new(JoinProjectTransposeRule::new(JoinSide::Right)),
            Box::new(JoinProjectTransposeRule::new(JoinSide::Both)),
        ])
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run one pass over the plan.
    pub fn apply(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let plan = plan.map_children(&mut |child| self.apply(child))?;
        self.apply_rules(plan)
    }

    fn apply_rules(&self, mut plan: LogicalPlan) -> Result<LogicalPlan> {
        for rule in &self.rules {
            plan = match rule.rewrite(plan)? {
                Transformed::Yes(plan) => {
                    trace!(rule = rule.name(), "rule fired");
                    plan
                }
                Transformed::No(plan) => plan,
            };
        }
        Ok(plan)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::catalog::ResolvedTableReference;
    use crate::expr::ScalarExpr;
    use crate::plan::{LogicalPlan, Project, Scan};
    use crate::types::{DataType, Field};

    pub fn scan(name: &str, cols: &[&str]) -> LogicalPlan {
        LogicalPlan::Scan(Scan {
            table: ResolvedTableReference::new("db", name),
            fields: cols
                .iter()
                .map(|c| Field::new(*c, DataType::BigInt, true))
                .collect(),
        })
    }

    pub fn project(input: LogicalPlan, cols: &[usize], names: &[&str]) -> LogicalPlan {
        LogicalPlan::Project(Project {
            exprs: cols.iter().map(|c| ScalarExpr::column(*c)).collect(),
            names: names.iter().map(|n| n.to_string()).collect(),
            input: Box::new(input),
        })
    }
}
