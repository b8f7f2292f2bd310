use sqlrel::LogicalPlan;
use sqlrel::json::plan_to_json;
use sqlrel::rules::{RuleProgram, remove_is_true};
use tracing::{debug, trace};

use super::CompileOutput;
use crate::compiler::CompilerInstance;
use crate::context::ExecutionContext;
use crate::errors::{PlanServerError, Result};
use crate::types::CompileOptions;

/// Apply `program` until the plan stops changing.
///
/// Returns the final plan and the number of passes run. A plan that is
/// already at its fixpoint takes exactly one pass.
pub fn run_to_fixpoint(
    program: &RuleProgram,
    plan: LogicalPlan,
    max_iterations: usize,
) -> Result<(LogicalPlan, usize)> {
    let mut current = plan;
    for iteration in 1..=max_iterations {
        let next = program.apply(current.clone())?;
        if next == current {
            return Ok((next, iteration));
        }
        trace!(iteration, "plan changed");
        current = next;
    }
    Err(PlanServerError::RewriteNonConvergence {
        iterations: max_iterations,
    })
}

/// Rewrite a serialized plan.
///
/// The plan is read back against the catalog, run through the same
/// optimization and push down passes as a freshly compiled statement, then
/// through the view simplification rules until it converges.
pub fn rewrite(
    ctx: &ExecutionContext,
    compiler: &CompilerInstance,
    payload: &str,
    options: &CompileOptions,
    max_iterations: usize,
) -> Result<CompileOutput> {
    let plan = compiler.read_plan(payload)?;
    let plan = compiler.apply_query_optimization(plan)?;
    let plan = compiler.apply_filter_pushdown(plan, &options.pushdown_hints)?;

    let program = RuleProgram::view_simplification();
    let (plan, iterations) = run_to_fixpoint(&program, plan, max_iterations)?;
    debug!(call_id = %ctx.call_id(), iterations, "plan rewrite converged");

    let plan = remove_is_true(plan)?;
    Ok(CompileOutput {
        plan_text: plan_to_json(&plan)?,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use sqlrel::catalog::ResolvedTableReference;
    use sqlrel::expr::ScalarExpr;
    use sqlrel::plan::{Filter, Project, Scan};
    use sqlrel::rules::{RewriteRule, Transformed};
    use sqlrel::types::{DataType, Field, ScalarValue};

    use super::*;

    fn scan() -> LogicalPlan {
        LogicalPlan::Scan(Scan {
            table: ResolvedTableReference::new("db", "t"),
            fields: vec![
                Field::new("a", DataType::Integer, true),
                Field::new("b", DataType::Boolean, true),
            ],
        })
    }

    fn project(input: LogicalPlan) -> LogicalPlan {
        LogicalPlan::Project(Project {
            exprs: vec![ScalarExpr::column(1), ScalarExpr::column(0)],
            names: vec!["b".to_string(), "a".to_string()],
            input: Box::new(input),
        })
    }

    #[test]
    fn fixpoint_plan_takes_one_iteration() {
        let (plan, iterations) =
            run_to_fixpoint(&RuleProgram::view_simplification(), scan(), 64).unwrap();
        assert_eq!(1, iterations);
        assert_eq!(scan(), plan);
    }

    #[test]
    fn nested_projects_converge() {
        let plan = LogicalPlan::Filter(Filter {
            condition: ScalarExpr::column(0),
            input: Box::new(project(project(scan()))),
        });
        let (plan, iterations) =
            run_to_fixpoint(&RuleProgram::view_simplification(), plan, 64).unwrap();
        assert!(iterations >= 2);
        // Running again changes nothing.
        let (again, one) =
            run_to_fixpoint(&RuleProgram::view_simplification(), plan.clone(), 64).unwrap();
        assert_eq!(1, one);
        assert_eq!(plan, again);
    }

    /// Wraps every plan in another filter, so never converges.
    #[derive(Debug)]
    struct AlwaysGrow;

    impl RewriteRule for AlwaysGrow {
        fn name(&self) -> &'static str {
            "always_grow"
        }

        fn rewrite(&self, plan: LogicalPlan) -> sqlrel::errors::Result<Transformed<LogicalPlan>> {
            if matches!(plan, LogicalPlan::Scan(_)) {
                return Ok(Transformed::No(plan));
            }
            Ok(Transformed::Yes(LogicalPlan::Filter(Filter {
                condition: ScalarExpr::literal(ScalarValue::Boolean(true)),
                input: Box::new(plan),
            })))
        }
    }

    #[test]
    fn non_convergence_is_an_error() {
        let program = RuleProgram::new(vec![Box::new(AlwaysGrow)]);
        let plan = project(scan());
        let err = run_to_fixpoint(&program, plan, 5).unwrap_err();
        assert!(matches!(
            err,
            PlanServerError::RewriteNonConvergence { iterations: 5 }
        ));
        assert_eq!(-4, err.code());
    }
}
