use sqlrel::json::plan_to_json;
use sqlrel::rules::{RuleProgram, remove_is_true};
use tracing::debug;

use super::CompileOutput;
use super::rewrite::run_to_fixpoint;
use crate::access::AccessedObjects;
use crate::compiler::CompilerInstance;
use crate::context::ExecutionContext;
use crate::errors::Result;
use crate::types::CompileOptions;

/// Parse, validate and plan a statement.
///
/// Returns the serialized plan along with the objects the statement names,
/// both as written and with views resolved to base tables.
pub fn compile(
    ctx: &ExecutionContext,
    compiler: &CompilerInstance,
    sql: &str,
    options: &CompileOptions,
    max_rewrite_iterations: usize,
) -> Result<CompileOutput> {
    let statement = compiler.parse(sql, options)?;
    let (plan, capture) = compiler.plan(&statement)?;

    let plan = compiler.apply_query_optimization(plan)?;
    let plan = compiler.apply_filter_pushdown(plan, &options.pushdown_hints)?;
    let plan = if options.is_view_optimize {
        let (plan, iterations) =
            run_to_fixpoint(&RuleProgram::view_simplification(), plan, max_rewrite_iterations)?;
        debug!(iterations, "view optimization converged");
        plan
    } else {
        plan
    };
    let plan = remove_is_true(plan)?;

    let plan_text = if options.is_explain {
        plan.explain()
    } else {
        plan_to_json(&plan)?
    };

    let primary = AccessedObjects::from(capture);
    let resolved = compiler.resolve_access(&primary)?;
    debug!(
        call_id = %ctx.call_id(),
        selects = primary.tables_selected_from.len(),
        resolved_selects = resolved.tables_selected_from.len(),
        "compiled statement"
    );

    Ok(CompileOutput {
        plan_text,
        primary,
        resolved,
    })
}
