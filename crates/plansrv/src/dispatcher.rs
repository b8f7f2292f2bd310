use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};

use crate::context::ExecutionContext;
use crate::errors::{InvalidParseRequest, PlanServerError, Result};
use crate::pipeline::{CompileOutput, rewrite, standard};
use crate::pool::CompilerPool;
use crate::types::{PlanResult, ProcessRequest};

/// Requests starting with this are serialized plans to rewrite rather than
/// SQL.
pub const PLAN_REWRITE_PREFIX: &str = "execute calcite";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Compile SQL text.
    Standard,
    /// Rewrite a serialized plan.
    PlanRewrite,
}

/// Pick the pipeline for a request and clean up its text.
///
/// The rewrite prefix is removed before trimming, then one trailing
/// semicolon is dropped.
pub fn normalize_request_text(text: &str) -> (Route, String) {
    let (route, text) = match text.strip_prefix(PLAN_REWRITE_PREFIX) {
        Some(rest) => (Route::PlanRewrite, rest),
        None => (Route::Standard, text),
    };
    let text = text.trim();
    let text = text.strip_suffix(';').unwrap_or(text);
    (route, text.to_string())
}

/// Routes requests to a pipeline using a pooled compiler.
#[derive(Debug)]
pub struct Dispatcher {
    pool: Arc<CompilerPool>,
    max_rewrite_iterations: usize,
}

impl Dispatcher {
    pub fn new(pool: Arc<CompilerPool>, max_rewrite_iterations: usize) -> Self {
        Dispatcher {
            pool,
            max_rewrite_iterations,
        }
    }

    /// Compile a request, classifying any failure into a coded error.
    pub fn process(&self, request: &ProcessRequest) -> Result<PlanResult, InvalidParseRequest> {
        let started = Instant::now();
        match self.dispatch(request) {
            Ok(output) => Ok(PlanResult {
                primary_accessed_objects: output.primary,
                resolved_accessed_objects: output.resolved,
                plan_result: output.plan_text,
                execution_time_ms: started.elapsed().as_millis() as u64,
            }),
            Err(e) => {
                let invalid = InvalidParseRequest::from(&e);
                error!(code = invalid.code, %e, "failed to process request");
                Err(invalid)
            }
        }
    }

    fn dispatch(&self, request: &ProcessRequest) -> Result<CompileOutput> {
        let (route, text) = normalize_request_text(&request.sql_text);
        let options = request.compile_options();

        let mut compiler = self.pool.acquire()?;
        let ctx = ExecutionContext::new(request.compilation_user());
        compiler.bind_user(ctx.user().clone());

        let outcome = ctx.span().in_scope(|| {
            debug!(?route, sql = %text, "processing request");
            let compiler = &*compiler;
            panic::catch_unwind(AssertUnwindSafe(|| match route {
                Route::Standard => {
                    standard::compile(&ctx, compiler, &text, &options, self.max_rewrite_iterations)
                }
                Route::PlanRewrite => {
                    rewrite::rewrite(&ctx, compiler, &text, &options, self.max_rewrite_iterations)
                }
            }))
        });

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                compiler.poison();
                Err(PlanServerError::Internal(format!(
                    "Compiler panicked: {}",
                    panic_message(&*payload)
                )))
            }
        };

        // Release on every path. A pipeline error takes precedence over a
        // release error.
        let released = compiler.release();
        match (outcome, released) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release)) => {
                error!(%release, "failed to return compiler after failed request");
                Err(e)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_standard_text() {
        assert_eq!(
            (Route::Standard, "SELECT * FROM orders".to_string()),
            normalize_request_text("  SELECT * FROM orders;\n")
        );
        // Only one semicolon is removed.
        assert_eq!(
            (Route::Standard, "SELECT 1;".to_string()),
            normalize_request_text("SELECT 1;;")
        );
    }

    #[test]
    fn normalize_rewrite_text() {
        assert_eq!(
            (Route::PlanRewrite, r#"{"relOp": "LogicalValues"}"#.to_string()),
            normalize_request_text(r#"execute calcite {"relOp": "LogicalValues"};"#)
        );
        // Prefix must be at the very start.
        assert_eq!(Route::Standard, normalize_request_text(" execute calcite {}").0);
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!("static", panic_message(&*payload));
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!("owned", panic_message(&*payload));
        let payload: Box<dyn Any + Send> = Box::new(3);
        assert_eq!("unknown panic", panic_message(&*payload));
    }
}
