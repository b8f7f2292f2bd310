use std::backtrace::Backtrace;
use std::error::Error as _;

use serde::{Deserialize, Serialize};
use sqlrel::catalog::CatalogError;
use sqlrel::errors::SqlRelError;

/// Failed to acquire a compiler, or the service is not taking work.
pub const CODE_POOL: i32 = -1;
/// The statement could not be parsed.
pub const CODE_SYNTAX: i32 = -2;
/// The statement parsed but failed validation.
pub const CODE_VALIDATION: i32 = -3;
/// Anything else.
pub const CODE_INTERNAL: i32 = -4;

#[derive(Debug, thiserror::Error)]
pub enum PlanServerError {
    #[error("Compiler pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Compiler pool is closed")]
    PoolClosed,

    #[error("Failed to create compiler instance: {0}")]
    FactoryFailure(String),

    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    Validation(String),

    #[error("View cycle detected: {}", .0.join(" -> "))]
    ViewCycle(Vec<String>),

    #[error("Plan rewrite did not converge after {iterations} iterations")]
    RewriteNonConvergence { iterations: usize },

    #[error("RelConversion failed: {0}")]
    PlanConversion(#[source] SqlRelError),

    #[error("Could not return compiler instance: {0}")]
    Release(String),

    #[error("Service is shutting down, not accepting new work")]
    ShuttingDown,

    #[error("{0}")]
    Internal(String),
}

impl PlanServerError {
    /// The wire code for this error. Exactly one code applies to any error.
    pub fn code(&self) -> i32 {
        match self {
            PlanServerError::Syntax(_) => CODE_SYNTAX,
            PlanServerError::Validation(_) | PlanServerError::ViewCycle(_) => CODE_VALIDATION,
            PlanServerError::PoolExhausted(_)
            | PlanServerError::PoolClosed
            | PlanServerError::FactoryFailure(_)
            | PlanServerError::ShuttingDown => CODE_POOL,
            PlanServerError::RewriteNonConvergence { .. }
            | PlanServerError::PlanConversion(_)
            | PlanServerError::Release(_)
            | PlanServerError::Internal(_) => CODE_INTERNAL,
        }
    }
}

impl From<SqlRelError> for PlanServerError {
    fn from(err: SqlRelError) -> Self {
        match err {
            err @ (SqlRelError::Parse(_) | SqlRelError::Syntax(_)) => {
                PlanServerError::Syntax(err.to_string())
            }
            SqlRelError::ViewCycle(path) => PlanServerError::ViewCycle(path),
            err @ (SqlRelError::Validation(_)
            | SqlRelError::Unsupported(_)
            | SqlRelError::Catalog(CatalogError::MissingTable(_))
            | SqlRelError::Catalog(CatalogError::InvalidTableReference(_))) => {
                PlanServerError::Validation(err.to_string())
            }
            err @ (SqlRelError::Json(_)
            | SqlRelError::Internal(_)
            | SqlRelError::Catalog(CatalogError::Load(_))) => PlanServerError::PlanConversion(err),
        }
    }
}

impl From<CatalogError> for PlanServerError {
    fn from(err: CatalogError) -> Self {
        SqlRelError::from(err).into()
    }
}

pub type Result<T, E = PlanServerError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::PlanServerError::Internal(std::format!($($arg)*))
    };
}
#[allow(unused_imports)]
pub(crate) use internal;

/// Error returned to clients of `process`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("InvalidParseRequest({code}): {message}")]
pub struct InvalidParseRequest {
    pub code: i32,
    pub message: String,
}

impl InvalidParseRequest {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        InvalidParseRequest {
            code,
            message: message.into(),
        }
    }
}

impl From<&PlanServerError> for InvalidParseRequest {
    fn from(err: &PlanServerError) -> Self {
        let code = err.code();
        let message = match code {
            CODE_POOL => format!("Could not get compiler from pool: {err}"),
            CODE_SYNTAX => format!("Parse failed: {err}"),
            CODE_VALIDATION => format!("Validate failed: {err}"),
            _ => {
                let mut message = format!("Exception occurred: {err}");
                let mut source = err.source();
                while let Some(cause) = source {
                    message.push_str(&format!("\nCaused by: {cause}"));
                    source = cause.source();
                }
                message.push_str(&format!("\n{}", Backtrace::force_capture()));
                message
            }
        };
        InvalidParseRequest { code, message }
    }
}

impl From<PlanServerError> for InvalidParseRequest {
    fn from(err: PlanServerError) -> Self {
        InvalidParseRequest::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use sqlparser::parser::ParserError;

    use super::*;

    #[test]
    fn classification_codes() {
        let cases = [
            (PlanServerError::PoolExhausted("busy".to_string()), -1),
            (PlanServerError::PoolClosed, -1),
            (PlanServerError::ShuttingDown, -1),
            (PlanServerError::Syntax("bad".to_string()), -2),
            (PlanServerError::Validation("bad".to_string()), -3),
            (PlanServerError::ViewCycle(vec!["db.a".to_string()]), -3),
            (PlanServerError::RewriteNonConvergence { iterations: 3 }, -4),
            (PlanServerError::Release("passivate".to_string()), -4),
            (PlanServerError::Internal("boom".to_string()), -4),
        ];
        for (err, code) in cases {
            assert_eq!(code, err.code(), "{err}");
        }
    }

    #[test]
    fn sqlrel_errors_map_to_codes() {
        let parse = PlanServerError::from(SqlRelError::Parse(ParserError::ParserError(
            "Expected an expression".to_string(),
        )));
        assert_eq!(CODE_SYNTAX, parse.code());

        let missing =
            PlanServerError::from(SqlRelError::Catalog(CatalogError::MissingTable("x".into())));
        assert_eq!(CODE_VALIDATION, missing.code());

        let cycle = PlanServerError::from(SqlRelError::ViewCycle(vec!["a".into(), "b".into()]));
        assert!(matches!(cycle, PlanServerError::ViewCycle(_)));

        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        let conversion = PlanServerError::from(SqlRelError::Json(json));
        assert_eq!(CODE_INTERNAL, conversion.code());
    }

    #[test]
    fn internal_message_includes_source_chain() {
        let err = PlanServerError::from(SqlRelError::Internal("missing input".to_string()));
        let invalid = InvalidParseRequest::from(&err);
        assert_eq!(CODE_INTERNAL, invalid.code);
        assert!(invalid.message.starts_with("Exception occurred: RelConversion failed"));
        assert!(invalid.message.contains("Caused by: internal: missing input"));
    }

    #[test]
    fn syntax_message_prefix() {
        let invalid = InvalidParseRequest::from(PlanServerError::Syntax("oops".to_string()));
        assert_eq!(InvalidParseRequest::new(-2, "Parse failed: oops"), invalid);
    }
}
