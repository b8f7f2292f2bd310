use sqlparser::parser::ParserError;

use crate::catalog::CatalogError;

#[derive(Debug, thiserror::Error)]
pub enum SqlRelError {
    #[error("SQL parse error: {0}")]
    Parse(#[from] ParserError),

    /// Input that tokenizes and parses but is still not well formed SQL.
    #[error("SQL syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Validation(String),

    #[error("view cycle detected: {}", .0.join(" -> "))]
    ViewCycle(Vec<String>),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("invalid serialized plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl SqlRelError {
    /// Whether the error was raised while turning text into an AST.
    pub fn is_syntax(&self) -> bool {
        matches!(self, SqlRelError::Parse(_) | SqlRelError::Syntax(_))
    }

    /// Whether the error was raised while validating a well formed statement.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SqlRelError::Validation(_) | SqlRelError::Catalog(CatalogError::MissingTable(_))
        )
    }
}

pub type Result<T, E = SqlRelError> = std::result::Result<T, E>;

macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::SqlRelError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;

macro_rules! validation {
    ($($arg:tt)*) => {
        crate::errors::SqlRelError::Validation(std::format!($($arg)*))
    };
}
pub(crate) use validation;

macro_rules! unsupported {
    ($($arg:tt)*) => {
        crate::errors::SqlRelError::Unsupported(std::format!($($arg)*))
    };
}
pub(crate) use unsupported;
