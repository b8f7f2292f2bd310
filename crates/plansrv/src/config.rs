use std::path::PathBuf;

use crate::pool::WaitPolicy;

/// Default cap on rewrite passes before giving up on convergence.
pub const DEFAULT_MAX_REWRITE_ITERATIONS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Maximum number of compiler instances.
    pub pool_capacity: usize,
    pub wait_policy: WaitPolicy,
    pub max_rewrite_iterations: usize,
    /// Signatures of functions compiled into the engine.
    pub extension_functions_file: Option<PathBuf>,
    /// clang AST dump with user defined function signatures.
    pub udf_file: Option<PathBuf>,
    /// Database used when a request doesn't name one.
    pub default_database: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            pool_capacity: 8,
            wait_policy: WaitPolicy::Block,
            max_rewrite_iterations: DEFAULT_MAX_REWRITE_ITERATIONS,
            extension_functions_file: None,
            udf_file: None,
            default_database: "default".to_string(),
        }
    }
}
