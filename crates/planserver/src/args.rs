use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use logutil::LogFormat;
use plansrv::ServiceConfig;
use plansrv::config::DEFAULT_MAX_REWRITE_ITERATIONS;
use plansrv::pool::WaitPolicy;

#[derive(Debug, Parser)]
#[clap(name = "planserver")]
pub struct Arguments {
    /// TCP address to bind to.
    #[arg(short = 'b', long, env = "PLANSERVER_BIND", default_value = "127.0.0.1:6279")]
    pub bind: String,

    /// Maximum number of compiler instances.
    #[arg(long, env = "PLANSERVER_POOL_CAPACITY", default_value_t = 8)]
    pub pool_capacity: usize,

    /// Milliseconds to wait for a free compiler before failing the request.
    ///
    /// Waits indefinitely if unset. Zero fails immediately.
    #[arg(long, env = "PLANSERVER_ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: Option<u64>,

    /// Maximum rewrite passes when rewriting a serialized plan.
    #[arg(long, env = "PLANSERVER_MAX_REWRITE_ITERATIONS", default_value_t = DEFAULT_MAX_REWRITE_ITERATIONS)]
    pub max_rewrite_iterations: usize,

    /// File with signatures of extension functions compiled into the engine.
    #[arg(long, env = "PLANSERVER_EXTENSION_FUNCTIONS")]
    pub extension_functions: Option<PathBuf>,

    /// clang AST dump containing user defined function declarations.
    #[arg(long, env = "PLANSERVER_UDF_FILE")]
    pub udf_file: Option<PathBuf>,

    /// JSON file describing the catalog. Starts with an empty catalog if
    /// unset.
    #[arg(short = 'c', long, env = "PLANSERVER_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Database used for requests that don't name one.
    #[arg(long, env = "PLANSERVER_DEFAULT_DATABASE", default_value = "default")]
    pub default_database: String,

    /// Log level, overridden by RUST_LOG.
    #[arg(long, env = "PLANSERVER_LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,

    /// Log output format.
    #[arg(long, env = "PLANSERVER_LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormatArg,
}

/// Possible values for the `--log-format` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogFormatArg {
    /// Human readable lines (default).
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Human => LogFormat::HumanReadable,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Arguments {
    pub fn wait_policy(&self) -> WaitPolicy {
        match self.acquire_timeout_ms {
            None => WaitPolicy::Block,
            Some(0) => WaitPolicy::FailFast,
            Some(ms) => WaitPolicy::Timeout(Duration::from_millis(ms)),
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            pool_capacity: self.pool_capacity,
            wait_policy: self.wait_policy(),
            max_rewrite_iterations: self.max_rewrite_iterations,
            extension_functions_file: self.extension_functions.clone(),
            udf_file: self.udf_file.clone(),
            default_database: self.default_database.clone(),
        }
    }
}
