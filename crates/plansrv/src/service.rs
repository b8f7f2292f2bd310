use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use sqlrel::completion::CompletionHint;
use tracing::{debug, error, info, warn};

use crate::compiler::SharedCatalog;
use crate::config::ServiceConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::{InvalidParseRequest, PlanServerError};
use crate::factory::CompilerFactory;
use crate::pool::{CompilerPool, Pool, PoolStats};
use crate::registry::{FunctionRegistry, RegistryLayer, RuntimeRegistration};
use crate::types::{
    CompletionHintsRequest,
    PlanResult,
    ProcessRequest,
    UserDefinedFunction,
    UserDefinedTableFunction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    /// Calls to process, update metadata and completion hints.
    pub calls: u64,
    pub shutting_down: bool,
    pub pool: PoolStats,
}

/// The plan compilation service.
///
/// Every operation is synchronous and may block waiting for a compiler
/// instance. Callers running on an async runtime should call in from a
/// blocking thread.
#[derive(Debug)]
pub struct PlanService {
    config: ServiceConfig,
    registry: Arc<FunctionRegistry>,
    pool: Arc<CompilerPool>,
    dispatcher: Dispatcher,
    calls: AtomicU64,
    shutting_down: AtomicBool,
}

impl PlanService {
    /// Create a service, loading function signatures from the files named in
    /// the config.
    pub fn new(config: ServiceConfig, catalog: SharedCatalog) -> Self {
        let registry = FunctionRegistry::load(
            config.extension_functions_file.as_deref(),
            config.udf_file.as_deref(),
        );
        Self::with_registry(config, catalog, Arc::new(registry))
    }

    pub fn with_registry(
        config: ServiceConfig,
        catalog: SharedCatalog,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        let factory = CompilerFactory::new(catalog, registry.clone());
        let pool = Pool::new(factory, config.pool_capacity, config.wait_policy);
        let dispatcher = Dispatcher::new(pool.clone(), config.max_rewrite_iterations);
        info!(
            capacity = config.pool_capacity,
            policy = ?config.wait_policy,
            "started plan service"
        );
        PlanService {
            config,
            registry,
            pool,
            dispatcher,
            calls: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn ping(&self) {
        debug!("ping");
    }

    pub fn process(&self, mut request: ProcessRequest) -> Result<PlanResult, InvalidParseRequest> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.is_shutting_down() {
            return Err(InvalidParseRequest::from(PlanServerError::ShuttingDown));
        }
        if request.catalog.is_empty() {
            request.catalog = self.config.default_database.clone();
        }
        self.dispatcher.process(&request)
    }

    /// Drop cached knowledge of a table. Failures are logged.
    pub fn update_metadata(&self, catalog: &str, table: &str) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        debug!(%catalog, %table, "received metadata invalidation");

        let mut compiler = match self.pool.acquire() {
            Ok(compiler) => compiler,
            Err(e) => {
                warn!(%e, "could not get compiler to invalidate metadata");
                return;
            }
        };
        compiler.update_metadata(catalog, table);
        if let Err(e) = compiler.release() {
            error!(%e, "could not return compiler after metadata invalidation");
        }
    }

    /// Completion suggestions for the word ending at `cursor`. Failures are
    /// logged and yield no suggestions.
    pub fn completion_hints(&self, request: &CompletionHintsRequest) -> Vec<CompletionHint> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut user = request.compilation_user();
        if user.database.is_empty() {
            user.database = self.config.default_database.clone();
        }
        debug!(user = %user.user, database = %user.database, sql = %request.sql, "completion hints requested");

        let mut compiler = match self.pool.acquire() {
            Ok(compiler) => compiler,
            Err(e) => {
                error!(%e, "could not get compiler for completion hints");
                return Vec::new();
            }
        };
        compiler.bind_user(user);
        let hints = compiler.completion_hints(&request.sql, request.cursor, &request.visible_tables);
        if let Err(e) = compiler.release() {
            error!(%e, "could not return compiler after completion hints");
        }

        hints.unwrap_or_else(|e| {
            warn!(%e, "could not retrieve completion hints");
            Vec::new()
        })
    }

    pub fn extension_function_whitelist(&self) -> String {
        self.registry.whitelist(RegistryLayer::Compiled)
    }

    pub fn user_defined_function_whitelist(&self) -> String {
        self.registry.whitelist(RegistryLayer::LoadTime)
    }

    pub fn runtime_extension_function_whitelist(&self) -> String {
        self.registry.whitelist(RegistryLayer::Runtime)
    }

    /// Replace the runtime functions. Instances pick up the change the next
    /// time they're acquired.
    pub fn set_runtime_extension_functions(
        &self,
        udfs: &[UserDefinedFunction],
        udtfs: &[UserDefinedTableFunction],
    ) -> RuntimeRegistration {
        self.registry.register_runtime(udfs, udtfs)
    }

    /// Stop accepting new work and drop idle compilers. Calls in flight
    /// finish normally.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("shutting down plan service");
            self.pool.close();
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            calls: self.calls.load(Ordering::Relaxed),
            shutting_down: self.is_shutting_down(),
            pool: self.pool.stats(),
        }
    }
}
