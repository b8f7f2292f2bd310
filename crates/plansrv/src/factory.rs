use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::compiler::{CompilerInstance, SharedCatalog};
use crate::errors::Result;
use crate::registry::FunctionRegistry;

/// Lifecycle hooks for objects managed by a [`Pool`](crate::pool::Pool).
pub trait ObjectFactory: Send + Sync + 'static {
    type Object: Send;

    /// Build a new object.
    fn create(&self) -> Result<Self::Object>;

    /// Prepare an object before it's handed out.
    fn activate(&self, _object: &mut Self::Object) -> Result<()> {
        Ok(())
    }

    /// Whether a returned object may be handed out again.
    fn validate(&self, _object: &Self::Object) -> bool {
        true
    }

    /// Reset an object as it's returned. An error discards the object.
    fn passivate(&self, _object: &mut Self::Object) -> Result<()> {
        Ok(())
    }
}

/// Builds compiler instances sharing one catalog and function registry.
pub struct CompilerFactory {
    catalog: SharedCatalog,
    registry: Arc<FunctionRegistry>,
    next_id: AtomicUsize,
}

impl fmt::Debug for CompilerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerFactory")
            .field("registry", &self.registry)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl CompilerFactory {
    pub fn new(catalog: SharedCatalog, registry: Arc<FunctionRegistry>) -> Self {
        CompilerFactory {
            catalog,
            registry,
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }
}

impl ObjectFactory for CompilerFactory {
    type Object = CompilerInstance;

    fn create(&self) -> Result<CompilerInstance> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(%id, "creating compiler instance");
        Ok(CompilerInstance::new(id, self.catalog.clone(), &self.registry))
    }

    fn activate(&self, compiler: &mut CompilerInstance) -> Result<()> {
        compiler.clear_memo();
        compiler.refresh_operators(&self.registry);
        Ok(())
    }

    fn validate(&self, compiler: &CompilerInstance) -> bool {
        !compiler.is_poisoned()
    }

    fn passivate(&self, compiler: &mut CompilerInstance) -> Result<()> {
        compiler.unbind_user();
        Ok(())
    }
}
