use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sqlrel::capture::IdentifierCapture;
use sqlrel::catalog::{CatalogError, ResolvedTableReference, TableDef};
use sqlrel::completion::{CompletionHint, Completer};
use sqlrel::functions::OperatorTable;
use sqlrel::json::PlanReader;
use sqlrel::parse::{SqlDialect, parse_statement};
use sqlrel::rules::{FilterPushDownHint, push_down_filters, simplify_predicates};
use sqlrel::{Catalog, LogicalPlan, Planner};
use sqlparser::ast;
use tracing::{debug, trace};

use crate::access::AccessedObjects;
use crate::errors::{Result, internal};
use crate::registry::FunctionRegistry;
use crate::types::{CompilationUser, CompileOptions};

/// Catalog shared by every compiler instance.
pub type SharedCatalog = Arc<dyn Catalog + Send + Sync>;

/// Per instance memo of catalog lookups.
///
/// Cleared whenever the instance is handed out so a call never sees lookups
/// from a previous call.
struct SymbolCache {
    catalog: SharedCatalog,
    tables: RefCell<HashMap<ResolvedTableReference, Option<TableDef>>>,
}

impl SymbolCache {
    fn clear(&self) {
        self.tables.borrow_mut().clear();
    }
}

impl Catalog for SymbolCache {
    fn get_table(&self, tbl: &ResolvedTableReference) -> Result<Option<TableDef>, CatalogError> {
        if let Some(cached) = self.tables.borrow().get(tbl) {
            trace!(%tbl, "symbol cache hit");
            return Ok(cached.clone());
        }
        let table = self.catalog.get_table(tbl)?;
        self.tables.borrow_mut().insert(tbl.clone(), table.clone());
        Ok(table)
    }

    fn list_tables(&self, database: &str) -> Result<Vec<TableDef>, CatalogError> {
        self.catalog.list_tables(database)
    }

    fn invalidate(&self, tbl: &ResolvedTableReference) {
        self.tables.borrow_mut().remove(tbl);
        self.catalog.invalidate(tbl);
    }
}

/// A stateful SQL compiler.
///
/// Instances hold caches and a bound user, and must only be used by one call
/// at a time. They live in the compiler pool.
pub struct CompilerInstance {
    id: usize,
    cache: SymbolCache,
    operators: OperatorTable,
    /// Registry generation the operator table was built from.
    generation: u64,
    user: Option<CompilationUser>,
    poisoned: bool,
}

impl fmt::Debug for CompilerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilerInstance")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("user", &self.user)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl CompilerInstance {
    pub fn new(id: usize, catalog: SharedCatalog, registry: &FunctionRegistry) -> Self {
        let (operators, generation) = registry.operator_table();
        CompilerInstance {
            id,
            cache: SymbolCache {
                catalog,
                tables: RefCell::new(HashMap::new()),
            },
            operators,
            generation,
            user: None,
            poisoned: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn operators(&self) -> &OperatorTable {
        &self.operators
    }

    pub fn clear_memo(&mut self) {
        self.cache.clear();
    }

    /// Rebuild the operator table if the registry changed since it was built.
    pub fn refresh_operators(&mut self, registry: &FunctionRegistry) {
        if registry.generation() != self.generation {
            let (operators, generation) = registry.operator_table();
            debug!(id = self.id, from = self.generation, to = generation, "refreshing operator table");
            self.operators = operators;
            self.generation = generation;
        }
    }

    pub fn bind_user(&mut self, user: CompilationUser) {
        self.user = Some(user);
    }

    pub fn unbind_user(&mut self) -> Option<CompilationUser> {
        self.user.take()
    }

    pub fn user(&self) -> Option<&CompilationUser> {
        self.user.as_ref()
    }

    /// Mark the instance as unusable. It's discarded when returned to the
    /// pool.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Catalog view used for compilation, backed by the symbol cache.
    pub fn catalog(&self) -> &dyn Catalog {
        &self.cache
    }

    fn database(&self) -> Result<&str> {
        self.user
            .as_ref()
            .map(|u| u.database.as_str())
            .ok_or_else(|| internal!("Compiler instance {} is not bound to a user", self.id))
    }

    pub fn parse(&self, sql: &str, options: &CompileOptions) -> Result<ast::Statement> {
        let dialect = if options.legacy_syntax {
            SqlDialect::Generic
        } else {
            SqlDialect::Postgres
        };
        Ok(parse_statement(sql, dialect)?)
    }

    /// Bind a statement into a plan, returning the objects it names
    /// alongside.
    pub fn plan(&self, statement: &ast::Statement) -> Result<(LogicalPlan, IdentifierCapture)> {
        let capture = IdentifierCapture::from_statement(statement);
        let planner = Planner::new(&self.cache, &self.operators, self.database()?);
        let plan = planner.plan_statement(statement)?;
        Ok((plan, capture))
    }

    /// Read a serialized plan, checking it against the catalog.
    pub fn read_plan(&self, json: &str) -> Result<LogicalPlan> {
        Ok(PlanReader::new(&self.cache).read(json)?)
    }

    /// Predicate simplification.
    pub fn apply_query_optimization(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        Ok(simplify_predicates(plan)?)
    }

    pub fn apply_filter_pushdown(
        &self,
        plan: LogicalPlan,
        hints: &[FilterPushDownHint],
    ) -> Result<LogicalPlan> {
        Ok(push_down_filters(plan, hints)?)
    }

    pub fn resolve_access(&self, primary: &AccessedObjects) -> Result<AccessedObjects> {
        primary.resolve(&self.cache, self.database()?)
    }

    pub fn completion_hints(
        &self,
        sql: &str,
        cursor: usize,
        visible_tables: &[String],
    ) -> Result<Vec<CompletionHint>> {
        let completer = Completer::new(&self.cache, &self.operators, self.database()?);
        Ok(completer.complete(sql, cursor, visible_tables)?)
    }

    /// Forget anything cached about a table.
    pub fn update_metadata(&mut self, database: &str, table: &str) {
        self.cache
            .invalidate(&ResolvedTableReference::new(database, table));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sqlrel::MemoryCatalog;
    use sqlrel::catalog::ColumnDef;
    use sqlrel::types::DataType;

    use super::*;
    use crate::types::UserDefinedFunction;

    /// Counts lookups that reach the underlying catalog.
    #[derive(Debug, Default)]
    struct CountingCatalog {
        inner: MemoryCatalog,
        lookups: AtomicUsize,
    }

    impl Catalog for CountingCatalog {
        fn get_table(
            &self,
            tbl: &ResolvedTableReference,
        ) -> Result<Option<TableDef>, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.get_table(tbl)
        }

        fn list_tables(&self, database: &str) -> Result<Vec<TableDef>, CatalogError> {
            self.inner.list_tables(database)
        }
    }

    fn catalog() -> Arc<CountingCatalog> {
        let catalog = CountingCatalog::default();
        catalog.inner.insert(
            "db",
            TableDef::table("t", vec![ColumnDef::new("a", DataType::Integer)]),
        );
        Arc::new(catalog)
    }

    fn bound(catalog: SharedCatalog, registry: &FunctionRegistry) -> CompilerInstance {
        let mut compiler = CompilerInstance::new(0, catalog, registry);
        compiler.bind_user(CompilationUser::new("u", "s", "db"));
        compiler
    }

    fn plan_sql(compiler: &CompilerInstance, sql: &str) -> Result<LogicalPlan> {
        let statement = compiler.parse(sql, &CompileOptions::default())?;
        Ok(compiler.plan(&statement)?.0)
    }

    #[test]
    fn symbol_cache_memoizes_until_cleared() {
        let catalog = catalog();
        let registry = FunctionRegistry::empty();
        let mut compiler = bound(catalog.clone(), &registry);

        plan_sql(&compiler, "SELECT a FROM t").unwrap();
        plan_sql(&compiler, "SELECT a FROM t").unwrap();
        assert_eq!(1, catalog.lookups.load(Ordering::SeqCst));

        compiler.clear_memo();
        plan_sql(&compiler, "SELECT a FROM t").unwrap();
        assert_eq!(2, catalog.lookups.load(Ordering::SeqCst));

        compiler.update_metadata("db", "t");
        plan_sql(&compiler, "SELECT a FROM t").unwrap();
        assert_eq!(3, catalog.lookups.load(Ordering::SeqCst));
    }

    #[test]
    fn unbound_instance_cannot_plan() {
        let compiler = CompilerInstance::new(3, catalog(), &FunctionRegistry::empty());
        let err = plan_sql(&compiler, "SELECT a FROM t").unwrap_err();
        assert_eq!(-4, err.code());
    }

    #[test]
    fn operator_table_follows_registry_generation() {
        let registry = FunctionRegistry::empty();
        let mut compiler = bound(catalog(), &registry);
        assert!(plan_sql(&compiler, "SELECT twice(a) FROM t").is_err());

        registry.register_runtime(
            &[UserDefinedFunction {
                name: "twice".to_string(),
                arg_types: vec![crate::types::ExtArgumentType::Int32],
                ret_type: crate::types::ExtArgumentType::Int32,
            }],
            &[],
        );
        // Snapshot is kept until refreshed.
        assert!(plan_sql(&compiler, "SELECT twice(a) FROM t").is_err());

        compiler.refresh_operators(&registry);
        assert_eq!(1, compiler.generation());
        plan_sql(&compiler, "SELECT twice(a) FROM t").unwrap();
    }
}
