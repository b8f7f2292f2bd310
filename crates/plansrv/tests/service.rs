use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use plansrv::compiler::SharedCatalog;
use plansrv::dispatcher::Dispatcher;
use plansrv::errors::{CODE_INTERNAL, CODE_POOL, CODE_SYNTAX, CODE_VALIDATION};
use plansrv::factory::CompilerFactory;
use plansrv::pool::{Pool, WaitPolicy};
use plansrv::registry::FunctionRegistry;
use plansrv::types::{
    CompletionHintsRequest,
    ExtArgumentType,
    ProcessRequest,
    UserDefinedFunction,
};
use plansrv::{PlanService, ServiceConfig};
use sqlrel::catalog::{CatalogError, ColumnDef, ResolvedTableReference, TableDef};
use sqlrel::{Catalog, MemoryCatalog};
use sqlrel::completion::CompletionHintKind;
use sqlrel::types::DataType;

fn sales_catalog() -> Arc<MemoryCatalog> {
    let catalog = MemoryCatalog::new();
    catalog.insert(
        "sales",
        TableDef::table(
            "orders",
            vec![
                ColumnDef::new("id", DataType::Integer),
                ColumnDef::new("customer_id", DataType::Integer),
                ColumnDef::new("amount", DataType::Double),
            ],
        ),
    );
    catalog.insert(
        "sales",
        TableDef::table(
            "customers",
            vec![
                ColumnDef::new("id", DataType::Integer),
                ColumnDef::new("name", DataType::Text),
            ],
        ),
    );
    catalog.insert(
        "sales",
        TableDef::view(
            "v_recent_orders",
            "SELECT id, amount FROM orders WHERE amount > 10",
        ),
    );
    catalog.insert("sales", TableDef::view("v_a", "SELECT * FROM v_b"));
    catalog.insert("sales", TableDef::view("v_b", "SELECT * FROM v_a"));
    Arc::new(catalog)
}

fn service_with(config: ServiceConfig) -> PlanService {
    logutil::init_test();
    let catalog: SharedCatalog = sales_catalog();
    PlanService::new(config, catalog)
}

fn service() -> PlanService {
    service_with(ServiceConfig {
        pool_capacity: 2,
        default_database: "sales".to_string(),
        ..Default::default()
    })
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn select_star_access_objects() {
    let service = service();
    let result = service
        .process(ProcessRequest::new("sales", "SELECT * FROM orders;"))
        .unwrap();

    assert_eq!(set(&["orders"]), result.primary_accessed_objects.tables_selected_from);
    assert_eq!(set(&["orders"]), result.resolved_accessed_objects.tables_selected_from);
    for objects in [&result.primary_accessed_objects, &result.resolved_accessed_objects] {
        assert!(objects.tables_inserted_into.is_empty());
        assert!(objects.tables_updated_in.is_empty());
        assert!(objects.tables_deleted_from.is_empty());
    }

    let plan: serde_json::Value = serde_json::from_str(&result.plan_result).unwrap();
    assert!(plan.is_object());
}

#[test]
fn views_resolve_to_base_tables() {
    let service = service();
    let result = service
        .process(ProcessRequest::new(
            "sales",
            "SELECT r.id, c.name FROM v_recent_orders r JOIN customers c ON r.id = c.id",
        ))
        .unwrap();

    assert_eq!(
        set(&["customers", "v_recent_orders"]),
        result.primary_accessed_objects.tables_selected_from
    );
    assert_eq!(
        set(&["customers", "orders"]),
        result.resolved_accessed_objects.tables_selected_from
    );
}

#[test]
fn dml_targets_are_reported() {
    let service = service();
    let result = service
        .process(ProcessRequest::new(
            "sales",
            "DELETE FROM orders WHERE customer_id = 7",
        ))
        .unwrap();
    assert_eq!(set(&["orders"]), result.primary_accessed_objects.tables_deleted_from);
    assert!(result.primary_accessed_objects.tables_selected_from.is_empty());
}

#[test]
fn explain_output() {
    let service = service();
    let mut request = ProcessRequest::new("sales", "SELECT id FROM orders WHERE amount > 5");
    request.is_explain = true;
    let result = service.process(request).unwrap();
    assert!(result.plan_result.contains("LogicalTableScan(table=[[sales, orders]])"));
}

#[test]
fn empty_catalog_uses_default_database() {
    let service = service();
    let result = service
        .process(ProcessRequest::new("", "SELECT * FROM customers"))
        .unwrap();
    assert_eq!(set(&["customers"]), result.primary_accessed_objects.tables_selected_from);
}

#[test]
fn syntax_error_code() {
    let service = service();
    let err = service
        .process(ProcessRequest::new("sales", "SELECT FROM"))
        .unwrap_err();
    assert_eq!(CODE_SYNTAX, err.code);
    assert!(err.message.starts_with("Parse failed: "), "{}", err.message);
}

#[test]
fn validation_error_code() {
    let service = service();
    let err = service
        .process(ProcessRequest::new("sales", "SELECT missing_column FROM orders"))
        .unwrap_err();
    assert_eq!(CODE_VALIDATION, err.code);
    assert!(err.message.starts_with("Validate failed: "), "{}", err.message);

    let err = service
        .process(ProcessRequest::new("sales", "SELECT * FROM no_such_table"))
        .unwrap_err();
    assert_eq!(CODE_VALIDATION, err.code);
}

#[test]
fn view_cycle_is_a_validation_error() {
    let service = service();
    let err = service
        .process(ProcessRequest::new("sales", "SELECT * FROM v_a"))
        .unwrap_err();
    assert_eq!(CODE_VALIDATION, err.code);
    assert!(err.message.contains("sales.v_a"), "{}", err.message);
}

#[test]
fn pool_exhaustion_fails_fast() {
    logutil::init_test();
    let catalog: SharedCatalog = sales_catalog();
    let registry = Arc::new(FunctionRegistry::empty());
    let pool = Pool::new(
        CompilerFactory::new(catalog, registry),
        1,
        WaitPolicy::FailFast,
    );
    let dispatcher = Dispatcher::new(pool.clone(), 16);

    let held = pool.acquire().unwrap();
    let err = dispatcher
        .process(&ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap_err();
    assert_eq!(CODE_POOL, err.code);
    assert!(
        err.message.starts_with("Could not get compiler from pool: "),
        "{}",
        err.message
    );

    held.release().unwrap();
    dispatcher
        .process(&ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap();
}

#[test]
fn pool_exhaustion_times_out() {
    logutil::init_test();
    let catalog: SharedCatalog = sales_catalog();
    let registry = Arc::new(FunctionRegistry::empty());
    let pool = Pool::new(
        CompilerFactory::new(catalog, registry),
        1,
        WaitPolicy::Timeout(Duration::from_millis(20)),
    );
    let dispatcher = Dispatcher::new(pool.clone(), 16);

    let _held = pool.acquire().unwrap();
    let err = dispatcher
        .process(&ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap_err();
    assert_eq!(CODE_POOL, err.code);
}

#[test]
fn every_acquire_is_released() {
    let service = service();
    service
        .process(ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap();
    service
        .process(ProcessRequest::new("sales", "SELECT FROM"))
        .unwrap_err();
    service
        .process(ProcessRequest::new("sales", "SELECT * FROM v_a"))
        .unwrap_err();
    service.update_metadata("sales", "orders");

    let stats = service.stats();
    assert_eq!(4, stats.calls);
    assert_eq!(4, stats.pool.acquired);
    assert_eq!(stats.pool.acquired, stats.pool.released);
    assert_eq!(0, stats.pool.in_use);
}

/// Catalog that panics when asked for the `exploding` table.
struct ExplodingCatalog(Arc<MemoryCatalog>);

impl Catalog for ExplodingCatalog {
    fn get_table(&self, tbl: &ResolvedTableReference) -> Result<Option<TableDef>, CatalogError> {
        if tbl.base == "exploding" {
            panic!("catalog lookup blew up");
        }
        self.0.get_table(tbl)
    }

    fn list_tables(&self, database: &str) -> Result<Vec<TableDef>, CatalogError> {
        self.0.list_tables(database)
    }
}

#[test]
fn panicking_compile_discards_instance() {
    logutil::init_test();
    let catalog: SharedCatalog = Arc::new(ExplodingCatalog(sales_catalog()));
    let registry = Arc::new(FunctionRegistry::empty());
    let pool = Pool::new(
        CompilerFactory::new(catalog, registry),
        1,
        WaitPolicy::FailFast,
    );
    let dispatcher = Dispatcher::new(pool.clone(), 16);

    let err = dispatcher
        .process(&ProcessRequest::new("sales", "SELECT * FROM exploding"))
        .unwrap_err();
    assert_eq!(CODE_INTERNAL, err.code);
    assert!(err.message.contains("catalog lookup blew up"), "{}", err.message);

    let stats = pool.stats();
    assert_eq!(1, stats.acquired);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(1, stats.destroyed);
    assert_eq!(0, stats.in_use);
    assert_eq!(0, stats.idle);

    // The discarded instance is replaced on the next request.
    dispatcher
        .process(&ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap();
    let stats = pool.stats();
    assert_eq!(2, stats.created);
    assert_eq!(2, stats.released);
    assert_eq!(1, stats.idle);
}

#[test]
fn concurrent_calls_share_bounded_pool() {
    let service = Arc::new(service());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            thread::spawn(move || {
                let sql = if i % 2 == 0 {
                    "SELECT * FROM orders"
                } else {
                    "SELECT * FROM v_recent_orders"
                };
                service.process(ProcessRequest::new("sales", sql)).unwrap()
            })
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(set(&["orders"]), result.resolved_accessed_objects.tables_selected_from);
    }

    let stats = service.stats();
    assert!(stats.pool.created <= 2);
    assert_eq!(8, stats.pool.acquired);
    assert_eq!(8, stats.pool.released);
}

#[test]
fn plan_rewrite_round_trip() {
    let service = service();
    let compiled = service
        .process(ProcessRequest::new(
            "sales",
            "SELECT t.id FROM (SELECT id, amount FROM orders) t WHERE t.amount > 1",
        ))
        .unwrap();

    let rewritten = service
        .process(ProcessRequest::new(
            "sales",
            format!("execute calcite {};", compiled.plan_result),
        ))
        .unwrap();

    assert!(rewritten.primary_accessed_objects.is_empty());
    assert!(rewritten.resolved_accessed_objects.is_empty());
    let plan: serde_json::Value = serde_json::from_str(&rewritten.plan_result).unwrap();
    assert!(plan.is_object());
    // The derived table's projection is merged away.
    assert_ne!(compiled.plan_result, rewritten.plan_result);

    service
        .process(ProcessRequest::new(
            "sales",
            format!("execute calcite {}", rewritten.plan_result),
        ))
        .unwrap();
}

#[test]
fn plan_rewrite_of_garbage_is_internal() {
    let service = service();
    let err = service
        .process(ProcessRequest::new("sales", "execute calcite {not json"))
        .unwrap_err();
    assert_eq!(CODE_INTERNAL, err.code);
}

#[test]
fn runtime_functions_replace_previous_set() {
    let service = service();
    let sql = "SELECT double_it(id) FROM orders";

    let err = service.process(ProcessRequest::new("sales", sql)).unwrap_err();
    assert_eq!(CODE_VALIDATION, err.code);
    assert_eq!("[]", service.runtime_extension_function_whitelist());

    let registration = service.set_runtime_extension_functions(
        &[UserDefinedFunction {
            name: "double_it".to_string(),
            arg_types: vec![ExtArgumentType::Int32],
            ret_type: ExtArgumentType::Int32,
        }],
        &[],
    );
    assert_eq!(vec!["double_it".to_string()], registration.registered);
    assert_eq!(
        r#"[{"name":"double_it","ret":"i32","args":["i32"]}]"#,
        service.runtime_extension_function_whitelist()
    );
    service.process(ProcessRequest::new("sales", sql)).unwrap();

    service.set_runtime_extension_functions(&[], &[]);
    assert_eq!("[]", service.runtime_extension_function_whitelist());
    let err = service.process(ProcessRequest::new("sales", sql)).unwrap_err();
    assert_eq!(CODE_VALIDATION, err.code);
}

#[test]
fn whitelists_default_to_empty() {
    let service = service();
    assert_eq!("[]", service.extension_function_whitelist());
    assert_eq!("[]", service.user_defined_function_whitelist());
}

#[test]
fn signature_files_populate_whitelists() {
    let dir = tempfile::tempdir().unwrap();
    let ext = dir.path().join("ExtensionFunctions.ast");
    std::fs::write(
        &ext,
        "EXTENSION_NOINLINE int32_t row_adder(const int32_t a, const int32_t b)\n",
    )
    .unwrap();

    let service = service_with(ServiceConfig {
        default_database: "sales".to_string(),
        extension_functions_file: Some(ext),
        udf_file: Some(dir.path().join("missing.ast")),
        ..Default::default()
    });
    assert_eq!(
        r#"[{"name":"row_adder","ret":"i32","args":["i32","i32"]}]"#,
        service.extension_function_whitelist()
    );
    assert_eq!("[]", service.user_defined_function_whitelist());
    service
        .process(ProcessRequest::new("sales", "SELECT row_adder(id, customer_id) FROM orders"))
        .unwrap();
}

#[test]
fn completion_hints_for_tables() {
    let service = service();
    let hints = service.completion_hints(&CompletionHintsRequest {
        catalog: "sales".to_string(),
        sql: "SELECT * FROM ord".to_string(),
        cursor: 17,
        ..Default::default()
    });
    assert!(hints.iter().any(|h| {
        h.kind == CompletionHintKind::Table && h.qualified_names.join(".") == "sales.orders"
    }));

    // Bad cursor yields nothing rather than an error.
    let hints = service.completion_hints(&CompletionHintsRequest {
        catalog: "sales".to_string(),
        sql: "SELECT".to_string(),
        cursor: 100,
        ..Default::default()
    });
    assert!(hints.is_empty());
}

#[test]
fn shutdown_rejects_new_work() {
    let service = service();
    service
        .process(ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap();
    service.shutdown();
    assert!(service.is_shutting_down());

    let err = service
        .process(ProcessRequest::new("sales", "SELECT * FROM orders"))
        .unwrap_err();
    assert_eq!(CODE_POOL, err.code);
    assert!(service.completion_hints(&CompletionHintsRequest::default()).is_empty());
    assert_eq!(0, service.stats().pool.idle);
}
