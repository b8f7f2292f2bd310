use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use plansrv::PlanService;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

use crate::handlers::{self, ServerState};

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/rpc/v0/ping", get(handlers::ping))
        .route("/rpc/v0/process", post(handlers::process))
        .route("/rpc/v0/update_metadata", post(handlers::update_metadata))
        .route("/rpc/v0/completion_hints", post(handlers::completion_hints))
        .route(
            "/rpc/v0/whitelist/extension",
            get(handlers::extension_function_whitelist),
        )
        .route(
            "/rpc/v0/whitelist/udf",
            get(handlers::user_defined_function_whitelist),
        )
        .route(
            "/rpc/v0/whitelist/runtime",
            get(handlers::runtime_extension_function_whitelist),
        )
        .route(
            "/rpc/v0/runtime_functions",
            post(handlers::set_runtime_functions),
        )
        .route("/rpc/v0/stats", get(handlers::stats))
        .route("/rpc/v0/shutdown", post(handlers::shutdown))
        .with_state(state)
}

pub struct PlanServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl PlanServer {
    pub fn new(listener: TcpListener, service: Arc<PlanService>) -> Self {
        PlanServer {
            listener,
            state: Arc::new(ServerState {
                service,
                shutdown: Arc::new(Notify::new()),
            }),
        }
    }

    /// Serve until a shutdown signal or a shutdown rpc.
    ///
    /// Requests in flight are allowed to finish.
    pub async fn serve(self) -> Result<()> {
        info!(
            "Starting planserver {}\nListening on http://{}",
            env!("CARGO_PKG_VERSION"),
            self.listener.local_addr()?
        );

        let service = self.state.service.clone();
        let requested = self.state.shutdown.clone();
        let app = router(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = shutdown_signal() => (),
                    _ = requested.notified() => (),
                }
            })
            .await?;

        service.shutdown();
        info!("shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(%e, "unable to listen for shutdown signal");
                return std::future::pending().await;
            }
        };
        tokio::select! {
            _ = sigint.recv() => info!(signal = "SIGINT", "shutdown signal"),
            _ = sigterm.recv() => info!(signal = "SIGTERM", "shutdown signal"),
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal"),
            Err(e) => {
                tracing::error!(%e, "unable to listen for shutdown signal");
                std::future::pending::<()>().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use plansrv::ServiceConfig;
    use plansrv::compiler::SharedCatalog;
    use sqlrel::MemoryCatalog;
    use sqlrel::catalog::{ColumnDef, TableDef};
    use sqlrel::types::DataType;
    use tower::ServiceExt;

    use super::*;

    fn state() -> Arc<ServerState> {
        let catalog = MemoryCatalog::new();
        catalog.insert(
            "sales",
            TableDef::table(
                "orders",
                vec![
                    ColumnDef::new("id", DataType::Integer),
                    ColumnDef::new("amount", DataType::Double),
                ],
            ),
        );
        let catalog: SharedCatalog = Arc::new(catalog);
        let config = ServiceConfig {
            pool_capacity: 2,
            default_database: "sales".to_string(),
            ..Default::default()
        };
        Arc::new(ServerState {
            service: Arc::new(PlanService::new(config, catalog)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz() {
        let response = router(state())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());
    }

    #[tokio::test]
    async fn process_ok() {
        let response = router(state())
            .oneshot(post_json(
                "/rpc/v0/process",
                serde_json::json!({
                    "user": "admin",
                    "session": "s1",
                    "catalog": "sales",
                    "sql_text": "SELECT * FROM orders",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());

        let body = body_json(response).await;
        assert_eq!(
            serde_json::json!(["orders"]),
            body["primary_accessed_objects"]["tables_selected_from"]
        );
    }

    #[tokio::test]
    async fn process_error_carries_code() {
        let response = router(state())
            .oneshot(post_json(
                "/rpc/v0/process",
                serde_json::json!({
                    "user": "admin",
                    "session": "s1",
                    "catalog": "sales",
                    "sql_text": "SELECT FROM",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert_eq!(-2, body_json(response).await["code"]);
    }

    #[tokio::test]
    async fn runtime_functions_and_whitelist() {
        let state = state();
        let response = router(state.clone())
            .oneshot(post_json(
                "/rpc/v0/runtime_functions",
                serde_json::json!({
                    "udfs": [{"name": "plus_one", "arg_types": ["Int64"], "ret_type": "Int64"}],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(serde_json::json!(["plus_one"]), body_json(response).await["registered"]);

        let response = router(state)
            .oneshot(
                Request::get("/rpc/v0/whitelist/runtime")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            serde_json::json!([{"name": "plus_one", "ret": "i64", "args": ["i64"]}]),
            body_json(response).await
        );
    }

    #[tokio::test]
    async fn shutdown_rejects_further_work() {
        let state = state();
        let response = router(state.clone())
            .oneshot(Request::post("/rpc/v0/shutdown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());
        assert!(state.service.is_shutting_down());

        let response = router(state)
            .oneshot(post_json(
                "/rpc/v0/process",
                serde_json::json!({
                    "user": "admin",
                    "session": "s1",
                    "catalog": "sales",
                    "sql_text": "SELECT * FROM orders",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        assert_eq!(-1, body_json(response).await["code"]);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown_rpc() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = PlanServer::new(listener, state().service.clone());
        let notify = server.state.shutdown.clone();
        let service = server.state.service.clone();

        let handle = tokio::spawn(server.serve());
        notify.notify_one();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap() // Timeout error
            .unwrap() // Join error
            .unwrap(); // Serve error
        assert!(service.is_shutting_down());
    }
}
