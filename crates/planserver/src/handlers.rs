use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use plansrv::PlanService;
use plansrv::registry::RuntimeRegistration;
use plansrv::service::ServiceStats;
use plansrv::types::{
    CompletionHintsRequest,
    PlanResult,
    ProcessRequest,
    RuntimeFunctionsRequest,
    UpdateMetadataRequest,
};
use sqlrel::completion::CompletionHint;
use tokio::sync::Notify;
use tracing::{debug_span, info};
use uuid::Uuid;

use crate::errors::{ServerError, ServerResult};

/// State that's passed to all handlers.
#[derive(Debug)]
pub struct ServerState {
    pub service: Arc<PlanService>,
    /// Notified once a shutdown is requested over rpc.
    pub shutdown: Arc<Notify>,
}

/// Run a service call on the blocking pool since compiling may wait on the
/// compiler pool.
async fn run_blocking<T, F>(state: &ServerState, op: &'static str, f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&PlanService) -> T + Send + 'static,
{
    let service = state.service.clone();
    let request_id = Uuid::new_v4();
    let span = debug_span!("rpc_request", %request_id, op);
    let out = tokio::task::spawn_blocking(move || span.in_scope(|| f(service.as_ref()))).await?;
    Ok(out)
}

fn json_text(body: String) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], body)
}

pub async fn healthz(State(_): State<Arc<ServerState>>) -> &'static str {
    "OK"
}

pub async fn ping(State(state): State<Arc<ServerState>>) -> &'static str {
    state.service.ping();
    "pong"
}

pub async fn process(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ProcessRequest>,
) -> ServerResult<Json<PlanResult>> {
    let result = run_blocking(&state, "process", move |service| service.process(body)).await?;
    Ok(Json(result.map_err(ServerError::from)?))
}

pub async fn update_metadata(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<UpdateMetadataRequest>,
) -> ServerResult<StatusCode> {
    run_blocking(&state, "update_metadata", move |service| {
        service.update_metadata(&body.catalog, &body.table)
    })
    .await?;
    Ok(StatusCode::OK)
}

pub async fn completion_hints(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CompletionHintsRequest>,
) -> ServerResult<Json<Vec<CompletionHint>>> {
    let hints = run_blocking(&state, "completion_hints", move |service| {
        service.completion_hints(&body)
    })
    .await?;
    Ok(Json(hints))
}

pub async fn extension_function_whitelist(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    json_text(state.service.extension_function_whitelist())
}

pub async fn user_defined_function_whitelist(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    json_text(state.service.user_defined_function_whitelist())
}

pub async fn runtime_extension_function_whitelist(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    json_text(state.service.runtime_extension_function_whitelist())
}

pub async fn set_runtime_functions(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<RuntimeFunctionsRequest>,
) -> ServerResult<Json<RuntimeRegistration>> {
    if state.service.is_shutting_down() {
        return Err(ServerError::ShuttingDown);
    }
    let registration = run_blocking(&state, "set_runtime_functions", move |service| {
        service.set_runtime_extension_functions(&body.udfs, &body.udtfs)
    })
    .await?;
    Ok(Json(registration))
}

pub async fn stats(State(state): State<Arc<ServerState>>) -> Json<ServiceStats> {
    Json(state.service.stats())
}

pub async fn shutdown(State(state): State<Arc<ServerState>>) -> &'static str {
    info!("shutdown requested over rpc");
    state.service.shutdown();
    state.shutdown.notify_one();
    "OK"
}
