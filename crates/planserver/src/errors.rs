use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use plansrv::InvalidParseRequest;
use tracing::error;

pub type ServerResult<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The request was handled but could not be compiled.
    #[error("{}", .0.message)]
    InvalidParse(InvalidParseRequest),

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<InvalidParseRequest> for ServerError {
    fn from(err: InvalidParseRequest) -> Self {
        ServerError::InvalidParse(err)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::InvalidParse(err) => (StatusCode::BAD_REQUEST, Json(err)).into_response(),
            ServerError::ShuttingDown => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
            }
            ServerError::Join(e) => {
                error!(%e, "request handler task failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}
