use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Faults that cross an `async fn -> Result` boundary: startup, the control
/// surface, and the recorder. The hot ingestion path (parse/classify/fabricate)
/// never raises — see `parsers`, `classifier`.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recorder error: {0}")]
    Recorder(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl RelayError {
    fn code(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => "not_found",
            RelayError::Conflict(_) => "conflict",
            RelayError::BadRequest(_) => "bad_request",
            RelayError::Config(_) => "config_error",
            RelayError::Io(_) => "io_error",
            RelayError::Recorder(_) => "recorder_error",
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            RelayError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RelayError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            RelayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RelayError::Config(_) | RelayError::Io(_) | RelayError::Recorder(_) => {
                let id = uuid::Uuid::new_v4();
                tracing::error!(error = %self, correlation_id = %id, "relay fault");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("internal error (ref {id})"),
                )
            }
        };
        (
            status,
            Json(json!({ "error": { "code": code, "message": message } })),
        )
            .into_response()
    }
}
