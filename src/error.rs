use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

use crate::store::StoreError;

/// Unified error type for the session core.
///
/// Collaborator failures (store, relay) are translated into this taxonomy at
/// the component boundaries; no operation in the core retries automatically.
#[derive(Debug)]
pub enum CoreError {
    /// A required field could not be resolved (e.g. no session code for a
    /// non-creation action). Reported to the originating connection only.
    Validation(String),
    /// The addressed session/player/mapping does not exist.
    NotFound(String),
    /// The persistent store failed; the operation aborts without broadcast.
    StoreUnavailable(String),
    /// A payload could not be delivered to a connection.
    Delivery(String),
    /// The session code space is saturated; fatal to the create request.
    CapacityExhausted,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "{msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            Self::Delivery(msg) => write!(f, "delivery failed: {msg}"),
            Self::CapacityExhausted => write!(f, "session code space exhausted"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            // A canceled transaction means the target record vanished between
            // read and write (e.g. session torn down mid-action).
            StoreError::Conflict(msg) => Self::NotFound(msg),
            StoreError::Unavailable(msg) | StoreError::Corrupt(msg) => Self::StoreUnavailable(msg),
        }
    }
}

/// HTTP mapping for the few places errors surface before the WebSocket
/// upgrade (connect rejection, health).
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Delivery(_) => (StatusCode::BAD_GATEWAY, "DELIVERY_FAILURE"),
            Self::CapacityExhausted => (StatusCode::SERVICE_UNAVAILABLE, "CAPACITY_EXHAUSTED"),
            Self::StoreUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_UNAVAILABLE"),
        };

        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": self.to_string(),
                }
            })),
        )
            .into_response()
    }
}
