//! Error types for the gateway.
//!
//! [`GatewayError`] covers the HTTP surface and converts into an Axum
//! response with a `{"error", "status"}` body. [`RegistryError`] is what
//! registry operations return to embedding code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use holomirror_types::WorkerId;

/// Errors returned by [`Registry`](crate::registry::Registry) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A worker with this id is already registered.
    #[error("worker already registered: {0}")]
    AlreadyRegistered(WorkerId),

    /// No worker with this id is registered.
    #[error("worker not found: {0}")]
    NotFound(WorkerId),

    /// Registration needs a Tokio runtime to start the metabolism loop.
    #[error("no Tokio runtime available")]
    NoRuntime,
}

/// Errors that can occur in the gateway's HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The requested worker or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The inject endpoint requires a valid token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The gateway cannot serve traffic yet.
    #[error("not ready: {0}")]
    NotReady(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(format!("worker {id} is not registered")),
            other @ (RegistryError::AlreadyRegistered(_) | RegistryError::NoRuntime) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::NotReady(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
