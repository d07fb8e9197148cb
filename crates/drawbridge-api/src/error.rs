//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use drawbridge_snapshot::SnapshotError;
use drawbridge_store::StoreError;

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Malformed request payload.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The dispatch worker is gone.
    #[error("Dispatcher unavailable")]
    DispatcherClosed,

    /// A listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable code used on every channel.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Store(StoreError::NotFound(_)) => "not_found",
            ApiError::Store(StoreError::InvalidTransition { .. }) => "invalid_transition",
            ApiError::Store(StoreError::Duplicate(_)) => "duplicate",
            ApiError::Store(StoreError::InvalidId(_)) => "invalid_id",
            ApiError::Store(_) => "storage_error",
            ApiError::Snapshot(_) => "snapshot_error",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::DispatcherClosed => "unavailable",
            ApiError::Bind { .. } => "bind_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::InvalidTransition { .. })
            | ApiError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::InvalidId(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::DispatcherClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
