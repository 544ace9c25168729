//! Error taxonomy and its HTTP mapping.
//!
//! - [`ValidationError`]: malformed input, rejected before the store is touched.
//! - [`StoreError`]: the backlog could not complete an operation; no partial effects.
//! - Processing-step errors are plain `anyhow::Error`s recorded on the row as `failed`.
//! - Stale-lease conflicts are not errors: store operations report them as `false`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Failure of a backlog operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or could not run the operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row read back from the store does not map onto the record model.
    #[error("corrupt row {key}: {reason}")]
    CorruptRow { key: String, reason: String },
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Database(_)
                    | sqlx::Error::WorkerCrashed
            ),
            StoreError::CorruptRow { .. } => false,
        }
    }
}

/// One offending field of one event.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Input rejected before any store mutation.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// The body is not JSON or not one of the accepted shapes.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    #[error("batch must contain at least one event")]
    EmptyBatch,

    #[error("batch of {size} events exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("event {index} is invalid")]
    InvalidEvent { index: usize, errors: Vec<FieldError> },

    #[error("limit must be an integer between 1 and {max}, got {got:?}")]
    InvalidLimit { got: String, max: usize },
}

/// Failure of a `submit` call.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(e) => ApiError::Validation(e),
            IngestError::Store(e) => ApiError::Store(e),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            ApiError::Validation(ValidationError::MalformedBody(_)) => {
                (StatusCode::BAD_REQUEST, "malformed_body", None)
            }
            ApiError::Validation(ValidationError::BatchTooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "batch_too_large", None)
            }
            ApiError::Validation(ValidationError::InvalidEvent { index, errors }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_event",
                Some(serde_json::json!({ "index": index, "errors": errors })),
            ),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", None),
            ApiError::Store(err) => {
                tracing::error!(error = %err, "store error");
                if err.is_transient() {
                    (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None)
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "store_error", None)
                }
            }
        };

        let body = ErrorResponse {
            error,
            message: self.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
