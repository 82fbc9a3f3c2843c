//! Error responses for the administrative API.
//!
//! Storage errors from the persistence layer map to HTTP status codes:
//!
//! | Storage Error | HTTP Status | Code |
//! |--------------|-------------|------|
//! | NoPrimaryAvailable | 503 | storage-unavailable |
//! | UnknownBackend, NotFound | 404 | not-found |
//! | DuplicateBackend, PrimaryDeactivation, AlreadyExists | 409 | conflict |
//! | Gone | 410 | gone |
//! | NotPermitted | 403 | forbidden |
//! | ValidationError, ConfigError | 400 | invalid |
//! | Unreachable backend, WriteRejected | 502 | backend-unavailable |
//! | Other backend errors | 500 | exception |
//!
//! Every error body has the shape
//! `{"error": {"code": "...", "message": "..."}}`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nimbus_persistence::error::{
    BackendError, FleetError, ResourceError, StorageError, ValidationError,
};
use thiserror::Error;

/// Errors returned by the administrative handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No backend can take writes (HTTP 503).
    #[error("{0}")]
    Unavailable(String),

    /// The referenced backend or entity does not exist (HTTP 404).
    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with current fleet state (HTTP 409).
    #[error("{0}")]
    Conflict(String),

    /// The entity was moved to the trash (HTTP 410).
    #[error("{0}")]
    Gone(String),

    /// The caller may not perform the operation (HTTP 403).
    #[error("{0}")]
    Forbidden(String),

    /// The request is malformed or fails validation (HTTP 400).
    #[error("{0}")]
    BadRequest(String),

    /// A backend could not be reached or refused the write (HTTP 502).
    #[error("{0}")]
    BadGateway(String),

    /// Anything else (HTTP 500).
    #[error("{0}")]
    Internal(String),
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unavailable(_) => "storage-unavailable",
            ApiError::NotFound(_) => "not-found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Gone(_) => "gone",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::BadRequest(_) => "invalid",
            ApiError::BadGateway(_) => "backend-unavailable",
            ApiError::Internal(_) => "exception",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::Fleet(e) => match e {
                FleetError::NoPrimaryAvailable => ApiError::Unavailable(message),
                FleetError::UnknownBackend { .. } => ApiError::NotFound(message),
                FleetError::DuplicateBackend { .. }
                | FleetError::PrimaryDeactivation { .. }
                | FleetError::FailoverNoEligibleBackup { .. } => ApiError::Conflict(message),
            },
            StorageError::Resource(e) => match e {
                ResourceError::NotFound { .. } => ApiError::NotFound(message),
                ResourceError::AlreadyExists { .. } => ApiError::Conflict(message),
                ResourceError::Gone { .. } => ApiError::Gone(message),
            },
            StorageError::Validation(ValidationError::NotPermitted { .. }) => {
                ApiError::Forbidden(message)
            }
            StorageError::Validation(_) | StorageError::Config(_) => ApiError::BadRequest(message),
            StorageError::Backend(BackendError::WriteRejected { .. }) => {
                ApiError::BadGateway(message)
            }
            ref e if e.is_backend_unreachable() => ApiError::BadGateway(message),
            StorageError::Backend(_) => ApiError::Internal(message),
        }
    }
}
