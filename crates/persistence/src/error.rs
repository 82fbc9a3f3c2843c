//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the fleet, following a
//! hierarchy that separates entity errors, validation errors, fleet (routing and
//! failover) errors, and per-backend errors.
//!
//! The propagation rules are asymmetric: read paths isolate [`BackendError`]s per
//! backend and degrade to partial results, while write and failover paths hand
//! every error back to the caller untouched.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::registry::ConfigError;
use crate::types::EntityKind;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Entity state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Primary selection and failover errors
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Returns true if the error means no write target exists right now.
    ///
    /// The request layer reports this as "storage unavailable".
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, StorageError::Fleet(FleetError::NoPrimaryAvailable))
    }

    /// Returns true if the error came from a single unreachable backend.
    pub fn is_backend_unreachable(&self) -> bool {
        matches!(
            self,
            StorageError::Backend(
                BackendError::Unavailable { .. }
                    | BackendError::ConnectionFailed { .. }
                    | BackendError::PoolExhausted { .. }
                    | BackendError::Timeout { .. }
            )
        )
    }
}

/// Errors related to entity state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested entity was not found on any reachable backend.
    #[error("entity not found: {id}")]
    NotFound { id: String },

    /// An entity with the given ID already exists.
    #[error("entity already exists: {kind}/{id}")]
    AlreadyExists { kind: EntityKind, id: String },

    /// The entity has been moved to the trash.
    #[error("entity deleted: {kind}/{id}")]
    Gone {
        kind: EntityKind,
        id: String,
        deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    },
}

/// Errors related to entity validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The entity payload is malformed.
    #[error("invalid entity: {message}")]
    InvalidEntity { message: String },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// The operation is not defined for this entity kind.
    #[error("{operation} is not supported for {kind} entities")]
    UnsupportedOperation {
        kind: EntityKind,
        operation: String,
    },

    /// The update patch is not a JSON object or touches immutable fields.
    #[error("invalid patch: {message}")]
    InvalidPatch { message: String },

    /// The caller is not allowed to act on the entity.
    #[error("{actor} cannot {operation} entity {id}")]
    NotPermitted {
        actor: String,
        operation: String,
        id: String,
    },
}

/// Errors related to primary selection and failover.
#[derive(Error, Debug)]
pub enum FleetError {
    /// No backend is currently marked primary, so writes cannot be routed.
    #[error("storage unavailable: no primary backend is currently designated")]
    NoPrimaryAvailable,

    /// Failover found no healthy candidate; the old primary keeps its role.
    #[error(
        "no eligible backup for failover: primary {primary_id} stays primary at {usage_percent:.1}% of capacity"
    )]
    FailoverNoEligibleBackup {
        primary_id: String,
        usage_percent: f64,
    },

    /// The referenced backend is not registered.
    #[error("unknown backend: {backend_id}")]
    UnknownBackend { backend_id: String },

    /// A backend with this ID is already registered.
    #[error("backend already registered: {backend_id}")]
    DuplicateBackend { backend_id: String },

    /// The operation would leave the fleet without an active primary.
    #[error("backend {backend_id} is the current primary and cannot be deactivated")]
    PrimaryDeactivation { backend_id: String },
}

/// Errors originating from a single database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// The call did not complete within its time budget.
    #[error("{backend_name} did not respond within {timeout_ms}ms")]
    Timeout {
        backend_name: String,
        timeout_ms: u64,
    },

    /// The primary accepted the call but the write itself failed.
    #[error("write rejected by {backend_name}: {message}")]
    WriteRejected {
        backend_name: String,
        message: String,
    },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution error.
    #[error("query execution failed: {message}")]
    QueryError { message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            id: "123".to_string(),
        });
        assert_eq!(err.to_string(), "entity not found: 123");
    }

    #[test]
    fn test_no_primary_is_storage_unavailable() {
        let err: StorageError = FleetError::NoPrimaryAvailable.into();
        assert!(err.is_storage_unavailable());
        assert!(err.to_string().contains("storage unavailable"));
        assert!(!err.is_backend_unreachable());
    }

    #[test]
    fn test_backend_unreachable_classification() {
        let err: StorageError = BackendError::Timeout {
            backend_name: "db-2".to_string(),
            timeout_ms: 500,
        }
        .into();
        assert!(err.is_backend_unreachable());

        let err: StorageError = BackendError::WriteRejected {
            backend_name: "db-1".to_string(),
            message: "UNIQUE constraint failed".to_string(),
        }
        .into();
        assert!(!err.is_backend_unreachable());
        assert!(err.to_string().contains("write rejected by db-1"));
    }

    #[test]
    fn test_failover_error_display() {
        let err = FleetError::FailoverNoEligibleBackup {
            primary_id: "db-1".to_string(),
            usage_percent: 93.4,
        };
        assert_eq!(
            err.to_string(),
            "no eligible backup for failover: primary db-1 stays primary at 93.4% of capacity"
        );
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::UnsupportedOperation {
            kind: EntityKind::Folder,
            operation: "soft delete".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "soft delete is not supported for folder entities"
        );
    }
}
