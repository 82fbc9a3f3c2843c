//! Backend abstraction for database drivers.
//!
//! This module defines the [`Backend`] trait: the small surface the registry
//! needs from every database instance in the fleet. A backend can report
//! whether it is alive, how large its database currently is, and can
//! provision its own schema.
//!
//! Entity CRUD lives in [`EntityStorage`](super::EntityStorage); a fleet
//! member implements both (see [`FleetBackend`](super::FleetBackend)).

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Identifies the type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// PostgreSQL database.
    Postgres,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendKind::Sqlite),
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}

/// A database instance that can be probed and provisioned.
///
/// Implementations must be cheap to call concurrently: the health monitor
/// probes every backend in parallel while requests are being served.
///
/// # Example
///
/// ```ignore
/// use nimbus_persistence::core::Backend;
///
/// backend.health_check().await?;
/// let size = backend.database_size_mb().await?;
/// println!("{} is {:.1} MB", backend.name(), size);
/// ```
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Checks if the backend is reachable and answering queries.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Returns the current on-disk size of the database in megabytes.
    async fn database_size_mb(&self) -> Result<f64, BackendError>;

    /// Creates the entity schema if it is absent. Must be idempotent.
    async fn initialize(&self) -> Result<(), BackendError>;
}
