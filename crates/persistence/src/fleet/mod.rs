//! Fan-out storage aggregator.
//!
//! [`Fleet`] is the entry point the request layer talks to. It owns the
//! [`BackendRegistry`] and routes every entity operation:
//!
//! - **Writes** (create, copy) go to the current primary and are never retried
//!   elsewhere.
//! - **Reads** (list, usage, statistics) broadcast to every active backend and
//!   merge the results. An unreachable backend is logged and skipped.
//! - **Lookups by id** race all backends and take the first hit; updates and
//!   deletes then run on whichever backend holds the entity.
//!
//! # Example
//!
//! ```no_run
//! use nimbus_persistence::core::BackendKind;
//! use nimbus_persistence::fleet::Fleet;
//! use nimbus_persistence::registry::FleetConfig;
//! use nimbus_persistence::types::EntityKind;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FleetConfig::builder()
//!     .primary("db-1", BackendKind::Sqlite, "./data/db-1.sqlite")
//!     .backup("db-2", BackendKind::Sqlite, "./data/db-2.sqlite")
//!     .build()?;
//!
//! let fleet = Fleet::connect(config).await?;
//!
//! let folder = fleet
//!     .create(EntityKind::Folder, json!({"ownerId": "u-1", "name": "Photos"}))
//!     .await?;
//! let folders = fleet.list_by_owner("u-1", EntityKind::Folder).await?;
//! assert!(folders.iter().any(|f| f.id() == folder.id()));
//! # Ok(())
//! # }
//! ```

mod admin;
mod merger;
mod shares;
mod storage;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::backends::open_backend;
use crate::core::DynBackend;
use crate::error::StorageResult;
use crate::registry::{BackendRegistry, FleetConfig, HealthMonitor};

pub use admin::FleetStatus;
pub use merger::EntityMerger;

/// The database fleet: a registry of backends plus the aggregator over them.
pub struct Fleet {
    registry: Arc<BackendRegistry>,
    query_timeout: Duration,
    merger: EntityMerger,
    monitor: tokio::sync::Mutex<Option<HealthMonitor>>,
}

impl Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("registry", &self.registry)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl Fleet {
    /// Creates a fleet over connections the caller has already opened.
    ///
    /// Connections are keyed by backend id. Schemas are not touched; call
    /// [`Fleet::connect`] to open and provision from configuration instead.
    pub fn new(config: FleetConfig, handles: HashMap<String, DynBackend>) -> StorageResult<Self> {
        for warning in config.validate()? {
            warn!(%warning, "Fleet configuration warning");
        }

        let registry = Arc::new(BackendRegistry::new(&config, handles));
        info!(
            backends = config.backends.len(),
            primary = ?registry.current_primary_id(),
            auto_switch = config.auto_switch_enabled,
            "Fleet initialized"
        );

        Ok(Self {
            registry,
            query_timeout: config.query_timeout,
            merger: EntityMerger::new(),
            monitor: tokio::sync::Mutex::new(None),
        })
    }

    /// Opens every enabled backend in the configuration, provisions its
    /// schema, and builds the fleet.
    ///
    /// A backend that cannot be opened or provisioned is logged and left out;
    /// it stays in the registry as an unhealthy descriptor.
    pub async fn connect(config: FleetConfig) -> StorageResult<Self> {
        config.validate()?;

        let timeout = config.health.timeout;
        let mut handles = HashMap::new();
        for entry in config.backends.iter().filter(|e| e.enabled) {
            let backend = match open_backend(entry) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!(backend = %entry.id, error = %e, "Failed to open backend");
                    continue;
                }
            };

            match tokio::time::timeout(timeout, backend.initialize()).await {
                Ok(Ok(())) => {
                    handles.insert(entry.id.clone(), backend);
                }
                Ok(Err(e)) => {
                    warn!(backend = %entry.id, error = %e, "Failed to initialize backend schema");
                }
                Err(_) => {
                    warn!(
                        backend = %entry.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Timed out initializing backend schema"
                    );
                }
            }
        }

        Self::new(config, handles)
    }

    /// Returns the backend registry.
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Returns the per-backend timeout applied to request operations.
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }
}
