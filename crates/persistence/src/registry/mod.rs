//! Backend registry and health monitor.
//!
//! The registry is the single source of truth for which databases exist,
//! which of them are reachable, how full each one is, and which one takes
//! writes.
//!
//! # Locking
//!
//! | State | Guard |
//! |-------|-------|
//! | Descriptor list and connection handles | `parking_lot::RwLock` |
//! | Role changes (failover, switch, add, deactivate) | `tokio::sync::Mutex` role lock |
//! | Auto-switch toggle | `AtomicBool` |
//!
//! Reading the primary and flipping roles both go through the same `RwLock`,
//! so a request can never observe a half-finished switch. The role lock
//! serializes switches against each other; probes run without it.
//!
//! # Example
//!
//! ```ignore
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use nimbus_persistence::registry::{BackendRegistry, FleetConfig};
//!
//! let registry = Arc::new(BackendRegistry::new(&config, handles));
//!
//! let primary = registry.current_primary()?;
//! let report = registry.probe_all().await;
//! if let Some(new_primary) = report.promoted() {
//!     println!("failed over to {new_primary}");
//! }
//! ```

mod config;
mod descriptor;
mod failover;
mod health;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::DynBackend;
use crate::error::{FleetError, StorageResult};

pub use config::{
    BackendEntry, ConfigError, ConfigWarning, FleetConfig, FleetConfigBuilder, HealthConfig,
};
pub use descriptor::BackendDescriptor;
pub use health::{
    FailoverOutcome, HealthCheckResult, HealthMonitor, ProbeOutcome, ProbeReport, check_backend,
};

/// A connection handle paired with the backend it belongs to.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    /// Backend identifier.
    pub id: String,
    /// Failover rank.
    pub priority: i32,
    /// The connection.
    pub backend: DynBackend,
}

#[derive(Debug)]
struct BackendSlot {
    descriptor: BackendDescriptor,
    handle: Option<DynBackend>,
}

impl BackendSlot {
    fn handle(&self) -> Option<BackendHandle> {
        self.handle.as_ref().map(|backend| BackendHandle {
            id: self.descriptor.id.clone(),
            priority: self.descriptor.priority,
            backend: backend.clone(),
        })
    }
}

/// Registry of every configured backend.
pub struct BackendRegistry {
    slots: RwLock<Vec<BackendSlot>>,
    role_lock: tokio::sync::Mutex<()>,
    auto_switch: AtomicBool,
    last_auto_switch_at: RwLock<Option<DateTime<Utc>>>,
    health: HealthConfig,
}

impl BackendRegistry {
    /// Creates a registry from configuration and already-open connections.
    ///
    /// Enabled entries without a connection are kept as descriptors but are
    /// unhealthy and excluded from every fan-out.
    pub fn new(config: &FleetConfig, mut handles: HashMap<String, DynBackend>) -> Self {
        let mut slots: Vec<BackendSlot> = config
            .backends
            .iter()
            .map(|entry| {
                let mut descriptor = BackendDescriptor::from_entry(entry);
                let handle = handles.remove(&entry.id);
                if handle.is_none() && entry.enabled {
                    descriptor.is_healthy = false;
                    descriptor.last_error = Some("no connection established".to_string());
                }
                BackendSlot { descriptor, handle }
            })
            .collect();
        slots.sort_by_key(|slot| slot.descriptor.priority);

        for id in handles.keys() {
            warn!(backend = %id, "Connection has no matching configuration entry, ignoring");
        }

        Self {
            slots: RwLock::new(slots),
            role_lock: tokio::sync::Mutex::new(()),
            auto_switch: AtomicBool::new(config.auto_switch_enabled),
            last_auto_switch_at: RwLock::new(None),
            health: config.health.clone(),
        }
    }

    /// Returns the probe configuration.
    pub fn health_config(&self) -> &HealthConfig {
        &self.health
    }

    /// Returns every active backend with a connection, by priority.
    ///
    /// Health is not considered: a backend whose last probe failed may still
    /// answer reads.
    pub fn list_active(&self) -> Vec<BackendHandle> {
        self.slots
            .read()
            .iter()
            .filter(|slot| slot.descriptor.is_active)
            .filter_map(BackendSlot::handle)
            .collect()
    }

    /// Returns the current write target.
    ///
    /// # Errors
    ///
    /// * `FleetError::NoPrimaryAvailable` - no descriptor is primary, or the
    ///   primary has no connection
    pub fn current_primary(&self) -> StorageResult<BackendHandle> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.descriptor.is_primary)
            .and_then(BackendSlot::handle)
            .ok_or_else(|| FleetError::NoPrimaryAvailable.into())
    }

    /// Returns the id of the current primary, if any.
    pub fn current_primary_id(&self) -> Option<String> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.descriptor.is_primary)
            .map(|slot| slot.descriptor.id.clone())
    }

    /// Returns a snapshot of every descriptor, by priority.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.slots
            .read()
            .iter()
            .map(|slot| slot.descriptor.clone())
            .collect()
    }

    /// Returns a snapshot of one descriptor.
    pub fn descriptor(&self, id: &str) -> Option<BackendDescriptor> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.descriptor.id == id)
            .map(|slot| slot.descriptor.clone())
    }

    /// Returns true if probing may trigger failover.
    pub fn auto_switch_enabled(&self) -> bool {
        self.auto_switch.load(Ordering::SeqCst)
    }

    /// Enables or disables automatic failover.
    pub fn set_auto_switch(&self, enabled: bool) {
        let previous = self.auto_switch.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Auto-switch toggled");
        }
    }

    /// Returns when probing last promoted a backup.
    pub fn last_auto_switch_at(&self) -> Option<DateTime<Utc>> {
        *self.last_auto_switch_at.read()
    }

    /// Probes a single backend and records the result.
    ///
    /// # Errors
    ///
    /// * `FleetError::UnknownBackend` - no backend has this id
    pub async fn probe_one(&self, id: &str) -> StorageResult<HealthCheckResult> {
        let handle = {
            let slots = self.slots.read();
            let slot = slots
                .iter()
                .find(|slot| slot.descriptor.id == id)
                .ok_or_else(|| FleetError::UnknownBackend {
                    backend_id: id.to_string(),
                })?;
            slot.handle.clone()
        };

        let result = match handle {
            Some(backend) => check_backend(backend, self.health.timeout).await,
            None => HealthCheckResult::Unhealthy {
                error: "no connection established".to_string(),
            },
        };
        self.apply_probe(id, &result);
        Ok(result)
    }

    /// Probes every active backend concurrently, then fails over if the
    /// primary has reached the capacity threshold and auto-switch is on.
    pub async fn probe_all(&self) -> ProbeReport {
        let targets: Vec<(String, Option<DynBackend>)> = self
            .slots
            .read()
            .iter()
            .filter(|slot| slot.descriptor.is_active)
            .map(|slot| (slot.descriptor.id.clone(), slot.handle.clone()))
            .collect();

        let mut probes = JoinSet::new();
        for (index, (id, handle)) in targets.iter().enumerate() {
            let Some(backend) = handle.clone() else {
                continue;
            };
            let timeout = self.health.timeout;
            debug!(backend = %id, "Probing backend");
            probes.spawn(async move { (index, check_backend(backend, timeout).await) });
        }

        let mut results: Vec<Option<HealthCheckResult>> = vec![None; targets.len()];
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "Probe task failed"),
            }
        }

        let mut report = ProbeReport::default();
        for ((id, _), result) in targets.into_iter().zip(results) {
            let result = result.unwrap_or_else(|| HealthCheckResult::Unhealthy {
                error: "no connection established".to_string(),
            });
            self.apply_probe(&id, &result);
            report.results.push(ProbeOutcome {
                backend_id: id,
                result,
            });
        }

        if self.auto_switch_enabled() {
            report.failover = self.failover_if_over_capacity().await;
        }
        report
    }

    /// Records a probe result on the descriptor it belongs to.
    fn apply_probe(&self, id: &str, result: &HealthCheckResult) {
        let mut slots = self.slots.write();
        let Some(slot) = slots.iter_mut().find(|slot| slot.descriptor.id == id) else {
            return;
        };
        match result {
            HealthCheckResult::Healthy {
                size_mb,
                response_time_ms,
            } => {
                slot.descriptor.record_success(*size_mb, *response_time_ms);
                debug!(
                    backend = %id,
                    size_mb = *size_mb,
                    usage = slot.descriptor.usage_percent(),
                    "Backend healthy"
                );
            }
            failed => {
                let error = failed.error_message().unwrap_or_default();
                slot.descriptor.record_failure(error);
            }
        }
    }

    /// Registers a backend at runtime.
    ///
    /// The connection is health-checked and its schema provisioned before the
    /// descriptor is appended. A runtime-added backend is never made primary;
    /// use [`switch_primary_to`](Self::switch_primary_to) for that.
    ///
    /// # Errors
    ///
    /// * `FleetError::DuplicateBackend` - the id is already registered
    /// * `StorageError::Config` - the entry is invalid
    /// * `StorageError::Backend` - the connection or schema check failed
    pub async fn add_backend(
        &self,
        entry: BackendEntry,
        backend: DynBackend,
    ) -> StorageResult<BackendDescriptor> {
        entry.validate()?;
        let _guard = self.role_lock.lock().await;

        if self.descriptor(&entry.id).is_some() {
            return Err(FleetError::DuplicateBackend {
                backend_id: entry.id.clone(),
            }
            .into());
        }

        let result = check_backend(backend.clone(), self.health.timeout).await;
        if let Some(error) = result.error_message() {
            return Err(crate::error::BackendError::ConnectionFailed {
                backend_name: entry.id.clone(),
                message: error,
            }
            .into());
        }
        self.ensure_schema(&entry.id, &backend).await?;

        let mut descriptor = BackendDescriptor::from_entry(&entry);
        descriptor.is_primary = false;
        if let HealthCheckResult::Healthy {
            size_mb,
            response_time_ms,
        } = result
        {
            descriptor.record_success(size_mb, response_time_ms);
        }

        {
            let mut slots = self.slots.write();
            slots.push(BackendSlot {
                descriptor: descriptor.clone(),
                handle: Some(backend),
            });
            slots.sort_by_key(|slot| slot.descriptor.priority);
        }

        info!(
            backend = %descriptor.id,
            priority = descriptor.priority,
            active = descriptor.is_active,
            "Backend added"
        );
        Ok(descriptor)
    }

    /// Activates or deactivates a backend.
    ///
    /// # Errors
    ///
    /// * `FleetError::UnknownBackend` - no backend has this id
    /// * `FleetError::PrimaryDeactivation` - the backend is the current primary
    pub async fn set_active(&self, id: &str, active: bool) -> StorageResult<()> {
        let _guard = self.role_lock.lock().await;
        let mut slots = self.slots.write();
        let slot = slots
            .iter_mut()
            .find(|slot| slot.descriptor.id == id)
            .ok_or_else(|| FleetError::UnknownBackend {
                backend_id: id.to_string(),
            })?;

        if !active && slot.descriptor.is_primary {
            return Err(FleetError::PrimaryDeactivation {
                backend_id: id.to_string(),
            }
            .into());
        }
        if slot.descriptor.is_active != active {
            slot.descriptor.is_active = active;
            info!(backend = %id, active, "Backend activation changed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.descriptors())
            .field("auto_switch", &self.auto_switch_enabled())
            .finish()
    }
}
