//! Administrative operations on the fleet.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::backends::open_backend;
use crate::error::StorageResult;
use crate::registry::{BackendDescriptor, BackendEntry, HealthMonitor, ProbeReport};

use super::Fleet;

/// Snapshot of the registry for status pages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatus {
    /// Backend currently receiving writes.
    pub current_primary_id: Option<String>,
    /// Every descriptor, in priority order. Connections are not included.
    pub backends: Vec<BackendDescriptor>,
    /// Whether probing may fail over on its own.
    pub auto_switch_enabled: bool,
    /// When the last automatic failover happened.
    pub last_auto_switch_at: Option<DateTime<Utc>>,
}

impl FleetStatus {
    /// Returns true if no backend can take writes.
    pub fn is_degraded(&self) -> bool {
        self.current_primary_id.is_none()
    }
}

impl Fleet {
    /// Returns a snapshot of every backend and the current primary.
    pub fn get_status(&self) -> FleetStatus {
        FleetStatus {
            current_primary_id: self.registry.current_primary_id(),
            backends: self.registry.descriptors(),
            auto_switch_enabled: self.registry.auto_switch_enabled(),
            last_auto_switch_at: self.registry.last_auto_switch_at(),
        }
    }

    /// Makes `id` the primary.
    ///
    /// Returns false when the backend is inactive, unhealthy, or fails a
    /// fresh probe. Already being primary counts as success.
    #[instrument(skip(self))]
    pub async fn switch_primary(&self, id: &str) -> StorageResult<bool> {
        self.registry.switch_primary_to(id).await
    }

    /// Turns automatic failover on or off.
    pub fn set_auto_switch(&self, enabled: bool) {
        self.registry.set_auto_switch(enabled);
    }

    /// Runs a probe cycle immediately, including the capacity check.
    #[instrument(skip(self))]
    pub async fn run_health_checks_now(&self) -> ProbeReport {
        self.registry.probe_all().await
    }

    /// Opens a new backend and adds it to the fleet as a backup.
    #[instrument(skip(self, entry), fields(backend = %entry.id))]
    pub async fn add_backend(&self, entry: BackendEntry) -> StorageResult<BackendDescriptor> {
        entry.validate()?;
        let backend = open_backend(&entry)?;
        self.registry.add_backend(entry, backend).await
    }

    /// Activates or deactivates a backend. The primary cannot be deactivated.
    #[instrument(skip(self))]
    pub async fn set_backend_active(&self, id: &str, active: bool) -> StorageResult<()> {
        self.registry.set_active(id, active).await
    }

    /// Starts the background health monitor.
    ///
    /// Returns false if it is already running.
    pub async fn start_monitor(&self) -> bool {
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(HealthMonitor::is_running) {
            return false;
        }

        let mut fresh = HealthMonitor::new(self.registry.clone());
        fresh.start();
        *monitor = Some(fresh);
        info!(
            interval_ms = self.registry.health_config().check_interval.as_millis() as u64,
            "Health monitor started"
        );
        true
    }

    /// Stops the background health monitor, if running.
    pub async fn stop_monitor(&self) {
        if let Some(mut monitor) = self.monitor.lock().await.take() {
            monitor.stop().await;
            info!("Health monitor stopped");
        }
    }

    /// Returns true while the background health monitor runs.
    pub async fn monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(HealthMonitor::is_running)
    }
}
