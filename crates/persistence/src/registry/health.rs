//! Health probing for fleet backends.
//!
//! A probe is a liveness check followed by a size query, bounded by the
//! health timeout. [`HealthMonitor`] runs [`BackendRegistry::probe_all`] on a
//! fixed interval in the background; the registry applies the results and
//! decides on failover.
//!
//! # Example
//!
//! ```ignore
//! use nimbus_persistence::registry::HealthMonitor;
//!
//! let mut monitor = HealthMonitor::new(registry.clone());
//!
//! // Start background health checks
//! let handle = monitor.start();
//!
//! // ... later
//! monitor.stop().await;
//! handle.await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::DynBackend;
use crate::error::FleetError;

use super::BackendRegistry;

/// Health check result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum HealthCheckResult {
    /// Health check passed.
    #[serde(rename_all = "camelCase")]
    Healthy {
        /// Database size in megabytes.
        size_mb: f64,
        /// Response time in milliseconds.
        response_time_ms: u64,
    },
    /// Health check failed.
    Unhealthy {
        /// Error message.
        error: String,
    },
    /// Health check timed out.
    Timeout,
}

impl HealthCheckResult {
    /// Returns true if the probe succeeded.
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthCheckResult::Healthy { .. })
    }

    /// Returns the failure description, if the probe failed.
    pub fn error_message(&self) -> Option<String> {
        match self {
            HealthCheckResult::Healthy { .. } => None,
            HealthCheckResult::Unhealthy { error } => Some(error.clone()),
            HealthCheckResult::Timeout => Some("health check timed out".to_string()),
        }
    }
}

/// Performs a single health check for a backend.
pub async fn check_backend(backend: DynBackend, timeout: Duration) -> HealthCheckResult {
    let start = Instant::now();

    let check = async {
        backend.health_check().await?;
        backend.database_size_mb().await
    };

    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(size_mb)) => HealthCheckResult::Healthy {
            size_mb,
            response_time_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(e)) => HealthCheckResult::Unhealthy {
            error: e.to_string(),
        },
        Err(_) => HealthCheckResult::Timeout,
    }
}

/// Result of probing one backend during a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    /// Backend identifier.
    pub backend_id: String,
    /// What the probe observed.
    pub result: HealthCheckResult,
}

/// What a probe cycle did about the primary.
#[derive(Debug)]
pub enum FailoverOutcome {
    /// A backup was promoted.
    Promoted {
        /// Demoted primary, if there was one.
        from: Option<String>,
        /// New primary.
        to: String,
    },
    /// The primary is over capacity and no backup qualified.
    Refused(FleetError),
}

/// Everything a call to [`BackendRegistry::probe_all`] observed and did.
#[derive(Debug, Default)]
pub struct ProbeReport {
    /// One entry per probed backend, in priority order.
    pub results: Vec<ProbeOutcome>,
    /// Set when the primary was over capacity and auto-switch was on.
    pub failover: Option<FailoverOutcome>,
}

impl ProbeReport {
    /// Returns the probe result for a backend.
    pub fn result(&self, backend_id: &str) -> Option<&HealthCheckResult> {
        self.results
            .iter()
            .find(|o| o.backend_id == backend_id)
            .map(|o| &o.result)
    }

    /// Returns the number of healthy backends.
    pub fn healthy_count(&self) -> usize {
        self.results.iter().filter(|o| o.result.is_healthy()).count()
    }

    /// Returns the newly promoted primary, if a failover happened.
    pub fn promoted(&self) -> Option<&str> {
        match &self.failover {
            Some(FailoverOutcome::Promoted { to, .. }) => Some(to),
            _ => None,
        }
    }
}

/// Background probe loop for a registry.
pub struct HealthMonitor {
    /// Registry to probe.
    registry: Arc<BackendRegistry>,

    /// Shutdown channel.
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl HealthMonitor {
    /// Creates a new health monitor.
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            shutdown_tx: None,
        }
    }

    /// Starts background health checking.
    ///
    /// The first cycle runs immediately.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = mpsc::channel(1);
        self.shutdown_tx = Some(tx);

        let registry = self.registry.clone();
        let interval = registry.health_config().check_interval;

        tokio::spawn(async move {
            Self::health_check_loop(rx, registry, interval).await;
        })
    }

    /// Returns true while the background task has not been told to stop.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Stops the health monitor.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// Background health check loop.
    async fn health_check_loop(
        mut shutdown_rx: mpsc::Receiver<()>,
        registry: Arc<BackendRegistry>,
        check_interval: Duration,
    ) {
        let mut interval = tokio::time::interval(check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Health monitor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let report = registry.probe_all().await;
                    debug!(
                        probed = report.results.len(),
                        healthy = report.healthy_count(),
                        "Probe cycle finished"
                    );
                    if let Some(FailoverOutcome::Refused(err)) = &report.failover {
                        warn!(error = %err, "Primary over capacity");
                    }
                }
            }
        }
    }
}
