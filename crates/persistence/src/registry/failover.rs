//! Primary role transitions.
//!
//! Both the automatic path ([`BackendRegistry::failover_to_best_backup`]) and
//! the administrative one ([`BackendRegistry::switch_primary_to`]) hold the
//! role lock for their whole run, re-probe the candidate, provision its schema
//! and only then swap the primary flag under the descriptor write lock.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::DynBackend;
use crate::error::{BackendError, FleetError, StorageResult};

use super::{BackendRegistry, FailoverOutcome, check_backend};

impl BackendRegistry {
    /// Promotes the best healthy backup.
    ///
    /// Candidates are active, healthy, non-primary backends in priority order.
    /// The first one that passes a fresh probe, is itself under the capacity
    /// threshold and accepts its schema becomes primary. Returns false, with
    /// no state change, when nothing qualifies.
    pub async fn failover_to_best_backup(&self) -> bool {
        let _guard = self.role_lock.lock().await;
        self.promote_best_backup().await.is_some()
    }

    /// Makes `id` the primary.
    ///
    /// Returns `Ok(true)` if `id` is primary afterwards (including when it
    /// already was) and `Ok(false)` if it is inactive, has no connection,
    /// fails a fresh probe or rejects schema provisioning. The capacity
    /// threshold is not enforced here.
    ///
    /// # Errors
    ///
    /// * `FleetError::UnknownBackend` - no backend has this id
    pub async fn switch_primary_to(&self, id: &str) -> StorageResult<bool> {
        let _guard = self.role_lock.lock().await;

        let (is_primary, is_active, handle) = {
            let slots = self.slots.read();
            let slot = slots
                .iter()
                .find(|slot| slot.descriptor.id == id)
                .ok_or_else(|| FleetError::UnknownBackend {
                    backend_id: id.to_string(),
                })?;
            (
                slot.descriptor.is_primary,
                slot.descriptor.is_active,
                slot.handle.clone(),
            )
        };

        if is_primary {
            debug!(backend = %id, "Backend is already primary");
            return Ok(true);
        }
        if !is_active {
            warn!(backend = %id, "Refusing to switch primary to an inactive backend");
            return Ok(false);
        }
        let Some(backend) = handle else {
            warn!(backend = %id, "Refusing to switch primary to a backend without a connection");
            return Ok(false);
        };

        let result = check_backend(backend.clone(), self.health.timeout).await;
        self.apply_probe(id, &result);
        if !result.is_healthy() {
            warn!(backend = %id, "Refusing to switch primary: probe failed");
            return Ok(false);
        }
        if let Err(e) = self.ensure_schema(id, &backend).await {
            warn!(backend = %id, error = %e, "Refusing to switch primary: schema check failed");
            return Ok(false);
        }

        self.set_primary(id, false);
        Ok(true)
    }

    /// Runs failover if the primary has reached the capacity threshold.
    pub(super) async fn failover_if_over_capacity(&self) -> Option<FailoverOutcome> {
        let threshold = self.health.capacity_threshold;
        let primary = self
            .descriptors()
            .into_iter()
            .find(|d| d.is_primary && d.is_over(threshold))?;

        info!(
            primary = %primary.id,
            usage = primary.usage_percent(),
            threshold = threshold * 100.0,
            "Primary reached capacity threshold, failing over"
        );

        let _guard = self.role_lock.lock().await;
        // A concurrent switch may already have moved the role.
        if self.current_primary_id().as_deref() != Some(primary.id.as_str()) {
            return None;
        }

        match self.promote_best_backup().await {
            Some(to) => Some(FailoverOutcome::Promoted {
                from: Some(primary.id),
                to,
            }),
            None => {
                let err = FleetError::FailoverNoEligibleBackup {
                    primary_id: primary.id.clone(),
                    usage_percent: primary.usage_percent(),
                };
                warn!(primary = %primary.id, error = %err, "Failover refused");
                Some(FailoverOutcome::Refused(err))
            }
        }
    }

    /// Picks and promotes a backup. The caller holds the role lock.
    async fn promote_best_backup(&self) -> Option<String> {
        let threshold = self.health.capacity_threshold;
        let candidates: Vec<(String, DynBackend)> = self
            .slots
            .read()
            .iter()
            .filter(|slot| {
                let d = &slot.descriptor;
                !d.is_primary && d.is_active && d.is_healthy
            })
            .filter_map(|slot| {
                slot.handle
                    .clone()
                    .map(|backend| (slot.descriptor.id.clone(), backend))
            })
            .collect();

        for (id, backend) in candidates {
            let result = check_backend(backend.clone(), self.health.timeout).await;
            self.apply_probe(&id, &result);
            if !result.is_healthy() {
                debug!(backend = %id, "Failover candidate failed its probe");
                continue;
            }
            if self.descriptor(&id).is_some_and(|d| d.is_over(threshold)) {
                debug!(backend = %id, "Failover candidate is itself over capacity");
                continue;
            }
            if let Err(e) = self.ensure_schema(&id, &backend).await {
                warn!(backend = %id, error = %e, "Failover candidate rejected schema provisioning");
                continue;
            }

            self.set_primary(&id, true);
            return Some(id);
        }

        warn!("No eligible backup for failover");
        None
    }

    /// Flips the primary flag to `id` in one write.
    fn set_primary(&self, id: &str, automatic: bool) {
        let previous = {
            let mut slots = self.slots.write();
            let mut previous = None;
            for slot in slots.iter_mut() {
                if slot.descriptor.is_primary && slot.descriptor.id != id {
                    previous = Some(slot.descriptor.id.clone());
                }
                slot.descriptor.is_primary = slot.descriptor.id == id;
            }
            previous
        };

        if automatic {
            *self.last_auto_switch_at.write() = Some(Utc::now());
        }
        info!(
            primary = %id,
            previous = previous.as_deref().unwrap_or("none"),
            automatic,
            "Primary switched"
        );
    }

    /// Provisions the entity schema on a backend within the health timeout.
    pub(super) async fn ensure_schema(&self, id: &str, backend: &DynBackend) -> StorageResult<()> {
        match tokio::time::timeout(self.health.timeout, backend.initialize()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(BackendError::Timeout {
                backend_name: id.to_string(),
                timeout_ms: self.health.timeout.as_millis() as u64,
            }
            .into()),
        }
    }
}
