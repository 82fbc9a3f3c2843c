//! Entity operations across the fleet.

use std::future::Future;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::core::{DynBackend, TrashFilter};
use crate::error::{BackendError, ResourceError, StorageResult};
use crate::registry::BackendHandle;
use crate::types::{Entity, EntityKind, FleetStatistics, StorageUsage, StoredEntity};

use super::Fleet;

/// Read-modify-write rounds before a contended update is rejected.
const MAX_WRITE_ATTEMPTS: usize = 8;

impl Fleet {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Creates an entity on the current primary.
    ///
    /// The payload is the kind-specific document; `id` is minted when absent.
    /// Fails with `NoPrimaryAvailable` when no primary is designated. A failed
    /// insert is reported as `WriteRejected` and is not retried elsewhere.
    #[instrument(skip(self, payload), fields(kind = %kind))]
    pub async fn create(&self, kind: EntityKind, payload: Value) -> StorageResult<StoredEntity> {
        let entity = StoredEntity::from_payload(kind, payload)?;
        self.insert_into_primary(&entity).await
    }

    pub(super) async fn insert_into_primary(
        &self,
        entity: &StoredEntity,
    ) -> StorageResult<StoredEntity> {
        let primary = self.registry.current_primary()?;
        debug!(backend = %primary.id, id = %entity.id(), "Routing insert to primary");

        let result =
            tokio::time::timeout(self.query_timeout, primary.backend.insert(entity)).await;
        self.settle_write(&primary.id, result)
    }

    /// Maps the outcome of a backend write call.
    ///
    /// Anything that went wrong inside the backend, a constraint violation
    /// included, becomes `WriteRejected` with the cause in its message.
    fn settle_write<T>(
        &self,
        backend_id: &str,
        result: Result<StorageResult<T>, tokio::time::error::Elapsed>,
    ) -> StorageResult<T> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(backend = %backend_id, error = %e, "Write rejected");
                Err(BackendError::WriteRejected {
                    backend_name: backend_id.to_string(),
                    message: e.to_string(),
                }
                .into())
            }
            Err(_) => {
                warn!(
                    backend = %backend_id,
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Write timed out"
                );
                Err(BackendError::WriteRejected {
                    backend_name: backend_id.to_string(),
                    message: format!("timed out after {} ms", self.query_timeout.as_millis()),
                }
                .into())
            }
        }
    }

    /// Read-modify-write on whichever backend holds `id`.
    ///
    /// `mutate` returns false when the entity needs no write. The write is
    /// conditional on the row's `updated_at` being unchanged since the read;
    /// if another writer got there first the row is read again and `mutate`
    /// runs on the fresh state. Returns `None` if no reachable backend has it.
    pub(super) async fn modify<F>(&self, id: &str, mutate: F) -> StorageResult<Option<StoredEntity>>
    where
        F: Fn(&mut StoredEntity) -> StorageResult<bool>,
    {
        let mut last_holder = String::new();
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some((holder, mut entity)) = self.locate(id).await else {
                return Ok(None);
            };
            let expected = entity.updated_at();
            if !mutate(&mut entity)? {
                return Ok(Some(entity));
            }

            let result = tokio::time::timeout(
                self.query_timeout,
                holder.backend.update(&entity, expected),
            )
            .await;
            if self.settle_write(&holder.id, result)? {
                return Ok(Some(entity));
            }
            debug!(backend = %holder.id, id, attempt, "Entity changed during update, retrying");
            last_holder = holder.id;
        }

        warn!(backend = %last_holder, id, "Giving up on contended update");
        Err(BackendError::WriteRejected {
            backend_name: last_holder,
            message: format!("{id} kept changing during {MAX_WRITE_ATTEMPTS} update attempts"),
        }
        .into())
    }

    /// Applies a JSON merge patch to an entity, on whichever backend holds it.
    ///
    /// Concurrent patches to the same entity never overwrite each other's
    /// fields. Returns `None` if no reachable backend has the entity.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: &Value) -> StorageResult<Option<StoredEntity>> {
        self.modify(id, |entity| {
            entity.apply_patch(patch)?;
            Ok(true)
        })
        .await
    }

    /// Moves a file to the trash.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: &str) -> StorageResult<Option<StoredEntity>> {
        self.modify(id, |entity| {
            if entity.is_deleted() {
                return Ok(false);
            }
            entity.mark_deleted()?;
            Ok(true)
        })
        .await
    }

    /// Takes a file out of the trash.
    #[instrument(skip(self))]
    pub async fn restore(&self, id: &str) -> StorageResult<Option<StoredEntity>> {
        self.modify(id, |entity| {
            if !entity.is_deleted() {
                return Ok(false);
            }
            entity.restore()?;
            Ok(true)
        })
        .await
    }

    /// Permanently removes an entity from the backend that holds it.
    ///
    /// Returns false if no reachable backend has it.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        let Some((holder, _)) = self.locate(id).await else {
            return Ok(false);
        };
        let result = tokio::time::timeout(self.query_timeout, holder.backend.delete(id)).await;
        self.settle_write(&holder.id, result)
    }

    /// Copies an entity to another owner.
    ///
    /// The copy gets a fresh id and lands on the current primary, wherever the
    /// source lives. The source is not modified.
    #[instrument(skip(self))]
    pub async fn copy_across_owners(
        &self,
        source_id: &str,
        new_owner_id: &str,
    ) -> StorageResult<StoredEntity> {
        let copy = self.prepare_copy(source_id, new_owner_id).await?;
        self.insert_into_primary(&copy).await
    }

    /// Builds, without storing, a copy of a live entity for another owner.
    pub(super) async fn prepare_copy(
        &self,
        source_id: &str,
        new_owner_id: &str,
    ) -> StorageResult<StoredEntity> {
        let Some((_, source)) = self.locate(source_id).await else {
            return Err(ResourceError::NotFound {
                id: source_id.to_string(),
            }
            .into());
        };
        if source.is_deleted() {
            return Err(ResourceError::Gone {
                kind: source.kind(),
                id: source.id().to_string(),
                deleted_at: source.deleted_at(),
            }
            .into());
        }

        Ok(source.copy_for_owner(new_owner_id))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Lists an owner's entities of one kind across every active backend.
    ///
    /// Trashed files are excluded. Backends that fail or time out are skipped.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        kind: EntityKind,
    ) -> StorageResult<Vec<StoredEntity>> {
        self.list_filtered(owner_id, kind, TrashFilter::Live).await
    }

    /// Lists an owner's trashed files across every active backend.
    #[instrument(skip(self))]
    pub async fn list_trash(&self, owner_id: &str) -> StorageResult<Vec<StoredEntity>> {
        self.list_filtered(owner_id, EntityKind::File, TrashFilter::Trashed)
            .await
    }

    async fn list_filtered(
        &self,
        owner_id: &str,
        kind: EntityKind,
        filter: TrashFilter,
    ) -> StorageResult<Vec<StoredEntity>> {
        let owner = owner_id.to_string();
        let partials = self
            .fan_out("list_by_owner", move |backend| {
                let owner = owner.clone();
                async move { backend.list_by_owner(kind, &owner, filter).await }
            })
            .await;

        Ok(self.merger.merge(kind, filter, partials))
    }

    /// Finds an entity by id on any active backend.
    ///
    /// All backends are queried at once and the first hit wins. Trashed files
    /// are returned as-is; callers check [`StoredEntity::is_deleted`].
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> StorageResult<Option<StoredEntity>> {
        Ok(self.locate(id).await.map(|(_, entity)| entity))
    }

    /// Races every active backend for `id` and returns the holder with the row.
    async fn locate(&self, id: &str) -> Option<(BackendHandle, StoredEntity)> {
        let timeout = self.query_timeout;
        let mut tasks = JoinSet::new();

        for handle in self.registry.list_active() {
            let id = id.to_string();
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, handle.backend.read(&id)).await;
                (handle, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((handle, Ok(Ok(Some(entity))))) => {
                    debug!(backend = %handle.id, "Entity located");
                    tasks.abort_all();
                    return Some((handle, entity));
                }
                Ok((_, Ok(Ok(None)))) => {}
                Ok((handle, Ok(Err(e)))) => {
                    warn!(backend = %handle.id, error = %e, "Skipping backend in lookup");
                }
                Ok((handle, Err(_))) => {
                    warn!(
                        backend = %handle.id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Backend timed out in lookup, skipping"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Task join error during lookup");
                }
            }
        }

        None
    }

    /// Sums an owner's file usage across every active backend.
    #[instrument(skip(self))]
    pub async fn storage_usage(&self, owner_id: &str) -> StorageResult<StorageUsage> {
        let owner = owner_id.to_string();
        let partials = self
            .fan_out("usage", move |backend| {
                let owner = owner.clone();
                async move { backend.usage(&owner).await }
            })
            .await;

        let mut total = StorageUsage::default();
        for (_, usage) in &partials {
            total.absorb(usage);
        }
        Ok(total)
    }

    /// Counts entities across every active backend.
    #[instrument(skip(self))]
    pub async fn statistics(&self) -> StorageResult<FleetStatistics> {
        let active: Vec<String> = self
            .registry
            .list_active()
            .into_iter()
            .map(|h| h.id)
            .collect();
        let partials = self
            .fan_out("statistics", |backend| async move { backend.statistics().await })
            .await;

        let mut stats = FleetStatistics::default();
        for (backend_id, backend_stats) in partials {
            for (kind, count) in &backend_stats.entity_counts {
                *stats.entity_counts.entry(*kind).or_insert(0) += count;
            }
            stats.total_file_bytes += backend_stats.total_file_bytes;
            stats.per_backend.insert(backend_id, backend_stats);
        }
        stats.unreachable_backends = active
            .into_iter()
            .filter(|id| !stats.per_backend.contains_key(id))
            .collect();

        Ok(stats)
    }

    /// Runs `query` on every active backend concurrently.
    ///
    /// Waits for every task to settle. Failures and timeouts are logged and
    /// left out; successful results come back in priority order.
    async fn fan_out<T, F, Fut>(&self, operation: &'static str, query: F) -> Vec<(String, T)>
    where
        T: Send + 'static,
        F: Fn(DynBackend) -> Fut,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        let timeout = self.query_timeout;
        let mut tasks = JoinSet::new();

        for (rank, handle) in self.registry.list_active().into_iter().enumerate() {
            let call = query(handle.backend.clone());
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, call).await;
                (rank, handle.id, result)
            });
        }

        let mut collected = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((rank, backend_id, Ok(Ok(value)))) => collected.push((rank, backend_id, value)),
                Ok((_, backend_id, Ok(Err(e)))) => {
                    warn!(backend = %backend_id, operation, error = %e, "Skipping backend in fan-out read");
                }
                Ok((_, backend_id, Err(_))) => {
                    warn!(
                        backend = %backend_id,
                        operation,
                        timeout_ms = timeout.as_millis() as u64,
                        "Backend timed out in fan-out read, skipping"
                    );
                }
                Err(e) => {
                    warn!(operation, error = %e, "Task join error during fan-out read");
                }
            }
        }

        collected.sort_by_key(|(rank, _, _)| *rank);
        collected
            .into_iter()
            .map(|(_, backend_id, value)| (backend_id, value))
            .collect()
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    /// Creates a typed entity on the current primary.
    pub async fn create_entity<E: Entity>(&self, entity: &E) -> StorageResult<E> {
        let stored = self.create(E::KIND, entity.to_payload()?).await?;
        E::from_stored(&stored)
    }

    /// Finds a typed entity by id. An entity of another kind counts as absent.
    pub async fn find_entity<E: Entity>(&self, id: &str) -> StorageResult<Option<E>> {
        match self.find_by_id(id).await? {
            Some(stored) if stored.kind() == E::KIND => Ok(Some(E::from_stored(&stored)?)),
            _ => Ok(None),
        }
    }

    /// Lists an owner's typed entities across the fleet.
    pub async fn list_entities<E: Entity>(&self, owner_id: &str) -> StorageResult<Vec<E>> {
        self.list_by_owner(owner_id, E::KIND)
            .await?
            .iter()
            .map(E::from_stored)
            .collect()
    }
}
