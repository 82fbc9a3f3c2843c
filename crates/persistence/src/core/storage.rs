//! Entity storage trait and fleet member bound.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::Backend;
use crate::error::StorageResult;
use crate::types::{BackendStatistics, EntityKind, StorageUsage, StoredEntity};

/// Which rows a listing returns with respect to the soft-delete marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashFilter {
    /// Only rows without `deleted_at`.
    #[default]
    Live,
    /// Only soft-deleted rows.
    Trashed,
    /// Both.
    All,
}

impl TrashFilter {
    /// Returns true if a row with the given soft-delete state passes the filter.
    pub fn admits(&self, deleted: bool) -> bool {
        match self {
            TrashFilter::Live => !deleted,
            TrashFilter::Trashed => deleted,
            TrashFilter::All => true,
        }
    }
}

/// Core storage trait for fleet entities on a single backend.
///
/// Every method acts on exactly one database. The fleet layer decides which
/// backend a call goes to; implementations never route on their own.
///
/// # Identity
///
/// Ids arrive pre-generated inside the [`StoredEntity`]. Backends must store
/// them as-is and never assign their own.
///
/// # Example
///
/// ```ignore
/// use nimbus_persistence::core::{EntityStorage, TrashFilter};
/// use nimbus_persistence::types::{EntityKind, StoredEntity};
/// use serde_json::json;
///
/// async fn example<S: EntityStorage>(storage: &S) -> Result<(), StorageError> {
///     let folder = StoredEntity::from_payload(
///         EntityKind::Folder,
///         json!({"ownerId": "u-1", "name": "Photos"}),
///     )?;
///     storage.insert(&folder).await?;
///
///     let found = storage.read(folder.id()).await?;
///     assert!(found.is_some());
///
///     let folders = storage
///         .list_by_owner(EntityKind::Folder, "u-1", TrashFilter::Live)
///         .await?;
///     assert_eq!(folders.len(), 1);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(AlreadyExists)` - the id is taken on this backend
    async fn insert(&self, entity: &StoredEntity) -> StorageResult<StoredEntity>;

    /// Reads an entity by id, including soft-deleted rows.
    async fn read(&self, id: &str) -> StorageResult<Option<StoredEntity>>;

    /// Lists every entity of `kind` owned by `owner_id`.
    ///
    /// Ordering is not significant; the fleet merger sorts the union.
    async fn list_by_owner(
        &self,
        kind: EntityKind,
        owner_id: &str,
        filter: TrashFilter,
    ) -> StorageResult<Vec<StoredEntity>>;

    /// Replaces the stored row for `entity.id()` with the given state, if the
    /// row's `updated_at` still equals `expected_updated_at`.
    ///
    /// Returns false when the row is gone or was changed in the meantime; the
    /// caller re-reads and retries. The check and the write are one statement.
    async fn update(
        &self,
        entity: &StoredEntity,
        expected_updated_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Permanently removes the row. Returns false if it did not exist.
    async fn delete(&self, id: &str) -> StorageResult<bool>;

    /// Sums file sizes owned by `owner_id`.
    async fn usage(&self, owner_id: &str) -> StorageResult<StorageUsage>;

    /// Counts rows per kind on this backend.
    async fn statistics(&self) -> StorageResult<BackendStatistics>;
}

/// A database that can take part in the fleet: probeable and able to store entities.
pub trait FleetBackend: Backend + EntityStorage {}

impl<T: Backend + EntityStorage> FleetBackend for T {}

/// Shared handle to a fleet member.
pub type DynBackend = Arc<dyn FleetBackend>;
