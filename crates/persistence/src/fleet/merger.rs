//! Merging of fan-out read results.
//!
//! Each backend answers a list query independently; the merger concatenates
//! the partial lists and restores the per-kind ordering that a single
//! database would have produced:
//!
//! | Kind | Order |
//! |------|-------|
//! | File, Notification, Share, Session | `created_at` descending |
//! | Folder, User | name ascending, case-insensitive |
//!
//! Ties break on id so the order is deterministic. Rows are not
//! de-duplicated; ids are client-minted and an entity lives in one backend.

use tracing::debug;

use crate::core::TrashFilter;
use crate::types::{EntityKind, StoredEntity};

/// Merges per-backend result lists into one ordered list.
#[derive(Debug, Clone)]
pub struct EntityMerger {
    /// Maximum rows to return.
    max_results: usize,
}

impl Default for EntityMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityMerger {
    /// Creates a merger with no row cap.
    pub fn new() -> Self {
        Self {
            max_results: usize::MAX,
        }
    }

    /// Caps the merged list at `max` rows.
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Merges partial results of a `kind` list query.
    ///
    /// Rows that do not pass `filter` are dropped, so a backend that returned
    /// trashed files to a live listing cannot leak them.
    pub fn merge(
        &self,
        kind: EntityKind,
        filter: TrashFilter,
        partials: Vec<(String, Vec<StoredEntity>)>,
    ) -> Vec<StoredEntity> {
        let total: usize = partials.iter().map(|(_, rows)| rows.len()).sum();
        let mut merged = Vec::with_capacity(total);

        for (backend_id, rows) in partials {
            debug!(backend = %backend_id, rows = rows.len(), "Merging partial result");
            merged.extend(
                rows.into_iter()
                    .filter(|row| row.kind() == kind && filter.admits(row.is_deleted())),
            );
        }

        let ordering = kind.ordering();
        merged.sort_by(|a, b| ordering.compare(a, b));
        merged.truncate(self.max_results);
        merged
    }
}
