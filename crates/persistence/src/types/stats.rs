//! Usage and statistics aggregates.
//!
//! Backends report these per database; the fleet sums them across every
//! reachable backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::EntityKind;

/// Storage consumed by one owner's files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    /// Live (not trashed) files.
    pub file_count: u64,
    /// Bytes held by live files.
    pub total_bytes: u64,
    /// Files in the trash.
    pub trashed_count: u64,
    /// Bytes held by trashed files.
    pub trashed_bytes: u64,
}

impl StorageUsage {
    /// Adds another backend's figures into this one.
    pub fn absorb(&mut self, other: &StorageUsage) {
        self.file_count += other.file_count;
        self.total_bytes += other.total_bytes;
        self.trashed_count += other.trashed_count;
        self.trashed_bytes += other.trashed_bytes;
    }
}

/// Row counts on a single backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatistics {
    /// Rows per kind, trashed files included.
    pub entity_counts: BTreeMap<EntityKind, u64>,
    /// Bytes held by every file row.
    pub total_file_bytes: u64,
}

impl BackendStatistics {
    /// Returns the row count for a kind.
    pub fn count(&self, kind: EntityKind) -> u64 {
        self.entity_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Returns the total number of rows.
    pub fn total_entities(&self) -> u64 {
        self.entity_counts.values().sum()
    }
}

/// Statistics summed over the fleet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatistics {
    /// Rows per kind across every reachable backend.
    pub entity_counts: BTreeMap<EntityKind, u64>,
    /// Bytes held by every file row across the fleet.
    pub total_file_bytes: u64,
    /// Per-backend breakdown, keyed by backend id.
    pub per_backend: BTreeMap<String, BackendStatistics>,
    /// Backends that could not be queried and are missing from the sums.
    pub unreachable_backends: Vec<String>,
}

impl FleetStatistics {
    /// Returns the summed row count for a kind.
    pub fn count(&self, kind: EntityKind) -> u64 {
        self.entity_counts.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_absorb() {
        let mut total = StorageUsage::default();
        total.absorb(&StorageUsage {
            file_count: 2,
            total_bytes: 300,
            trashed_count: 1,
            trashed_bytes: 50,
        });
        total.absorb(&StorageUsage {
            file_count: 1,
            total_bytes: 100,
            trashed_count: 0,
            trashed_bytes: 0,
        });
        assert_eq!(total.file_count, 3);
        assert_eq!(total.total_bytes, 400);
        assert_eq!(total.trashed_bytes, 50);
    }

    #[test]
    fn test_statistics_serialize_kind_keys() {
        let mut stats = BackendStatistics::default();
        stats.entity_counts.insert(EntityKind::File, 4);
        stats.entity_counts.insert(EntityKind::Folder, 1);

        assert_eq!(stats.count(EntityKind::File), 4);
        assert_eq!(stats.count(EntityKind::Share), 0);
        assert_eq!(stats.total_entities(), 5);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["entityCounts"]["file"], 4);
    }
}
