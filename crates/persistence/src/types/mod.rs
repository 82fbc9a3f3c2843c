//! Core types for the persistence layer.
//!
//! - [`StoredEntity`] - an entity with persistence metadata
//! - [`EntityKind`] - the logical kinds and their per-kind rules
//! - [`Entity`] and the typed models ([`User`], [`Folder`], [`FileEntry`],
//!   [`Share`], [`Notification`], [`UserSession`])
//! - [`StorageUsage`], [`BackendStatistics`], [`FleetStatistics`] - aggregates
//!
//! # Examples
//!
//! ```
//! use nimbus_persistence::types::{Entity, EntityKind, FileEntry, StoredEntity};
//! use serde_json::json;
//!
//! let stored = StoredEntity::from_payload(
//!     EntityKind::File,
//!     json!({
//!         "ownerId": "u-1",
//!         "name": "report.pdf",
//!         "filePath": "blobs/9f/report.pdf",
//!         "size": 2048
//!     }),
//! )
//! .unwrap();
//!
//! let file = FileEntry::from_stored(&stored).unwrap();
//! assert_eq!(file.size, 2048);
//! assert_eq!(file.deleted_at, None);
//! ```

pub(crate) mod entity;
mod models;
mod stats;

pub use entity::{EntityKind, EntityOrdering, StoredEntity, new_entity_id};
pub use models::{
    Entity, FileEntry, Folder, Notification, NotificationCategory, Share, ShareStatus, User,
    UserSession,
};
pub use stats::{BackendStatistics, FleetStatistics, StorageUsage};
