//! Nimbus Database Fleet
//!
//! This crate lets the Nimbus storage service run against several independent
//! relational databases at once. One of them is the *primary* and receives
//! every write; the rest are backups. A health monitor probes all of them,
//! tracks their size against a capacity ceiling, and promotes a backup when
//! the primary fills up. Reads fan out to every reachable database and merge,
//! so rows written to a retired primary stay visible.
//!
//! # Backend Features
//!
//! Enable backends with feature flags in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! nimbus-persistence = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! Available backend features:
//! - `sqlite` (default) - SQLite with in-memory and file modes
//! - `postgres` - PostgreSQL with JSONB storage
//!
//! # Architecture
//!
//! - [`types`] - stored entities, typed models and usage aggregates
//! - [`error`] - error types for all operations
//! - [`core`] - the per-database `Backend` and `EntityStorage` traits
//! - [`backends`] - SQLite and PostgreSQL implementations
//! - [`registry`] - backend descriptors, configuration, health probing and failover
//! - [`fleet`] - the fan-out aggregator the request layer talks to
//!
//! # Quick Start
//!
//! ```
//! use nimbus_persistence::core::BackendKind;
//! use nimbus_persistence::registry::FleetConfig;
//!
//! let config = FleetConfig::builder()
//!     .primary("db-1", BackendKind::Sqlite, ":memory:")
//!     .backup("db-2", BackendKind::Sqlite, ":memory:")
//!     .capacity_threshold(0.9)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.designated_primary().map(|b| b.id.as_str()), Some("db-1"));
//! assert_eq!(config.backups().count(), 1);
//! ```
//!
//! # Failover
//!
//! With auto-switch on, every probe cycle compares the primary's observed
//! size with `capacity_limit_mb * capacity_threshold`. At or above it, the
//! healthy backup with the lowest priority number that passes a fresh probe
//! becomes primary. If none qualifies, the old primary stays and the refusal
//! is logged. Capacity is a soft limit: writes between probes may overshoot.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod fleet;
pub mod registry;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{StorageError, StorageResult};
pub use fleet::{Fleet, FleetStatus};
pub use registry::{BackendEntry, BackendRegistry, FleetConfig};
pub use types::{EntityKind, StoredEntity};

// Re-export core traits
pub use core::{Backend, BackendKind, DynBackend, EntityStorage, FleetBackend};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
