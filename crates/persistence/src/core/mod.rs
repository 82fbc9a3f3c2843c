//! Core storage traits and abstractions.
//!
//! This module provides the foundational traits for the persistence layer:
//!
//! - [`Backend`] - liveness, size and schema for one database instance
//! - [`EntityStorage`] - entity CRUD against one database instance
//! - [`FleetBackend`] - both of the above, the bound the registry stores
//!
//! # Trait Hierarchy
//!
//! ```text
//! Backend ─────┐
//!              ├── FleetBackend  (blanket impl)
//! EntityStorage┘
//! ```
//!
//! # Example: Implementing a Storage Backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use nimbus_persistence::core::{Backend, BackendKind, EntityStorage};
//! use nimbus_persistence::error::{BackendError, StorageResult};
//! use nimbus_persistence::types::StoredEntity;
//!
//! #[derive(Debug)]
//! struct MyBackend {
//!     // ... backend-specific fields
//! }
//!
//! #[async_trait]
//! impl Backend for MyBackend {
//!     fn kind(&self) -> BackendKind {
//!         BackendKind::Sqlite
//!     }
//!
//!     async fn health_check(&self) -> Result<(), BackendError> {
//!         // Implementation...
//!         todo!()
//!     }
//!
//!     // ... implement other required methods
//! }
//! ```

pub mod backend;
pub mod storage;

// Re-export main types
pub use backend::{Backend, BackendKind};
pub use storage::{DynBackend, EntityStorage, FleetBackend, TrashFilter};
