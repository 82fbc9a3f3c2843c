//! SQLite backend implementation.
//!
//! This module provides a SQLite implementation of [`Backend`](crate::core::Backend)
//! and [`EntityStorage`](crate::core::EntityStorage). It supports both
//! in-memory databases (great for testing) and file-based databases.
//!
//! # Example
//!
//! ```no_run
//! use nimbus_persistence::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory database
//! let backend = SqliteBackend::in_memory()?;
//!
//! // Initialize the schema
//! backend.init_schema()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE entities (
//!     id TEXT PRIMARY KEY,          -- client-minted UUID
//!     kind TEXT NOT NULL,           -- user | folder | file | share | notification | session
//!     owner_id TEXT NOT NULL,
//!     sort_name TEXT,
//!     size_bytes INTEGER NOT NULL DEFAULT 0,
//!     data TEXT NOT NULL,           -- JSON document
//!     created_at TEXT NOT NULL,     -- RFC 3339, microseconds, UTC
//!     updated_at TEXT NOT NULL,
//!     deleted_at TEXT               -- files only
//! );
//! ```
//!
//! The database size reported to the health monitor is
//! `page_count * page_size`.

mod backend;
mod schema;
mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
