//! PostgreSQL backend implementation.
//!
//! Connection pooling via deadpool-postgres, JSONB storage for entity data and
//! native TIMESTAMPTZ for timestamps. The database size reported to the health
//! monitor is `pg_database_size(current_database())`.
//!
//! # Example
//!
//! ```no_run
//! use nimbus_persistence::backends::postgres::PostgresBackend;
//!
//! # async fn main_example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = PostgresBackend::from_connection_string("postgres://nimbus@db-2/nimbus")?;
//!
//! // Initialize the schema
//! backend.init_schema().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS entities (
//!     id TEXT PRIMARY KEY,
//!     kind TEXT NOT NULL,
//!     owner_id TEXT NOT NULL,
//!     sort_name TEXT,
//!     size_bytes BIGINT NOT NULL DEFAULT 0,
//!     data JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     deleted_at TIMESTAMPTZ
//! );
//! ```

mod backend;
mod schema;
mod storage;

pub use backend::{PostgresBackend, PostgresConfig, PostgresSslMode};
