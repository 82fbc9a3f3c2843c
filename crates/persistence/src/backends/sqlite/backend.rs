//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::core::{Backend, BackendKind};
use crate::error::{BackendError, StorageError, StorageResult};

use super::schema;

/// SQLite backend for fleet entity storage.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    ///
    /// The pool holds a single connection that is never recycled, since every
    /// SQLite in-memory connection is its own database.
    pub fn in_memory() -> StorageResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(SqliteConnectionManager::memory())
            .map_err(connection_failed)?;

        let backend = Self {
            pool,
            config: SqliteBackendConfig {
                max_connections: 1,
                enable_wal: false,
                ..Default::default()
            },
            is_memory: true,
        };
        backend.configure_connection()?;
        Ok(backend)
    }

    /// Opens or creates a file-based SQLite database.
    ///
    /// `:memory:` yields an in-memory database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a backend with custom configuration.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        if path.as_ref().to_string_lossy() == ":memory:" {
            return Self::in_memory();
        }

        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(connection_failed)?;

        let backend = Self {
            pool,
            config,
            is_memory: false,
        };
        backend.configure_connection()?;
        Ok(backend)
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(connection_failed)
    }

    /// Runs `work` against a pooled connection on the blocking thread pool.
    ///
    /// Checkout and query both happen off the async runtime, so a caller's
    /// `tokio::time::timeout` can expire while SQLite waits on a lock.
    pub(crate) async fn run_blocking<T, F>(&self, work: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(connection_failed)?;
            work(&conn)
        })
        .await
        .map_err(|e| internal_error(format!("Blocking task failed: {}", e)))?
    }

    /// Configure connection settings.
    fn configure_connection(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;

        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms as u64))
            .map_err(|e| internal_error(format!("Failed to set busy timeout: {}", e)))?;

        if self.config.enable_wal && !self.is_memory {
            // journal_mode returns the resulting mode as a row.
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
                .map_err(|e| internal_error(format!("Failed to enable WAL mode: {}", e)))?;
        }

        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }
}

fn connection_failed(e: r2d2::Error) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message: e.to_string(),
    })
}

/// Helper to create an internal error.
fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

/// Narrows a storage error to the backend error the `Backend` trait reports.
fn into_backend_error(err: StorageError) -> BackendError {
    match err {
        StorageError::Backend(e) => e,
        other => BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: other.to_string(),
            source: None,
        },
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.run_blocking(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| internal_error(format!("Health check failed: {}", e)))
        })
        .await
        .map_err(|e| match e {
            StorageError::Backend(BackendError::ConnectionFailed { .. }) => {
                BackendError::Unavailable {
                    backend_name: "sqlite".to_string(),
                    message: "Failed to get connection".to_string(),
                }
            }
            other => into_backend_error(other),
        })
    }

    async fn database_size_mb(&self) -> Result<f64, BackendError> {
        let bytes: i64 = self
            .run_blocking(|conn| {
                conn.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| {
                    StorageError::Backend(BackendError::QueryError {
                        message: format!("Failed to measure database size: {}", e),
                    })
                })
            })
            .await
            .map_err(into_backend_error)?;
        Ok(bytes as f64 / (1024.0 * 1024.0))
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        self.run_blocking(|conn| schema::initialize_schema(conn))
            .await
            .map_err(into_backend_error)
    }
}
