//! Test harness infrastructure for fleet testing.
//!
//! [`ControllableBackend`] wraps an in-memory SQLite database and lets a test
//! cut it off from the network, slow it down, or make it report an arbitrary
//! size.
//! [`TestFleet`] wires a set of them into a [`Fleet`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use nimbus_persistence::backends::sqlite::SqliteBackend;
use nimbus_persistence::core::{Backend, BackendKind, DynBackend, EntityStorage, TrashFilter};
use nimbus_persistence::error::{BackendError, StorageError, StorageResult};
use nimbus_persistence::fleet::Fleet;
use nimbus_persistence::registry::{BackendEntry, FleetConfig, HealthConfig};
use nimbus_persistence::types::{BackendStatistics, EntityKind, StorageUsage, StoredEntity};

/// An in-memory SQLite backend that can be switched off or made to look full.
#[derive(Debug)]
pub struct ControllableBackend {
    id: String,
    inner: SqliteBackend,
    reachable: AtomicBool,
    scripted_size_mb: Mutex<Option<f64>>,
    latency: Mutex<Duration>,
    inserts: AtomicUsize,
}

impl ControllableBackend {
    /// Creates a reachable backend with its schema in place.
    pub fn new(id: &str) -> Arc<Self> {
        let inner = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
        inner.init_schema().expect("Failed to initialize schema");
        Arc::new(Self {
            id: id.to_string(),
            inner,
            reachable: AtomicBool::new(true),
            scripted_size_mb: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            inserts: AtomicUsize::new(0),
        })
    }

    /// Makes every call fail as if the database went away.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Makes size probes report `size_mb` instead of the real file size.
    pub fn set_size_mb(&self, size_mb: f64) {
        *self.scripted_size_mb.lock() = Some(size_mb);
    }

    /// Delays every call by `latency` before it reaches the database.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Number of inserts this backend has accepted.
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Returns the wrapped SQLite backend, bypassing reachability.
    pub fn inner(&self) -> &SqliteBackend {
        &self.inner
    }

    async fn check_reachable(&self) -> Result<(), BackendError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable {
                backend_name: self.id.clone(),
                message: "connection refused".to_string(),
            })
        }
    }

    async fn guard(&self) -> StorageResult<()> {
        self.check_reachable().await.map_err(StorageError::from)
    }
}

#[async_trait]
impl Backend for ControllableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "controllable"
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.check_reachable().await?;
        self.inner.health_check().await
    }

    async fn database_size_mb(&self) -> Result<f64, BackendError> {
        self.check_reachable().await?;
        let scripted = *self.scripted_size_mb.lock();
        match scripted {
            Some(size_mb) => Ok(size_mb),
            None => self.inner.database_size_mb().await,
        }
    }

    async fn initialize(&self) -> Result<(), BackendError> {
        self.check_reachable().await?;
        self.inner.initialize().await
    }
}

#[async_trait]
impl EntityStorage for ControllableBackend {
    fn backend_name(&self) -> &'static str {
        "controllable"
    }

    async fn insert(&self, entity: &StoredEntity) -> StorageResult<StoredEntity> {
        self.guard().await?;
        let stored = self.inner.insert(entity).await?;
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn read(&self, id: &str) -> StorageResult<Option<StoredEntity>> {
        self.guard().await?;
        self.inner.read(id).await
    }

    async fn list_by_owner(
        &self,
        kind: EntityKind,
        owner_id: &str,
        filter: TrashFilter,
    ) -> StorageResult<Vec<StoredEntity>> {
        self.guard().await?;
        self.inner.list_by_owner(kind, owner_id, filter).await
    }

    async fn update(
        &self,
        entity: &StoredEntity,
        expected_updated_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        self.guard().await?;
        self.inner.update(entity, expected_updated_at).await
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        self.guard().await?;
        self.inner.delete(id).await
    }

    async fn usage(&self, owner_id: &str) -> StorageResult<StorageUsage> {
        self.guard().await?;
        self.inner.usage(owner_id).await
    }

    async fn statistics(&self) -> StorageResult<BackendStatistics> {
        self.guard().await?;
        self.inner.statistics().await
    }
}

/// A fleet over controllable backends, with handles kept for the test.
pub struct TestFleet {
    /// The fleet under test.
    pub fleet: Fleet,
    backends: HashMap<String, Arc<ControllableBackend>>,
}

impl TestFleet {
    /// Builds a fleet from configuration entries, one controllable backend each.
    pub fn from_entries(entries: Vec<BackendEntry>) -> Self {
        Self::with_config(entries, true)
    }

    /// Like [`from_entries`](Self::from_entries) with auto-switch set explicitly.
    pub fn with_config(entries: Vec<BackendEntry>, auto_switch: bool) -> Self {
        Self::build(entries, auto_switch, Duration::from_secs(2), Duration::from_secs(1))
    }

    /// Like [`from_entries`](Self::from_entries) with `timeout` used for both
    /// queries and health probes.
    pub fn with_timeouts(entries: Vec<BackendEntry>, timeout: Duration) -> Self {
        Self::build(entries, true, timeout, timeout)
    }

    fn build(
        entries: Vec<BackendEntry>,
        auto_switch: bool,
        query_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let mut builder = FleetConfig::builder()
            .auto_switch(auto_switch)
            .query_timeout(query_timeout)
            .with_health_config(HealthConfig {
                check_interval: Duration::from_millis(50),
                timeout: probe_timeout,
                capacity_threshold: 0.90,
            });
        let mut backends = HashMap::new();
        let mut handles: HashMap<String, DynBackend> = HashMap::new();
        for entry in entries {
            let backend = ControllableBackend::new(&entry.id);
            handles.insert(entry.id.clone(), backend.clone() as DynBackend);
            backends.insert(entry.id.clone(), backend);
            builder = builder.with_backend(entry);
        }

        let config = builder.build().expect("Invalid test fleet configuration");
        let fleet = Fleet::new(config, handles).expect("Failed to create fleet");
        Self { fleet, backends }
    }

    /// The standard pair: `db-1` primary (priority 1) and `db-2` backup
    /// (priority 2), 100 MB each.
    pub fn two_backends() -> Self {
        Self::from_entries(vec![
            entry("db-1", 1, 100).as_primary(),
            entry("db-2", 2, 100),
        ])
    }

    /// Returns the controllable backend with the given id.
    pub fn backend(&self, id: &str) -> &Arc<ControllableBackend> {
        self.backends
            .get(id)
            .unwrap_or_else(|| panic!("no test backend named {id}"))
    }

    /// Inserts directly into one backend, bypassing primary routing.
    pub async fn seed(&self, id: &str, entity: &StoredEntity) {
        self.backend(id)
            .inner()
            .insert(entity)
            .await
            .expect("Failed to seed entity");
    }
}

/// A SQLite entry with the given rank and capacity.
pub fn entry(id: &str, priority: i32, capacity_mb: u64) -> BackendEntry {
    BackendEntry::new(id, BackendKind::Sqlite, ":memory:")
        .with_priority(priority)
        .with_capacity_mb(capacity_mb)
}
