//! Configuration types for the backend fleet.
//!
//! This module defines the configuration structures for the registry: which
//! databases exist, how they rank for failover, how full each may get, and
//! how often they are probed.
//!
//! # Example
//!
//! ```
//! use nimbus_persistence::registry::{BackendEntry, FleetConfig};
//! use nimbus_persistence::core::BackendKind;
//!
//! let config = FleetConfig::builder()
//!     .primary("db-1", BackendKind::Sqlite, "/var/lib/nimbus/db-1.sqlite")
//!     .with_backend(
//!         BackendEntry::new("db-2", BackendKind::Postgres, "postgres://db-2/nimbus")
//!             .with_priority(2)
//!             .with_capacity_mb(2048),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.designated_primary().map(|b| b.id.as_str()), Some("db-1"));
//! ```
//!
//! The same configuration as JSON:
//!
//! ```json
//! {
//!   "backends": [
//!     { "id": "db-1", "kind": "sqlite", "connection": "/var/lib/nimbus/db-1.sqlite",
//!       "priority": 1, "capacityLimitMb": 100, "primary": true },
//!     { "id": "db-2", "kind": "postgres", "connection": "postgres://db-2/nimbus",
//!       "priority": 2, "capacityLimitMb": 2048 }
//!   ],
//!   "autoSwitchEnabled": true,
//!   "queryTimeout": "10s",
//!   "health": { "checkInterval": "1m", "timeout": "5s", "capacityThreshold": 0.9 }
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::BackendKind;

/// Configuration for the backend fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    /// Configured database instances.
    #[serde(default)]
    pub backends: Vec<BackendEntry>,

    /// Whether probing may promote a backup on its own.
    #[serde(default = "default_auto_switch")]
    pub auto_switch_enabled: bool,

    /// Per-backend bound on request-path calls.
    #[serde(with = "humantime_serde", default = "default_query_timeout")]
    pub query_timeout: Duration,

    /// Probe settings.
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_auto_switch() -> bool {
    true
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(10)
}

impl FleetConfig {
    /// Creates an empty configuration with defaults.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            auto_switch_enabled: default_auto_switch(),
            query_timeout: default_query_timeout(),
            health: HealthConfig::default(),
        }
    }

    /// Creates a new configuration builder.
    pub fn builder() -> FleetConfigBuilder {
        FleetConfigBuilder::new()
    }

    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Returns the enabled backend designated primary at boot.
    pub fn designated_primary(&self) -> Option<&BackendEntry> {
        self.backends.iter().find(|b| b.primary && b.enabled)
    }

    /// Returns enabled backends that are not designated primary.
    pub fn backups(&self) -> impl Iterator<Item = &BackendEntry> {
        self.backends.iter().filter(|b| !b.primary && b.enabled)
    }

    /// Returns a backend entry by ID.
    pub fn backend(&self, id: &str) -> Option<&BackendEntry> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Validates the configuration.
    ///
    /// Returns warnings for setups that boot but run degraded.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        for backend in &self.backends {
            backend.validate()?;
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::DuplicateBackendId(backend.id.clone()));
            }
        }

        let primaries: Vec<String> = self
            .backends
            .iter()
            .filter(|b| b.primary)
            .map(|b| b.id.clone())
            .collect();
        if primaries.len() > 1 {
            return Err(ConfigError::MultiplePrimaryBackends(primaries));
        }

        self.health.validate()?;
        if self.query_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("queryTimeout"));
        }

        match self.backends.iter().find(|b| b.primary) {
            None => warnings.push(ConfigWarning::NoDesignatedPrimary),
            Some(primary) if !primary.enabled => {
                warnings.push(ConfigWarning::PrimaryDisabled(primary.id.clone()))
            }
            Some(_) => {}
        }

        if self.backups().next().is_none() {
            warnings.push(ConfigWarning::NoBackupBackends);
        }

        Ok(warnings)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a single database instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendEntry {
    /// Stable identifier.
    pub id: String,

    /// Human-readable name; defaults to the id.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Database driver.
    pub kind: BackendKind,

    /// Connection string: a file path or `:memory:` for SQLite, a URL for PostgreSQL.
    pub connection: String,

    /// Failover rank; lower is preferred.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Soft size ceiling in megabytes.
    #[serde(default = "default_capacity_limit_mb")]
    pub capacity_limit_mb: u64,

    /// Forced primary at boot.
    #[serde(default)]
    pub primary: bool,

    /// Whether the backend takes part in the fleet.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> i32 {
    100
}

fn default_capacity_limit_mb() -> u64 {
    1024
}

fn default_enabled() -> bool {
    true
}

impl BackendEntry {
    /// Creates a new backend entry with default priority and capacity.
    pub fn new(id: impl Into<String>, kind: BackendKind, connection: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            kind,
            connection: connection.into(),
            priority: default_priority(),
            capacity_limit_mb: default_capacity_limit_mb(),
            primary: false,
            enabled: default_enabled(),
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the failover priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the capacity ceiling.
    pub fn with_capacity_mb(mut self, capacity_limit_mb: u64) -> Self {
        self.capacity_limit_mb = capacity_limit_mb;
        self
    }

    /// Designates this backend primary at boot.
    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Disables this backend.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns the display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// Checks the fields of this entry on their own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyBackendId);
        }
        if self.capacity_limit_mb == 0 {
            return Err(ConfigError::ZeroCapacity(self.id.clone()));
        }
        Ok(())
    }
}

/// Health probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    /// Interval between probe cycles.
    #[serde(with = "humantime_serde", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Timeout for a single probe.
    #[serde(with = "humantime_serde", default = "default_health_timeout")]
    pub timeout: Duration,

    /// Usage ratio at which the primary is considered full.
    #[serde(default = "default_capacity_threshold")]
    pub capacity_threshold: f64,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_capacity_threshold() -> f64 {
    0.90
}

impl HealthConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.capacity_threshold > 0.0 && self.capacity_threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(self.capacity_threshold));
        }
        if self.check_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("health.checkInterval"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("health.timeout"));
        }
        Ok(())
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            timeout: default_health_timeout(),
            capacity_threshold: default_capacity_threshold(),
        }
    }
}

/// Builder for constructing [`FleetConfig`].
#[derive(Debug, Default)]
pub struct FleetConfigBuilder {
    backends: Vec<BackendEntry>,
    auto_switch_enabled: Option<bool>,
    query_timeout: Option<Duration>,
    health: HealthConfig,
}

impl FleetConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a backend entry.
    pub fn with_backend(mut self, backend: BackendEntry) -> Self {
        self.backends.push(backend);
        self
    }

    /// Adds a boot primary, ranked after the backends already added.
    pub fn primary(
        mut self,
        id: impl Into<String>,
        kind: BackendKind,
        connection: impl Into<String>,
    ) -> Self {
        let priority = self.next_priority();
        self.backends.push(
            BackendEntry::new(id, kind, connection)
                .with_priority(priority)
                .as_primary(),
        );
        self
    }

    /// Adds a backup, ranked after the backends already added.
    pub fn backup(
        mut self,
        id: impl Into<String>,
        kind: BackendKind,
        connection: impl Into<String>,
    ) -> Self {
        let priority = self.next_priority();
        self.backends
            .push(BackendEntry::new(id, kind, connection).with_priority(priority));
        self
    }

    /// Enables or disables automatic failover.
    pub fn auto_switch(mut self, enabled: bool) -> Self {
        self.auto_switch_enabled = Some(enabled);
        self
    }

    /// Sets the request-path timeout.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Sets the probe interval.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.health.check_interval = interval;
        self
    }

    /// Sets the capacity threshold.
    pub fn capacity_threshold(mut self, threshold: f64) -> Self {
        self.health.capacity_threshold = threshold;
        self
    }

    /// Sets the health configuration.
    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health = config;
        self
    }

    /// Builds the configuration, validating it first.
    pub fn build(self) -> Result<FleetConfig, ConfigError> {
        self.build_with_warnings().map(|(config, _)| config)
    }

    /// Builds the configuration and returns any warnings.
    pub fn build_with_warnings(self) -> Result<(FleetConfig, Vec<ConfigWarning>), ConfigError> {
        let config = FleetConfig {
            backends: self.backends,
            auto_switch_enabled: self.auto_switch_enabled.unwrap_or_else(default_auto_switch),
            query_timeout: self.query_timeout.unwrap_or_else(default_query_timeout),
            health: self.health,
        };

        let warnings = config.validate()?;
        Ok((config, warnings))
    }

    fn next_priority(&self) -> i32 {
        self.backends.iter().map(|b| b.priority).max().unwrap_or(0) + 1
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Multiple primary backends configured.
    #[error("multiple primary backends configured: {0:?} - at most one may be designated")]
    MultiplePrimaryBackends(Vec<String>),

    /// Duplicate backend ID.
    #[error("duplicate backend ID: {0}")]
    DuplicateBackendId(String),

    /// A backend has an empty ID.
    #[error("backend ID must not be empty")]
    EmptyBackendId,

    /// A backend has no capacity.
    #[error("backend {0} has a capacity limit of 0 MB")]
    ZeroCapacity(String),

    /// The capacity threshold is not a ratio in (0, 1].
    #[error("capacity threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),

    /// A duration setting is zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    Parse(String),

    /// The configuration file could not be read.
    #[error("cannot read configuration file {path}: {message}")]
    Io { path: String, message: String },
}

/// Configuration warnings (non-fatal issues).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No backend is designated primary; writes fail until one is switched in.
    NoDesignatedPrimary,

    /// The designated primary is disabled.
    PrimaryDisabled(String),

    /// No backups are configured; failover has no candidates.
    NoBackupBackends,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NoDesignatedPrimary => write!(
                f,
                "no backend is designated primary - writes will fail until one is switched in"
            ),
            ConfigWarning::PrimaryDisabled(id) => write!(
                f,
                "designated primary {id} is disabled - writes will fail until one is switched in"
            ),
            ConfigWarning::NoBackupBackends => {
                write!(f, "no backup backends configured - failover is impossible")
            }
        }
    }
}

// Helper module for humantime serde
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
