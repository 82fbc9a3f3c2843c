//! Server configuration for the fleet daemon.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FLEET_SERVER_PORT` | 8090 | Server port |
//! | `FLEET_SERVER_HOST` | 127.0.0.1 | Host to bind |
//! | `FLEET_LOG_LEVEL` | info | Log level |
//! | `FLEET_CONFIG` | (none) | Fleet configuration file (JSON) |
//! | `FLEET_PROBE_INTERVAL` | (from file) | Health probe interval, e.g. `30s` |
//! | `FLEET_AUTO_SWITCH` | (from file) | Enable automatic failover |
//! | `FLEET_REQUEST_TIMEOUT` | 30 | Request timeout (seconds) |
//! | `FLEET_ENABLE_CORS` | false | Enable CORS |
//! | `FLEET_CORS_ORIGINS` | * | Allowed origins |
//!
//! Without `FLEET_CONFIG` the daemon runs a single SQLite database at
//! `fleet.db` as primary.
//!
//! # Example
//!
//! ```rust
//! use nimbus_fleetd::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 3000,
//!     host: "0.0.0.0".to_string(),
//!     ..Default::default()
//! };
//! assert_eq!(config.socket_addr(), "0.0.0.0:3000");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use nimbus_persistence::core::BackendKind;
use nimbus_persistence::registry::{BackendEntry, ConfigError, FleetConfig};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Command line and environment configuration for `fleetd`.
#[derive(Debug, Clone, Parser)]
#[command(name = "fleetd")]
#[command(about = "Nimbus database fleet daemon")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "FLEET_SERVER_PORT", default_value = "8090")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "FLEET_SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Path to the fleet configuration file.
    #[arg(short, long, env = "FLEET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the health probe interval from the configuration file.
    #[arg(long, env = "FLEET_PROBE_INTERVAL", value_parser = humantime::parse_duration)]
    pub probe_interval: Option<Duration>,

    /// Overrides automatic failover from the configuration file.
    #[arg(long, env = "FLEET_AUTO_SWITCH", action = clap::ArgAction::Set)]
    pub auto_switch: Option<bool>,

    /// Request timeout in seconds.
    #[arg(long, env = "FLEET_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Enable CORS.
    #[arg(
        long,
        env = "FLEET_ENABLE_CORS",
        default_value = "false",
        action = clap::ArgAction::Set
    )]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "FLEET_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            config: None,
            probe_interval: None,
            auto_switch: None,
            request_timeout: 30,
            enable_cors: false,
            cors_origins: "*".to_string(),
        }
    }
}

impl ServerConfig {
    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Port cannot be 0".to_string());
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(format!(
                "Unknown log level '{}', expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if self.probe_interval.is_some_and(|d| d.is_zero()) {
            errors.push("Probe interval cannot be 0".to_string());
        }

        if let Some(path) = &self.config
            && !path.is_file()
        {
            errors.push(format!(
                "Fleet configuration file not found: {}",
                path.display()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Builds the fleet configuration: the file if one is given, otherwise a
    /// single local SQLite primary, with command line overrides applied.
    pub fn fleet_config(&self) -> Result<FleetConfig, ConfigError> {
        let mut fleet = match &self.config {
            Some(path) => FleetConfig::load(path)?,
            None => FleetConfig::builder()
                .with_backend(
                    BackendEntry::new("local", BackendKind::Sqlite, "fleet.db").as_primary(),
                )
                .build()?,
        };

        if let Some(interval) = self.probe_interval {
            fleet.health.check_interval = interval;
        }
        if let Some(enabled) = self.auto_switch {
            fleet.auto_switch_enabled = enabled;
        }
        Ok(fleet)
    }

    /// Creates a configuration suitable for testing.
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            log_level: "debug".to_string(),
            request_timeout: 5,
            ..Default::default()
        }
    }
}
