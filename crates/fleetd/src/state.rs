//! Application state shared by every handler.

use std::sync::Arc;

use nimbus_persistence::Fleet;

use crate::config::ServerConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    fleet: Arc<Fleet>,
    config: Arc<ServerConfig>,
}

impl AppState {
    /// Creates a new state around a running fleet.
    pub fn new(fleet: Arc<Fleet>, config: ServerConfig) -> Self {
        Self {
            fleet,
            config: Arc::new(config),
        }
    }

    /// Returns the fleet.
    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
