//! # nimbus-fleetd - Fleet Daemon
//!
//! Boots a [`Fleet`] from configuration, keeps its health monitor running and
//! exposes the administrative surface over HTTP.
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Operation |
//! |----------|--------|-----------|
//! | `/health` | GET | liveness plus degraded flag |
//! | `/fleet/status` | GET | registry snapshot |
//! | `/fleet/statistics` | GET | row counts across the fleet |
//! | `/fleet/primary/{id}` | POST | manual primary switch |
//! | `/fleet/auto-switch` | PUT | toggle automatic failover |
//! | `/fleet/health-checks` | POST | run a probe cycle now |
//! | `/fleet/backends` | POST | register a backend |
//! | `/fleet/backends/{id}/active` | PUT | activate or deactivate a backend |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nimbus_fleetd::{ServerConfig, create_app};
//! use nimbus_persistence::Fleet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let fleet = Arc::new(Fleet::connect(config.fleet_config()?).await?);
//!     fleet.start_monitor().await;
//!
//!     let app = create_app(fleet, config);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8090").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routing;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use nimbus_persistence::Fleet;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Creates the Axum application around a fleet.
pub fn create_app(fleet: Arc<Fleet>, config: ServerConfig) -> Router {
    info!(
        backends = fleet.registry().descriptors().len(),
        "Creating fleet admin API"
    );

    let state = AppState::new(fleet, config.clone());
    let router = routing::create_routes(state);

    let service_builder = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout),
        ));

    let router = if config.enable_cors {
        router.layer(build_cors_layer(&config))
    } else {
        router
    };

    router.layer(service_builder)
}

fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins == "*" {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "nimbus_fleetd={level},nimbus_persistence={level},tower_http=info"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
