//! Route configuration.

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::handlers;
use crate::state::AppState;

/// Creates the administrative routes.
///
/// - `GET /health` - Liveness plus degraded flag
/// - `GET /fleet/status` - Registry snapshot
/// - `GET /fleet/statistics` - Row counts across the fleet
/// - `POST /fleet/primary/{id}` - Manual primary switch
/// - `PUT /fleet/auto-switch` - Toggle automatic failover
/// - `POST /fleet/health-checks` - Run a probe cycle now
/// - `POST /fleet/backends` - Register a backend
/// - `PUT /fleet/backends/{id}/active` - Activate or deactivate a backend
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/fleet/status", get(handlers::status_handler))
        .route("/fleet/statistics", get(handlers::statistics_handler))
        .route("/fleet/primary/{id}", post(handlers::switch_primary_handler))
        .route("/fleet/auto-switch", put(handlers::auto_switch_handler))
        .route("/fleet/health-checks", post(handlers::health_checks_handler))
        .route("/fleet/backends", post(handlers::add_backend_handler))
        .route(
            "/fleet/backends/{id}/active",
            put(handlers::set_active_handler),
        )
        .with_state(state)
}
