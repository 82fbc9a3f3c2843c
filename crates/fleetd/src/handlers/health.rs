//! Health check endpoint handler.

use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::debug;

use crate::state::AppState;

/// Handler for the health check endpoint.
///
/// Always answers `200 OK` while the process is up. `degraded` is true when
/// no backend can take writes.
///
/// # HTTP Request
///
/// `GET [base]/health`
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    debug!("Processing health check request");

    let status = state.fleet().get_status();
    let healthy = status.backends.iter().filter(|b| b.is_healthy).count();
    Json(json!({
        "status": if status.is_degraded() { "degraded" } else { "healthy" },
        "degraded": status.is_degraded(),
        "primary": status.current_primary_id,
        "healthyBackends": healthy,
        "totalBackends": status.backends.len(),
        "monitorRunning": state.fleet().monitor_running().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
