//! Fleet administration handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use nimbus_persistence::FleetStatus;
use nimbus_persistence::registry::{
    BackendDescriptor, BackendEntry, FailoverOutcome, ProbeOutcome, ProbeReport,
};
use nimbus_persistence::types::FleetStatistics;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `PUT /fleet/auto-switch`.
#[derive(Debug, Deserialize)]
pub struct AutoSwitchRequest {
    /// New setting.
    pub enabled: bool,
}

/// Body of `PUT /fleet/backends/{id}/active`.
#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    /// New setting.
    pub active: bool,
}

/// Response of `POST /fleet/primary/{id}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchResponse {
    /// The primary after the call.
    pub current_primary_id: Option<String>,
}

/// Response of `PUT /fleet/auto-switch`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSwitchResponse {
    /// The setting after the call.
    pub auto_switch_enabled: bool,
}

/// Wire form of a [`ProbeReport`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReportResponse {
    /// Per-backend probe results, in priority order.
    pub results: Vec<ProbeOutcome>,
    /// Number of backends that answered.
    pub healthy_count: usize,
    /// Backup promoted by this cycle, if any.
    pub promoted: Option<String>,
    /// Why the cycle wanted to fail over but could not.
    pub failover_refused: Option<String>,
    /// The primary after the cycle.
    pub current_primary_id: Option<String>,
}

impl ProbeReportResponse {
    fn new(report: ProbeReport, current_primary_id: Option<String>) -> Self {
        let healthy_count = report.healthy_count();
        let promoted = report.promoted().map(str::to_string);
        let failover_refused = match &report.failover {
            Some(FailoverOutcome::Refused(e)) => Some(e.to_string()),
            _ => None,
        };
        Self {
            results: report.results,
            healthy_count,
            promoted,
            failover_refused,
            current_primary_id,
        }
    }
}

/// `GET /fleet/status`
pub async fn status_handler(State(state): State<AppState>) -> Json<FleetStatus> {
    Json(state.fleet().get_status())
}

/// `GET /fleet/statistics`
///
/// Unreachable backends are listed in `unreachableBackends` and left out of
/// the sums.
pub async fn statistics_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<FleetStatistics>> {
    let statistics = state.fleet().statistics().await?;
    Ok(Json(statistics))
}

/// `POST /fleet/primary/{id}`
///
/// # Response
///
/// - `200 OK` - `id` is primary
/// - `404 Not Found` - unknown backend
/// - `409 Conflict` - the backend is inactive or failed a fresh probe
pub async fn switch_primary_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SwitchResponse>> {
    let fleet = state.fleet();
    if !fleet.switch_primary(&id).await? {
        return Err(ApiError::Conflict(format!(
            "backend {id} is inactive or unhealthy and cannot become primary"
        )));
    }

    info!(primary = %id, "Primary switched through admin API");
    Ok(Json(SwitchResponse {
        current_primary_id: fleet.registry().current_primary_id(),
    }))
}

/// `PUT /fleet/auto-switch`
pub async fn auto_switch_handler(
    State(state): State<AppState>,
    Json(body): Json<AutoSwitchRequest>,
) -> Json<AutoSwitchResponse> {
    state.fleet().set_auto_switch(body.enabled);
    Json(AutoSwitchResponse {
        auto_switch_enabled: state.fleet().registry().auto_switch_enabled(),
    })
}

/// `POST /fleet/health-checks`
pub async fn health_checks_handler(State(state): State<AppState>) -> Json<ProbeReportResponse> {
    debug!("Running probe cycle on request");
    let report = state.fleet().run_health_checks_now().await;
    let primary = state.fleet().registry().current_primary_id();
    Json(ProbeReportResponse::new(report, primary))
}

/// `POST /fleet/backends`
///
/// The body is a backend entry as it would appear in the configuration file.
/// The new backend joins as a backup.
pub async fn add_backend_handler(
    State(state): State<AppState>,
    Json(entry): Json<BackendEntry>,
) -> ApiResult<(StatusCode, Json<BackendDescriptor>)> {
    let descriptor = state.fleet().add_backend(entry).await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

/// `PUT /fleet/backends/{id}/active`
pub async fn set_active_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ActiveRequest>,
) -> ApiResult<Json<BackendDescriptor>> {
    let fleet = state.fleet();
    fleet.set_backend_active(&id, body.active).await?;
    fleet
        .registry()
        .descriptor(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown backend: {id}")))
}
