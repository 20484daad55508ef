//! Reservation (lease) REST API Routes
//!
//! Contested paths are not an error: reserve answers 200 with both the
//! granted leases and the conflicts, and the caller decides what to do.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use convoy_core::{LeaseMode, ReleaseOutcome, ReleaseRequest, ReserveOutcome, ReserveRequest};

use crate::{
    error::ApiResult,
    state::AppState,
    telemetry::with_metrics,
    types::{CheckReservationRequest, CheckReservationResponse, ListReservationsResponse},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/projects/:project/agents/:name/reservations - Reserve paths
pub async fn reserve(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    Json(req): Json<ReserveRequest>,
) -> ApiResult<Json<ReserveOutcome>> {
    let mode = req.mode();
    let handle = state.project(&project).await?;
    let outcome = state.registry.leases().reserve(&handle, &name, req).await?;
    with_metrics(|m| {
        m.record_reservations(mode.as_str(), outcome.granted.len(), outcome.conflicts.len())
    });
    Ok(Json(outcome))
}

/// POST /api/v1/projects/:project/agents/:name/reservations/release
pub async fn release(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<Json<ReleaseOutcome>> {
    let handle = state.project(&project).await?;
    let outcome = state.registry.leases().release(&handle, &name, req).await?;
    Ok(Json(outcome))
}

/// GET /api/v1/projects/:project/reservations - Active leases
pub async fn list_active(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<ListReservationsResponse>> {
    let handle = state.project(&project).await?;
    let now = handle.now();
    let reservations = handle
        .read()
        .await
        .active_reservations(now)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(ListReservationsResponse { reservations }))
}

/// POST /api/v1/projects/:project/reservations/check - Dry-run conflict check
pub async fn check(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<CheckReservationRequest>,
) -> ApiResult<Json<CheckReservationResponse>> {
    let handle = state.project(&project).await?;
    let conflicts = state
        .registry
        .leases()
        .check(
            &handle,
            &req.agent,
            &req.paths,
            LeaseMode::from_exclusive(req.exclusive),
        )
        .await?;
    Ok(Json(CheckReservationResponse { conflicts }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:project/agents/:name/reservations", post(reserve))
        .route("/:project/agents/:name/reservations/release", post(release))
        .route("/:project/reservations", get(list_active))
        .route("/:project/reservations/check", post(check))
        .with_state(state)
}
