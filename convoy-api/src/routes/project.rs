//! Project and Event Log REST Routes
//!
//! - POST /api/v1/projects - ensure a project exists
//! - GET  /api/v1/projects - list projects
//! - POST /api/v1/projects/:project/events - append a raw `{type, data}` event
//! - GET  /api/v1/projects/:project/events - read a page of the log
//! - GET  /api/v1/projects/:project/events/latest - newest offset

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use convoy_core::{Project, RawPayload};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    telemetry::with_metrics,
    types::{CreateProjectRequest, EventsResponse, LatestOffsetResponse, ReadEventsParams},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/projects - Idempotently create a project from its human key
pub async fn ensure_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<Json<Project>> {
    if req.human_key.trim().is_empty() {
        return Err(ApiError::missing_field("human_key"));
    }
    let project = state.registry.ensure_project(&req.human_key).await?;
    Ok(Json(project))
}

/// GET /api/v1/projects - List every project with a `project_created` event
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.registry.projects().await))
}

/// POST /api/v1/projects/:project/events - Append one event
///
/// The pair is decoded before any offset is assigned. Unknown types are
/// stored as-is and skipped by the projection. Types owned by the agent,
/// message and lease endpoints are refused with `VALIDATION_FAILED`.
pub async fn append_event(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<RawPayload>,
) -> ApiResult<impl IntoResponse> {
    if req.event_type.trim().is_empty() {
        return Err(ApiError::missing_field("type"));
    }
    let handle = state.project(&project).await?;
    let event = handle.append(&req.event_type, req.data).await?;

    with_metrics(|m| m.record_event_appended(event.event_type()));
    tracing::debug!(
        project_key = %project,
        offset = event.offset,
        event_type = event.event_type(),
        "event appended"
    );
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /api/v1/projects/:project/events?from=&limit= - Read a page of the log
pub async fn read_events(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<ReadEventsParams>,
) -> ApiResult<Json<EventsResponse>> {
    let handle = state.project(&project).await?;
    let from = params.from.unwrap_or(1).max(1);
    let limit = state.config.clamp_limit(params.limit);

    let events = handle.log().read(handle.slug(), from, Some(limit)).await?;
    let latest_offset = handle.log().latest_offset(handle.slug()).await?;
    Ok(Json(EventsResponse {
        events,
        latest_offset,
    }))
}

/// GET /api/v1/projects/:project/events/latest - Offset of the newest event
pub async fn latest_offset(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<LatestOffsetResponse>> {
    let handle = state.project(&project).await?;
    let latest_offset = handle.log().latest_offset(handle.slug()).await?;
    Ok(Json(LatestOffsetResponse { latest_offset }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Routes mounted under `/api/v1/projects`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(ensure_project).get(list_projects))
        .route("/:project/events", post(append_event).get(read_events))
        .route("/:project/events/latest", get(latest_offset))
        .with_state(state)
}
