//! Bead dependency and export (dirty set) routes.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::{
    error::ApiResult,
    state::AppState,
    types::{AckDirtyRequest, AckDirtyResponse, BlockedByResponse, DirtyResponse},
};

/// GET /api/v1/projects/:project/beads/:id/blocked-by - Open dependencies
pub async fn blocked_by(
    State(state): State<AppState>,
    Path((project, bead_id)): Path<(String, String)>,
) -> ApiResult<Json<BlockedByResponse>> {
    let handle = state.project(&project).await?;
    let blocked_by = handle.read().await.blocked_by(&bead_id);
    Ok(Json(BlockedByResponse {
        bead_id,
        blocked_by,
    }))
}

/// GET /api/v1/projects/:project/dirty - Entities changed since last export
pub async fn dirty(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<DirtyResponse>> {
    let handle = state.project(&project).await?;
    let entities = handle.read().await.dirty_entities();
    Ok(Json(DirtyResponse { entities }))
}

/// POST /api/v1/projects/:project/dirty/ack - Acknowledge an export
pub async fn acknowledge(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<AckDirtyRequest>,
) -> ApiResult<Json<AckDirtyResponse>> {
    let handle = state.project(&project).await?;
    let acknowledged = handle.acknowledge_export(req.entities).await?;
    tracing::debug!(project_key = %project, acknowledged = acknowledged.len(), "export acknowledged");
    Ok(Json(AckDirtyResponse { acknowledged }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:project/beads/:id/blocked-by", get(blocked_by))
        .route("/:project/dirty", get(dirty))
        .route("/:project/dirty/ack", post(acknowledge))
        .with_state(state)
}
