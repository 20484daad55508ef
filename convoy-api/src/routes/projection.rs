//! Projection maintenance routes.
//!
//! A rebuild runs in the background; the POST answers 202 straight away and
//! the GET reports progress.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use convoy_core::ConvoyError;
use convoy_storage::RebuildStatus;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    telemetry::with_metrics,
    types::RebuildResponse,
};

fn outcome_label(status: &RebuildStatus) -> &'static str {
    match status {
        RebuildStatus::Idle => "idle",
        RebuildStatus::Running { .. } => "running",
        RebuildStatus::Completed { .. } => "completed",
        RebuildStatus::Cancelled => "cancelled",
        RebuildStatus::Failed { .. } => "failed",
    }
}

/// POST /api/v1/projects/:project/projections/rebuild - Start a rebuild
pub async fn start_rebuild(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.project(&project).await?;
    let task = handle.spawn_rebuild().map_err(|e| match e {
        ConvoyError::Validation(_) => {
            ApiError::state_conflict(format!("A rebuild of {} is already running", project))
        }
        other => other.into(),
    })?;
    let status = task.status();

    let slug = handle.slug().to_string();
    tokio::spawn(async move {
        let finished = task.wait().await;
        with_metrics(|m| m.record_rebuild(outcome_label(&finished)));
        tracing::info!(project_key = %slug, status = ?finished, "projection rebuild finished");
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(RebuildResponse {
            project_key: handle.slug().to_string(),
            status,
        }),
    ))
}

/// GET /api/v1/projects/:project/projections/rebuild - Latest rebuild status
pub async fn rebuild_status(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<RebuildResponse>> {
    let handle = state.project(&project).await?;
    Ok(Json(RebuildResponse {
        project_key: handle.slug().to_string(),
        status: handle.rebuild_status(),
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/:project/projections/rebuild",
            post(start_rebuild).get(rebuild_status),
        )
        .with_state(state)
}
