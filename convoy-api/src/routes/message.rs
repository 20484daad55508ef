//! Message REST API Routes
//!
//! Sending, receipts, search and thread summaries. A message's id is the
//! offset of its `message_sent` event.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use convoy_core::{Offset, Receipt, ThreadSummary};
use convoy_storage::SendMessage;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    types::{ReceiptRequest, SearchParams, SearchResponse, ThreadParams},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/projects/:project/messages - Send a message
pub async fn send_message(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<SendMessage>,
) -> ApiResult<impl IntoResponse> {
    if req.from.trim().is_empty() {
        return Err(ApiError::missing_field("from"));
    }
    if req.to.is_empty() {
        return Err(ApiError::missing_field("to"));
    }
    let handle = state.project(&project).await?;
    let message = handle.send_message(req).await?;
    tracing::info!(
        project_key = %project,
        message_id = message.id,
        from = %message.from_agent,
        recipients = message.to_agents.len(),
        "message sent"
    );
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/v1/projects/:project/messages/search?q=&limit= - Substring search
/// over subjects and bodies, newest first
pub async fn search_messages(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    if params.q.trim().is_empty() {
        return Err(ApiError::missing_field("q"));
    }
    let limit = state.config.clamp_limit(params.limit);
    let handle = state.project(&project).await?;
    let hits = handle.read().await.search_messages(&params.q, limit);
    Ok(Json(SearchResponse { hits }))
}

/// POST /api/v1/projects/:project/messages/:id/read - Mark read
pub async fn mark_read(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, Offset)>,
    Json(req): Json<ReceiptRequest>,
) -> ApiResult<Json<Receipt>> {
    let handle = state.project(&project).await?;
    Ok(Json(handle.mark_read(id, &req.agent).await?))
}

/// POST /api/v1/projects/:project/messages/:id/ack - Acknowledge (implies read)
pub async fn acknowledge(
    State(state): State<AppState>,
    Path((project, id)): Path<(String, Offset)>,
    Json(req): Json<ReceiptRequest>,
) -> ApiResult<Json<Receipt>> {
    let handle = state.project(&project).await?;
    Ok(Json(handle.acknowledge(id, &req.agent).await?))
}

/// GET /api/v1/projects/:project/threads/:thread_id - Structural summary
pub async fn thread_summary(
    State(state): State<AppState>,
    Path((project, thread_id)): Path<(String, String)>,
    Query(params): Query<ThreadParams>,
) -> ApiResult<Json<ThreadSummary>> {
    let handle = state.project(&project).await?;
    let summary = handle
        .read()
        .await
        .thread_summary(&thread_id, params.include_examples);
    Ok(Json(summary))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:project/messages", post(send_message))
        .route("/:project/messages/search", get(search_messages))
        .route("/:project/messages/:id/read", post(mark_read))
        .route("/:project/messages/:id/ack", post(acknowledge))
        .route("/:project/threads/:thread_id", get(thread_summary))
        .with_state(state)
}
