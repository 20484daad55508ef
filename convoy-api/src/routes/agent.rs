//! Agent REST API Routes
//!
//! Registration, liveness, task updates and inboxes. Every write becomes one
//! event in the project's log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use convoy_core::{Agent, InboxEntry, InboxQuery};
use convoy_storage::RegisterAgent;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
    types::{ListAgentsResponse, UpdateTaskRequest},
};

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/projects/:project/agents - Register (or refresh) an agent
///
/// A missing name is generated from the adjective/noun word lists.
pub async fn register_agent(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<RegisterAgent>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.project(&project).await?;
    let agent = handle.register_agent(req).await?;
    tracing::info!(project_key = %project, agent = %agent.name, "agent registered");
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /api/v1/projects/:project/agents - List registered agents
pub async fn list_agents(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> ApiResult<Json<ListAgentsResponse>> {
    let handle = state.project(&project).await?;
    let agents = handle.read().await.agents().into_iter().cloned().collect();
    Ok(Json(ListAgentsResponse { agents }))
}

/// GET /api/v1/projects/:project/agents/:name - Get one agent
pub async fn get_agent(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Agent>> {
    let handle = state.project(&project).await?;
    Ok(Json(handle.agent(&name).await?))
}

/// POST /api/v1/projects/:project/agents/:name/heartbeat - Record activity
pub async fn heartbeat(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<Json<Agent>> {
    let handle = state.project(&project).await?;
    Ok(Json(handle.heartbeat(&name).await?))
}

/// PUT /api/v1/projects/:project/agents/:name/task - Replace the task line
pub async fn update_task(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Agent>> {
    let handle = state.project(&project).await?;
    Ok(Json(handle.update_task(&name, req.task_description).await?))
}

/// GET /api/v1/projects/:project/agents/:name/inbox - Messages addressed to
/// the agent, newest first
pub async fn inbox(
    State(state): State<AppState>,
    Path((project, name)): Path<(String, String)>,
    Query(query): Query<InboxQuery>,
) -> ApiResult<Json<Vec<InboxEntry>>> {
    if query.limit == 0 {
        return Err(ApiError::validation_failed("limit must be at least 1"));
    }
    let query = InboxQuery {
        limit: state.config.clamp_limit(Some(query.limit)),
        ..query
    };
    let handle = state.project(&project).await?;
    Ok(Json(handle.inbox(&name, &query).await?))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:project/agents", post(register_agent).get(list_agents))
        .route("/:project/agents/:name", get(get_agent))
        .route("/:project/agents/:name/heartbeat", post(heartbeat))
        .route("/:project/agents/:name/task", put(update_task))
        .route("/:project/agents/:name/inbox", get(inbox))
        .with_state(state)
}
