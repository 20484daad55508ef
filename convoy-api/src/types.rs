//! API Request and Response Types
//!
//! Bodies and query strings that exist only at the HTTP edge. Domain types
//! from `convoy-core` (agents, messages, outcomes) are serialized directly.

use convoy_core::{
    Agent, EntityRef, Event, Offset, PathConflict, Reservation, SearchHit,
};
use convoy_storage::RebuildStatus;
use serde::{Deserialize, Serialize};

// ============================================================================
// PROJECTS & EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub human_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadEventsParams {
    /// First offset to return (inclusive). Defaults to 1.
    pub from: Option<Offset>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsResponse {
    pub events: Vec<Event>,
    pub latest_offset: Offset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestOffsetResponse {
    pub latest_offset: Offset,
}

// ============================================================================
// AGENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListAgentsResponse {
    pub agents: Vec<Agent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub task_description: String,
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Body of the read and ack endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequest {
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadParams {
    #[serde(default)]
    pub include_examples: bool,
}

// ============================================================================
// RESERVATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListReservationsResponse {
    pub reservations: Vec<Reservation>,
}

fn default_exclusive() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReservationRequest {
    pub agent: String,
    pub paths: Vec<String>,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckReservationResponse {
    pub conflicts: Vec<PathConflict>,
}

// ============================================================================
// BEADS & EXPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedByResponse {
    pub bead_id: String,
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirtyResponse {
    pub entities: Vec<EntityRef>,
}

/// `entities` absent means everything currently dirty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AckDirtyRequest {
    #[serde(default)]
    pub entities: Option<Vec<EntityRef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckDirtyResponse {
    pub acknowledged: Vec<EntityRef>,
}

// ============================================================================
// PROJECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebuildResponse {
    pub project_key: String,
    pub status: RebuildStatus,
}
