//! CONVOY Core - Shared Types
//!
//! Data structures shared by every other crate in the workspace: identity
//! aliases, the closed event payload type, projection entities, lease request
//! and outcome types, the canonical path-pattern matcher, configuration and
//! the error taxonomy. No I/O lives here.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod event;
pub mod lease;
pub mod pattern;

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Position of an event in its project's log. The first event is offset 1.
pub type Offset = u64;

/// Generate a new UUIDv7 EntityId.
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LeaseConfig, StoreConfig, StreamConfig};
pub use entities::{
    generate_slug, Agent, Bead, InboxEntry, InboxQuery, Message, Project, Receipt, Reservation,
    SearchHit, ThreadExample, ThreadSummary, DEFAULT_IMPORTANCE, URGENT_IMPORTANCE,
};
pub use error::{
    ConfigError, ConvoyError, ConvoyResult, StorageError, TransportError, ValidationError,
};
pub use event::{
    AgentActive, AgentRegistered, AgentTaskUpdated, BeadCreated, BeadRef, DependencyChange,
    EntityKind, EntityRef, Event, EventPayload, ExportAcknowledged, MessageReceipt, MessageSent,
    ProjectCreated, RawPayload, ReservationGranted, ReservationReleased,
};
pub use lease::{
    GrantedLease, LeaseMode, PathConflict, ReleaseOutcome, ReleaseRequest, ReserveOutcome,
    ReserveRequest,
};
pub use pattern::{
    patterns_overlap, PathPattern, MAX_PATTERN_LEN, MAX_SEGMENTS, MAX_SEGMENT_LEN,
};
