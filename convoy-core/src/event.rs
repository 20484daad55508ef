//! Event records and the closed payload type.
//!
//! On the wire and on disk an event payload is a `{"type": ..., "data": ...}`
//! pair. Inside the process it is [`EventPayload`], one variant per known
//! tag, so the projection router can match exhaustively. Tags this build
//! does not know deserialize into [`EventPayload::Unrecognized`] instead of
//! failing, which keeps older readers working against newer producers.

use crate::error::ValidationError;
use crate::pattern::PathPattern;
use crate::{Offset, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// EVENT RECORD
// ============================================================================

/// An immutable, offset-stamped fact in a project's log.
///
/// `timestamp` is advisory metadata captured at append time. Ordering is
/// decided by `offset` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub offset: Offset,
    pub project_key: String,
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// The event's type tag.
    pub fn event_type(&self) -> &str {
        self.payload.event_type()
    }
}

/// Untyped `{type, data}` pair as produced by external callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

// ============================================================================
// PAYLOAD STRUCTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub slug: String,
    pub human_key: String,
}

fn unknown() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistered {
    pub name: String,
    #[serde(default = "unknown")]
    pub program: String,
    #[serde(default = "unknown")]
    pub model: String,
    #[serde(default)]
    pub task_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentActive {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTaskUpdated {
    pub name: String,
    pub task_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<String>,
    #[serde(default)]
    pub ack_required: bool,
}

/// Payload shared by `message_read` and `message_acknowledged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: Offset,
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationGranted {
    pub agent: String,
    pub path_pattern: String,
    pub exclusive: bool,
    #[serde(default)]
    pub reason: String,
    pub granted_at: Timestamp,
    pub expires_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub agent: String,
    pub reservation_ids: Vec<Offset>,
    pub released_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadCreated {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Payload shared by `bead_closed` and `bead_reopened`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadRef {
    pub id: String,
}

/// Payload shared by `dependency_added` and `dependency_removed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyChange {
    pub bead_id: String,
    pub depends_on: String,
}

/// Kind of top-level entity tracked by the dirty set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agent,
    Message,
    Reservation,
    Bead,
}

/// Reference to a top-level projection entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportAcknowledged {
    pub entities: Vec<EntityRef>,
}

// ============================================================================
// EVENT PAYLOAD (closed sum type)
// ============================================================================

/// Every event kind the projection engine understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPayload", into = "RawPayload")]
pub enum EventPayload {
    ProjectCreated(ProjectCreated),
    AgentRegistered(AgentRegistered),
    AgentActive(AgentActive),
    AgentTaskUpdated(AgentTaskUpdated),
    MessageSent(MessageSent),
    MessageRead(MessageReceipt),
    MessageAcknowledged(MessageReceipt),
    ReservationGranted(ReservationGranted),
    ReservationReleased(ReservationReleased),
    BeadCreated(BeadCreated),
    BeadClosed(BeadRef),
    BeadReopened(BeadRef),
    DependencyAdded(DependencyChange),
    DependencyRemoved(DependencyChange),
    ExportAcknowledged(ExportAcknowledged),
    /// A tag this build does not know. Stored and streamed verbatim,
    /// skipped by projections.
    Unrecognized { event_type: String, data: Value },
}

impl EventPayload {
    pub const PROJECT_CREATED: &'static str = "project_created";
    pub const AGENT_REGISTERED: &'static str = "agent_registered";
    pub const AGENT_ACTIVE: &'static str = "agent_active";
    pub const AGENT_TASK_UPDATED: &'static str = "agent_task_updated";
    pub const MESSAGE_SENT: &'static str = "message_sent";
    pub const MESSAGE_READ: &'static str = "message_read";
    pub const MESSAGE_ACKNOWLEDGED: &'static str = "message_acknowledged";
    pub const RESERVATION_GRANTED: &'static str = "reservation_granted";
    pub const RESERVATION_RELEASED: &'static str = "reservation_released";
    pub const BEAD_CREATED: &'static str = "bead_created";
    pub const BEAD_CLOSED: &'static str = "bead_closed";
    pub const BEAD_REOPENED: &'static str = "bead_reopened";
    pub const DEPENDENCY_ADDED: &'static str = "dependency_added";
    pub const DEPENDENCY_REMOVED: &'static str = "dependency_removed";
    pub const EXPORT_ACKNOWLEDGED: &'static str = "export_acknowledged";

    /// The wire tag for this payload.
    pub fn event_type(&self) -> &str {
        match self {
            EventPayload::ProjectCreated(_) => Self::PROJECT_CREATED,
            EventPayload::AgentRegistered(_) => Self::AGENT_REGISTERED,
            EventPayload::AgentActive(_) => Self::AGENT_ACTIVE,
            EventPayload::AgentTaskUpdated(_) => Self::AGENT_TASK_UPDATED,
            EventPayload::MessageSent(_) => Self::MESSAGE_SENT,
            EventPayload::MessageRead(_) => Self::MESSAGE_READ,
            EventPayload::MessageAcknowledged(_) => Self::MESSAGE_ACKNOWLEDGED,
            EventPayload::ReservationGranted(_) => Self::RESERVATION_GRANTED,
            EventPayload::ReservationReleased(_) => Self::RESERVATION_RELEASED,
            EventPayload::BeadCreated(_) => Self::BEAD_CREATED,
            EventPayload::BeadClosed(_) => Self::BEAD_CLOSED,
            EventPayload::BeadReopened(_) => Self::BEAD_REOPENED,
            EventPayload::DependencyAdded(_) => Self::DEPENDENCY_ADDED,
            EventPayload::DependencyRemoved(_) => Self::DEPENDENCY_REMOVED,
            EventPayload::ExportAcknowledged(_) => Self::EXPORT_ACKNOWLEDGED,
            EventPayload::Unrecognized { event_type, .. } => event_type,
        }
    }

    /// Whether the tag is one this build routes to a projection handler.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, EventPayload::Unrecognized { .. })
    }

    /// Whether only the store's typed operations may write this payload.
    ///
    /// These events carry invariants checked against projection state
    /// (registered agents, recipients, lease conflicts), so a raw append
    /// must not produce them. Bead, dependency and unrecognized events
    /// stay open to raw appends.
    pub fn is_store_managed(&self) -> bool {
        match self {
            EventPayload::ProjectCreated(_)
            | EventPayload::AgentRegistered(_)
            | EventPayload::AgentActive(_)
            | EventPayload::AgentTaskUpdated(_)
            | EventPayload::MessageSent(_)
            | EventPayload::MessageRead(_)
            | EventPayload::MessageAcknowledged(_)
            | EventPayload::ReservationGranted(_)
            | EventPayload::ReservationReleased(_)
            | EventPayload::ExportAcknowledged(_) => true,
            EventPayload::BeadCreated(_)
            | EventPayload::BeadClosed(_)
            | EventPayload::BeadReopened(_)
            | EventPayload::DependencyAdded(_)
            | EventPayload::DependencyRemoved(_)
            | EventPayload::Unrecognized { .. } => false,
        }
    }

    /// Decode a raw `{type, data}` pair without semantic checks.
    ///
    /// Used when reading back events that were validated at append time.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedPayload` when a known tag carries
    /// data that does not fit its payload struct.
    pub fn from_raw(event_type: &str, data: Value) -> Result<Self, ValidationError> {
        fn decode<T: serde::de::DeserializeOwned>(
            event_type: &str,
            data: Value,
        ) -> Result<T, ValidationError> {
            serde_json::from_value(data).map_err(|e| ValidationError::MalformedPayload {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            })
        }

        let payload = match event_type {
            Self::PROJECT_CREATED => EventPayload::ProjectCreated(decode(event_type, data)?),
            Self::AGENT_REGISTERED => EventPayload::AgentRegistered(decode(event_type, data)?),
            Self::AGENT_ACTIVE => EventPayload::AgentActive(decode(event_type, data)?),
            Self::AGENT_TASK_UPDATED => EventPayload::AgentTaskUpdated(decode(event_type, data)?),
            Self::MESSAGE_SENT => EventPayload::MessageSent(decode(event_type, data)?),
            Self::MESSAGE_READ => EventPayload::MessageRead(decode(event_type, data)?),
            Self::MESSAGE_ACKNOWLEDGED => {
                EventPayload::MessageAcknowledged(decode(event_type, data)?)
            }
            Self::RESERVATION_GRANTED => {
                EventPayload::ReservationGranted(decode(event_type, data)?)
            }
            Self::RESERVATION_RELEASED => {
                EventPayload::ReservationReleased(decode(event_type, data)?)
            }
            Self::BEAD_CREATED => EventPayload::BeadCreated(decode(event_type, data)?),
            Self::BEAD_CLOSED => EventPayload::BeadClosed(decode(event_type, data)?),
            Self::BEAD_REOPENED => EventPayload::BeadReopened(decode(event_type, data)?),
            Self::DEPENDENCY_ADDED => EventPayload::DependencyAdded(decode(event_type, data)?),
            Self::DEPENDENCY_REMOVED => EventPayload::DependencyRemoved(decode(event_type, data)?),
            Self::EXPORT_ACKNOWLEDGED => {
                EventPayload::ExportAcknowledged(decode(event_type, data)?)
            }
            other => EventPayload::Unrecognized {
                event_type: other.to_string(),
                data,
            },
        };
        Ok(payload)
    }

    /// Decode and validate an append request.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty tag, undecodable data, or a
    /// payload that fails its structural checks.
    pub fn parse(event_type: &str, data: Value) -> Result<Self, ValidationError> {
        if event_type.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "type".to_string(),
            });
        }
        let payload = Self::from_raw(event_type, data)?;
        payload.validate()?;
        Ok(payload)
    }

    /// Structural checks that do not depend on projection state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EventPayload::ProjectCreated(p) => require("human_key", &p.human_key),
            EventPayload::AgentRegistered(p) => require("name", &p.name),
            EventPayload::AgentActive(p) => require("name", &p.name),
            EventPayload::AgentTaskUpdated(p) => require("name", &p.name),
            EventPayload::MessageSent(p) => {
                require("from", &p.from)?;
                if p.to.is_empty() {
                    return Err(ValidationError::RequiredFieldMissing {
                        field: "to".to_string(),
                    });
                }
                p.to.iter().try_for_each(|name| require("to", name))
            }
            EventPayload::MessageRead(p) | EventPayload::MessageAcknowledged(p) => {
                require("agent", &p.agent)?;
                if p.message_id == 0 {
                    return Err(ValidationError::InvalidValue {
                        field: "message_id".to_string(),
                        reason: "message ids start at 1".to_string(),
                    });
                }
                Ok(())
            }
            EventPayload::ReservationGranted(p) => {
                require("agent", &p.agent)?;
                PathPattern::parse(&p.path_pattern)?;
                if p.expires_at <= p.granted_at {
                    return Err(ValidationError::InvalidValue {
                        field: "expires_at".to_string(),
                        reason: "must be later than granted_at".to_string(),
                    });
                }
                Ok(())
            }
            EventPayload::ReservationReleased(p) => require("agent", &p.agent),
            EventPayload::BeadCreated(p) => require("id", &p.id),
            EventPayload::BeadClosed(p) | EventPayload::BeadReopened(p) => require("id", &p.id),
            EventPayload::DependencyAdded(p) | EventPayload::DependencyRemoved(p) => {
                require("bead_id", &p.bead_id)?;
                require("depends_on", &p.depends_on)?;
                if p.bead_id == p.depends_on {
                    return Err(ValidationError::InvalidValue {
                        field: "depends_on".to_string(),
                        reason: "a bead cannot depend on itself".to_string(),
                    });
                }
                Ok(())
            }
            EventPayload::ExportAcknowledged(_) | EventPayload::Unrecognized { .. } => Ok(()),
        }
    }

    /// Encode back into the untyped wire pair.
    pub fn to_raw(&self) -> RawPayload {
        fn encode<T: Serialize>(value: &T) -> Value {
            // Payload structs contain only strings, numbers, bools and
            // timestamps, none of which can fail to serialize.
            serde_json::to_value(value).unwrap_or(Value::Null)
        }

        let data = match self {
            EventPayload::ProjectCreated(p) => encode(p),
            EventPayload::AgentRegistered(p) => encode(p),
            EventPayload::AgentActive(p) => encode(p),
            EventPayload::AgentTaskUpdated(p) => encode(p),
            EventPayload::MessageSent(p) => encode(p),
            EventPayload::MessageRead(p) | EventPayload::MessageAcknowledged(p) => encode(p),
            EventPayload::ReservationGranted(p) => encode(p),
            EventPayload::ReservationReleased(p) => encode(p),
            EventPayload::BeadCreated(p) => encode(p),
            EventPayload::BeadClosed(p) | EventPayload::BeadReopened(p) => encode(p),
            EventPayload::DependencyAdded(p) | EventPayload::DependencyRemoved(p) => encode(p),
            EventPayload::ExportAcknowledged(p) => encode(p),
            EventPayload::Unrecognized { data, .. } => data.clone(),
        };
        RawPayload {
            event_type: self.event_type().to_string(),
            data,
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        })
    } else {
        Ok(())
    }
}

impl TryFrom<RawPayload> for EventPayload {
    type Error = ValidationError;

    fn try_from(raw: RawPayload) -> Result<Self, Self::Error> {
        EventPayload::from_raw(&raw.event_type, raw.data)
    }
}

impl From<EventPayload> for RawPayload {
    fn from(payload: EventPayload) -> Self {
        payload.to_raw()
    }
}
