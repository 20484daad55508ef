//! Projection entities and read-model query types.

use crate::lease::LeaseMode;
use crate::pattern::PathPattern;
use crate::{Offset, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Importance assigned to messages that do not specify one.
pub const DEFAULT_IMPORTANCE: &str = "normal";

/// Importance that `InboxQuery::urgent_only` filters on.
pub const URGENT_IMPORTANCE: &str = "urgent";

// ============================================================================
// PROJECT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub slug: String,
    pub human_key: String,
    pub created_at: Timestamp,
}

/// Derive a URL-safe slug from a project's human key.
///
/// Separators and spaces become `_`, everything that is not alphanumeric or
/// `_` is dropped, and the result is lowercased and capped at 64 chars.
pub fn generate_slug(human_key: &str) -> String {
    human_key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ' ' => '_',
            other => other,
        })
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .take(64)
        .collect()
}

// ============================================================================
// AGENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub registered_at: Timestamp,
    pub last_active_at: Timestamp,
}

impl Agent {
    /// Agents are never deleted; "active" means seen within `idle_after`.
    pub fn is_active(&self, now: Timestamp, idle_after: Duration) -> bool {
        now - self.last_active_at < idle_after
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Offset of the `message_sent` event.
    pub id: Offset,
    pub thread_id: Option<String>,
    pub from_agent: String,
    pub to_agents: Vec<String>,
    pub subject: String,
    pub body: String,
    pub importance: String,
    pub ack_required: bool,
    pub created_at: Timestamp,
}

/// Read/ack record for one recipient of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: Offset,
    pub agent: String,
    pub read_at: Option<Timestamp>,
    pub acked_at: Option<Timestamp>,
}

/// Inbox filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxQuery {
    #[serde(default = "default_inbox_limit")]
    pub limit: usize,
    #[serde(default)]
    pub urgent_only: bool,
    /// Only messages with an id strictly greater than this.
    #[serde(default)]
    pub since_id: Option<Offset>,
    #[serde(default)]
    pub include_bodies: bool,
}

fn default_inbox_limit() -> usize {
    10
}

impl Default for InboxQuery {
    fn default() -> Self {
        Self {
            limit: default_inbox_limit(),
            urgent_only: false,
            since_id: None,
            include_bodies: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: Offset,
    pub thread_id: Option<String>,
    pub from: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub importance: String,
    pub ack_required: bool,
    pub created_at: Timestamp,
    pub read_at: Option<Timestamp>,
    pub acked_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadExample {
    pub id: Offset,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Cheap structural digest of a thread; no content analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub participants: Vec<String>,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub total_messages: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<ThreadExample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Offset,
    pub thread_id: Option<String>,
    pub from: String,
    pub subject: String,
    pub importance: String,
    pub created_at: Timestamp,
}

// ============================================================================
// RESERVATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Offset of the `reservation_granted` event.
    pub id: Offset,
    pub agent_name: String,
    pub path_pattern: PathPattern,
    pub exclusive: bool,
    pub reason: String,
    pub granted_at: Timestamp,
    pub expires_at: Timestamp,
    pub released_at: Option<Timestamp>,
}

impl Reservation {
    /// Active while unreleased and `now < expires_at`. Expiry is lazy: this
    /// is the only place the rule lives.
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.released_at.is_none() && now < self.expires_at
    }

    pub fn mode(&self) -> LeaseMode {
        LeaseMode::from_exclusive(self.exclusive)
    }
}

// ============================================================================
// BEAD
// ============================================================================

/// Opaque work item. Only its dependency edges and open/closed state matter
/// to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    pub closed: bool,
    pub depends_on: BTreeSet<String>,
    pub updated_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_slug_generation() {
        assert_eq!(generate_slug("/data/projects/Backend API"), "_data_projects_backend_api");
        assert_eq!(generate_slug("C:\\work\\repo"), "c_work_repo");
        assert_eq!(generate_slug("weird!@#name"), "weirdname");
        assert_eq!(generate_slug(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn test_reservation_expiry_boundary() {
        let lease = Reservation {
            id: 4,
            agent_name: "BlueLake".to_string(),
            path_pattern: PathPattern::parse("src/auth.ts").unwrap(),
            exclusive: true,
            reason: String::new(),
            granted_at: at(0),
            expires_at: at(60),
            released_at: None,
        };
        assert!(lease.is_active(at(59)));
        assert!(!lease.is_active(at(60)));
        assert!(!lease.is_active(at(61)));

        let released = Reservation {
            released_at: Some(at(10)),
            ..lease
        };
        assert!(!released.is_active(at(11)));
    }

    #[test]
    fn test_reservation_mode() {
        let mut lease = Reservation {
            id: 1,
            agent_name: "A".to_string(),
            path_pattern: PathPattern::parse("x").unwrap(),
            exclusive: false,
            reason: String::new(),
            granted_at: at(0),
            expires_at: at(60),
            released_at: None,
        };
        assert_eq!(lease.mode(), LeaseMode::Shared);
        lease.exclusive = true;
        assert_eq!(lease.mode(), LeaseMode::Exclusive);
    }

    #[test]
    fn test_agent_idle() {
        let agent = Agent {
            name: "RedStone".to_string(),
            program: "claude".to_string(),
            model: "unknown".to_string(),
            task_description: String::new(),
            registered_at: at(0),
            last_active_at: at(100),
        };
        assert!(agent.is_active(at(150), Duration::seconds(60)));
        assert!(!agent.is_active(at(160), Duration::seconds(60)));
    }
}
