//! Lease modes and reservation request/outcome types.

use crate::{Offset, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LEASE MODE
// ============================================================================

/// Lease mode determining concurrency behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseMode {
    /// No other holder may overlap
    Exclusive,
    /// Other shared holders may overlap
    Shared,
}

impl LeaseMode {
    pub fn from_exclusive(exclusive: bool) -> Self {
        if exclusive {
            LeaseMode::Exclusive
        } else {
            LeaseMode::Shared
        }
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, LeaseMode::Exclusive)
    }

    /// Two overlapping leases coexist only when both are shared.
    pub fn compatible_with(&self, other: LeaseMode) -> bool {
        !self.is_exclusive() && !other.is_exclusive()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseMode::Exclusive => "exclusive",
            LeaseMode::Shared => "shared",
        }
    }
}

impl fmt::Display for LeaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LeaseMode {
    type Err = LeaseModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exclusive" => Ok(LeaseMode::Exclusive),
            "shared" => Ok(LeaseMode::Shared),
            _ => Err(LeaseModeParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid lease mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseModeParseError(pub String);

impl fmt::Display for LeaseModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid lease mode: {}", self.0)
    }
}

impl std::error::Error for LeaseModeParseError {}

// ============================================================================
// REQUESTS
// ============================================================================

fn default_exclusive() -> bool {
    true
}

/// Reserve a set of path patterns for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveRequest {
    pub paths: Vec<String>,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    /// Falls back to the configured default TTL when absent.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ReserveRequest {
    pub fn mode(&self) -> LeaseMode {
        LeaseMode::from_exclusive(self.exclusive)
    }
}

/// Release some or all of an agent's active leases.
///
/// `reservation_ids` wins over `paths`; with neither, everything the agent
/// holds is released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    #[serde(default)]
    pub reservation_ids: Option<Vec<Offset>>,
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedLease {
    pub id: Offset,
    pub path_pattern: String,
    pub exclusive: bool,
    pub expires_at: Timestamp,
}

/// A path that could not be granted, with the agents currently in the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathConflict {
    pub path: String,
    pub holders: Vec<String>,
}

/// Partial success is normal: callers must inspect both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub granted: Vec<GrantedLease>,
    pub conflicts: Vec<PathConflict>,
}

impl ReserveOutcome {
    pub fn is_fully_granted(&self) -> bool {
        self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    pub released: usize,
    pub released_at: Timestamp,
}
