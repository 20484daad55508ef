//! Projection engine.
//!
//! [`ProjectionState`] is the read model of one project. It is mutated only
//! by [`ProjectionState::apply`], one event at a time, in offset order. Two
//! states fed the same events produce byte-identical [`snapshot`]s.
//!
//! [`snapshot`]: ProjectionState::snapshot

mod apply;
mod queries;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use convoy_core::{
    Agent, Bead, ConvoyResult, EntityRef, Event, Message, Offset, Project, Receipt, Reservation,
    StorageError,
};
use serde::Serialize;

/// Materialized tables. Everything here is covered by the snapshot.
#[derive(Debug, Default, Serialize)]
pub(crate) struct Tables {
    pub(crate) project: Option<Project>,
    pub(crate) agents: BTreeMap<String, Agent>,
    pub(crate) messages: BTreeMap<Offset, Message>,
    /// message id -> recipient name -> receipt
    pub(crate) receipts: BTreeMap<Offset, BTreeMap<String, Receipt>>,
    pub(crate) reservations: BTreeMap<Offset, Reservation>,
    pub(crate) beads: BTreeMap<String, Bead>,
    pub(crate) dirty: BTreeSet<EntityRef>,
    /// Events whose tag this build does not route.
    pub(crate) skipped: u64,
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    project_key: &'a str,
    applied_through: Offset,
    tables: &'a Tables,
}

/// Read model for one project.
#[derive(Debug)]
pub struct ProjectionState {
    project_key: String,
    applied_through: Offset,
    tables: Tables,
    /// bead id -> sorted open dependencies. Derived, never snapshotted.
    blocked_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl ProjectionState {
    /// An empty state that expects offset 1 next.
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            applied_through: 0,
            tables: Tables::default(),
            blocked_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build a state from an ordered event sequence.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::OutOfOrder` if the sequence is not gap-free
    /// from offset 1.
    pub fn replay<'a>(
        project_key: impl Into<String>,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> ConvoyResult<Self> {
        let mut state = Self::new(project_key);
        for event in events {
            state.apply(event)?;
        }
        Ok(state)
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    /// Offset of the last applied event, 0 when nothing was applied.
    pub fn applied_through(&self) -> Offset {
        self.applied_through
    }

    /// Number of events skipped because their tag is not routed.
    pub fn skipped_events(&self) -> u64 {
        self.tables.skipped
    }

    /// Canonical serialization of every table.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if a table cannot be encoded.
    pub fn snapshot(&self) -> ConvoyResult<Vec<u8>> {
        let view = SnapshotView {
            project_key: &self.project_key,
            applied_through: self.applied_through,
            tables: &self.tables,
        };
        serde_json::to_vec(&view).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn invalidate_blocked_cache(&mut self) {
        match self.blocked_cache.get_mut() {
            Ok(cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}
