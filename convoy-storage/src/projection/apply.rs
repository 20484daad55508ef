//! Event router.

use convoy_core::{
    Agent, Bead, ConvoyResult, EntityKind, EntityRef, Event, EventPayload, Message, Offset,
    PathPattern, Project, Receipt, Reservation, StorageError, Timestamp, DEFAULT_IMPORTANCE,
};

use super::ProjectionState;

#[derive(Clone, Copy)]
enum ReceiptKind {
    Read,
    Ack,
}

impl ProjectionState {
    /// Apply the next event.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::OutOfOrder` unless `event.offset` is exactly
    /// `applied_through + 1`; the state is left untouched in that case.
    pub fn apply(&mut self, event: &Event) -> ConvoyResult<()> {
        let expected = self.applied_through + 1;
        if event.offset != expected {
            return Err(StorageError::OutOfOrder {
                project_key: self.project_key.clone(),
                expected,
                got: event.offset,
            }
            .into());
        }

        let ts = event.timestamp;
        match &event.payload {
            EventPayload::ProjectCreated(p) => {
                if self.tables.project.is_none() {
                    self.tables.project = Some(Project {
                        slug: p.slug.clone(),
                        human_key: p.human_key.clone(),
                        created_at: ts,
                    });
                }
            }
            EventPayload::AgentRegistered(p) => {
                let agent = self
                    .tables
                    .agents
                    .entry(p.name.clone())
                    .or_insert_with(|| Agent {
                        name: p.name.clone(),
                        program: String::new(),
                        model: String::new(),
                        task_description: String::new(),
                        registered_at: ts,
                        last_active_at: ts,
                    });
                agent.program = p.program.clone();
                agent.model = p.model.clone();
                agent.task_description = p.task_description.clone();
                agent.last_active_at = ts;
                self.mark_dirty(EntityKind::Agent, &p.name);
            }
            EventPayload::AgentActive(p) => self.touch_agent(&p.name, ts),
            EventPayload::AgentTaskUpdated(p) => {
                if let Some(agent) = self.tables.agents.get_mut(&p.name) {
                    agent.task_description = p.task_description.clone();
                }
                self.touch_agent(&p.name, ts);
            }
            EventPayload::MessageSent(p) => {
                let message = Message {
                    id: event.offset,
                    thread_id: p.thread_id.clone(),
                    from_agent: p.from.clone(),
                    to_agents: p.to.clone(),
                    subject: p.subject.clone(),
                    body: p.body.clone(),
                    importance: p
                        .importance
                        .clone()
                        .unwrap_or_else(|| DEFAULT_IMPORTANCE.to_string()),
                    ack_required: p.ack_required,
                    created_at: ts,
                };
                self.tables.messages.insert(event.offset, message);
                self.mark_dirty(EntityKind::Message, event.offset.to_string());
                self.touch_agent(&p.from, ts);
            }
            EventPayload::MessageRead(p) => {
                self.record_receipt(p.message_id, &p.agent, ts, ReceiptKind::Read)
            }
            EventPayload::MessageAcknowledged(p) => {
                self.record_receipt(p.message_id, &p.agent, ts, ReceiptKind::Ack)
            }
            EventPayload::ReservationGranted(p) => match PathPattern::parse(&p.path_pattern) {
                Ok(path_pattern) => {
                    self.tables.reservations.insert(
                        event.offset,
                        Reservation {
                            id: event.offset,
                            agent_name: p.agent.clone(),
                            path_pattern,
                            exclusive: p.exclusive,
                            reason: p.reason.clone(),
                            granted_at: p.granted_at,
                            expires_at: p.expires_at,
                            released_at: None,
                        },
                    );
                    self.mark_dirty(EntityKind::Reservation, event.offset.to_string());
                    self.touch_agent(&p.agent, ts);
                }
                Err(e) => {
                    tracing::warn!(
                        project_key = %self.project_key,
                        offset = event.offset,
                        error = %e,
                        "ignoring reservation with unparseable pattern"
                    );
                }
            },
            EventPayload::ReservationReleased(p) => {
                for id in &p.reservation_ids {
                    let released = match self.tables.reservations.get_mut(id) {
                        Some(r) if r.agent_name == p.agent && r.released_at.is_none() => {
                            r.released_at = Some(p.released_at);
                            true
                        }
                        _ => false,
                    };
                    if released {
                        self.mark_dirty(EntityKind::Reservation, id.to_string());
                    }
                }
                self.touch_agent(&p.agent, ts);
            }
            EventPayload::BeadCreated(p) => {
                let bead = self.bead_entry(&p.id, ts);
                bead.title = p.title.clone();
                self.bead_changed(&p.id);
            }
            EventPayload::BeadClosed(p) | EventPayload::BeadReopened(p) => {
                let closed = matches!(event.payload, EventPayload::BeadClosed(_));
                if let Some(bead) = self.tables.beads.get_mut(&p.id) {
                    bead.closed = closed;
                    bead.updated_at = ts;
                    self.bead_changed(&p.id);
                }
            }
            EventPayload::DependencyAdded(p) => {
                self.bead_entry(&p.bead_id, ts)
                    .depends_on
                    .insert(p.depends_on.clone());
                self.bead_changed(&p.bead_id);
            }
            EventPayload::DependencyRemoved(p) => {
                if let Some(bead) = self.tables.beads.get_mut(&p.bead_id) {
                    bead.depends_on.remove(&p.depends_on);
                    bead.updated_at = ts;
                    self.bead_changed(&p.bead_id);
                }
            }
            EventPayload::ExportAcknowledged(p) => {
                for entity in &p.entities {
                    self.tables.dirty.remove(entity);
                }
            }
            EventPayload::Unrecognized { event_type, .. } => {
                tracing::warn!(
                    project_key = %self.project_key,
                    offset = event.offset,
                    event_type = %event_type,
                    "skipping unrecognized event type"
                );
                self.tables.skipped += 1;
            }
        }

        self.applied_through = event.offset;
        Ok(())
    }

    fn mark_dirty(&mut self, kind: EntityKind, id: impl Into<String>) {
        self.tables.dirty.insert(EntityRef::new(kind, id));
    }

    /// Bump `last_active_at` of a known agent. Unknown names are ignored.
    fn touch_agent(&mut self, name: &str, ts: Timestamp) {
        if let Some(agent) = self.tables.agents.get_mut(name) {
            agent.last_active_at = ts;
            self.mark_dirty(EntityKind::Agent, name);
        }
    }

    fn record_receipt(&mut self, message_id: Offset, agent: &str, ts: Timestamp, kind: ReceiptKind) {
        let is_recipient = self
            .tables
            .messages
            .get(&message_id)
            .is_some_and(|m| m.to_agents.iter().any(|to| to == agent));
        if !is_recipient {
            tracing::debug!(
                project_key = %self.project_key,
                message_id,
                agent,
                "receipt for unknown message or non-recipient ignored"
            );
            return;
        }

        let receipt = self
            .tables
            .receipts
            .entry(message_id)
            .or_default()
            .entry(agent.to_string())
            .or_insert_with(|| Receipt {
                message_id,
                agent: agent.to_string(),
                read_at: None,
                acked_at: None,
            });
        // First timestamp wins; an ack implies a read.
        receipt.read_at.get_or_insert(ts);
        if let ReceiptKind::Ack = kind {
            receipt.acked_at.get_or_insert(ts);
        }
        self.mark_dirty(EntityKind::Message, message_id.to_string());
        self.touch_agent(agent, ts);
    }

    /// Beads referenced by a dependency before `bead_created` are created
    /// on demand, open and untitled.
    fn bead_entry(&mut self, id: &str, ts: Timestamp) -> &mut Bead {
        let bead = self
            .tables
            .beads
            .entry(id.to_string())
            .or_insert_with(|| Bead {
                id: id.to_string(),
                title: String::new(),
                closed: false,
                depends_on: Default::default(),
                updated_at: ts,
            });
        bead.updated_at = ts;
        bead
    }

    fn bead_changed(&mut self, id: &str) {
        self.invalidate_blocked_cache();
        self.mark_dirty(EntityKind::Bead, id);
    }
}
