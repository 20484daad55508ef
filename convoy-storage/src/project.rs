//! Per-project write path.
//!
//! A [`ProjectHandle`] pairs a project's slice of the event log with its
//! [`ProjectionState`]. The state sits behind a `tokio::sync::RwLock`
//! whose write half is the project writer lock: it is held across the log
//! append and the projection apply, so the read model advances in offset
//! order and readers never see a half-applied write.

use std::sync::Arc;

use convoy_core::{
    Agent, AgentActive, AgentRegistered, AgentTaskUpdated, Clock, ConvoyError, ConvoyResult,
    EntityRef, Event, EventPayload, ExportAcknowledged, InboxEntry, InboxQuery, Message,
    MessageReceipt, MessageSent, Offset, Project, ProjectCreated, Receipt, StoreConfig,
    Timestamp,
};
use convoy_events::EventLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, RwLock, RwLockReadGuard};

use crate::names::unique_agent_name;
use crate::projection::ProjectionState;
use crate::rebuild::RebuildStatus;

// ============================================================================
// REQUESTS
// ============================================================================

/// Register (or refresh) an agent. A missing name is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAgent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default)]
    pub ack_required: bool,
}

// ============================================================================
// PROJECT HANDLE
// ============================================================================

/// Shared handle to one project.
pub struct ProjectHandle {
    slug: String,
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    replay_batch_size: usize,
    pub(crate) state: RwLock<ProjectionState>,
    tail: watch::Sender<Offset>,
    pub(crate) rebuild_status: watch::Sender<RebuildStatus>,
}

impl std::fmt::Debug for ProjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectHandle")
            .field("slug", &self.slug)
            .field("tail", &*self.tail.borrow())
            .finish_non_exhaustive()
    }
}

impl ProjectHandle {
    /// Load a project by replaying its log.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the log cannot be read or its history is
    /// not gap-free.
    pub async fn load(
        slug: impl Into<String>,
        log: Arc<dyn EventLog>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> ConvoyResult<Self> {
        let slug = slug.into();
        let mut state = ProjectionState::new(slug.clone());
        catch_up(log.as_ref(), &mut state, config.replay_batch_size).await?;
        let head = state.applied_through();
        tracing::debug!(project_key = %slug, head, "project loaded");

        Ok(Self {
            slug,
            log,
            clock,
            replay_batch_size: config.replay_batch_size,
            state: RwLock::new(state),
            tail: watch::Sender::new(head),
            rebuild_status: watch::Sender::new(RebuildStatus::Idle),
        })
    }

    /// The log partition key of this project.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn replay_batch_size(&self) -> usize {
        self.replay_batch_size
    }

    /// Shared access to the read model.
    pub async fn read(&self) -> RwLockReadGuard<'_, ProjectionState> {
        self.state.read().await
    }

    /// Offset of the newest applied event.
    pub async fn latest_offset(&self) -> Offset {
        self.state.read().await.applied_through()
    }

    /// Receiver that observes the newest appended offset.
    pub fn subscribe_tail(&self) -> watch::Receiver<Offset> {
        self.tail.subscribe()
    }

    /// Latest rebuild status.
    pub fn rebuild_status(&self) -> RebuildStatus {
        self.rebuild_status.borrow().clone()
    }

    /// Append a raw `{type, data}` pair.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` before any offset is assigned when the
    /// pair does not decode or names a store-managed type (agents, messages,
    /// receipts, reservations, exports), or a `StorageError` if the append
    /// fails. Store-managed events come only from the typed operations and
    /// the lease manager.
    pub async fn append(&self, event_type: &str, data: Value) -> ConvoyResult<Event> {
        let payload = EventPayload::parse(event_type, data)?;
        if payload.is_store_managed() {
            return Err(ConvoyError::invalid(
                "type",
                format!("{event_type} events are written by the store's own operations"),
            ));
        }
        self.append_payload(payload).await
    }

    /// Append one typed payload.
    pub async fn append_payload(&self, payload: EventPayload) -> ConvoyResult<Event> {
        let (events, ()) = self.transact(move |_, _| Ok((vec![payload], ()))).await?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| ConvoyError::invalid("payload", "nothing was appended"))
    }

    /// Decide and append atomically.
    ///
    /// `decide` sees the current state and the append timestamp while the
    /// writer lock is held, and returns the payloads to append plus a value
    /// for the caller. No other write can interleave between the decision
    /// and the appends.
    ///
    /// # Errors
    ///
    /// Returns whatever `decide` returns, a `ValidationError` if a payload
    /// is structurally invalid (nothing is appended then), or a
    /// `StorageError` from the log. A storage failure part-way through keeps
    /// the events already appended; the state always matches the log.
    pub async fn transact<R, F>(&self, decide: F) -> ConvoyResult<(Vec<Event>, R)>
    where
        F: FnOnce(&ProjectionState, Timestamp) -> ConvoyResult<(Vec<EventPayload>, R)>,
    {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let (payloads, out) = decide(&*state, now)?;
        for payload in &payloads {
            payload.validate()?;
        }

        let mut events = Vec::with_capacity(payloads.len());
        let mut failure = None;
        for payload in &payloads {
            match self.log.append(&self.slug, payload, now).await {
                Ok(event) => {
                    if let Err(e) = state.apply(&event) {
                        tracing::error!(
                            project_key = %self.slug,
                            offset = event.offset,
                            error = %e,
                            "projection out of step with log, catching up"
                        );
                        catch_up(self.log.as_ref(), &mut *state, self.replay_batch_size).await?;
                    }
                    events.push(event);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(last) = events.last() {
            self.tail.send_replace(last.offset);
            tracing::debug!(
                project_key = %self.slug,
                appended = events.len(),
                head = last.offset,
                "events appended"
            );
        }
        match failure {
            Some(e) => Err(e),
            None => Ok((events, out)),
        }
    }

    // ========================================================================
    // AGENTS
    // ========================================================================

    pub async fn register_agent(&self, request: RegisterAgent) -> ConvoyResult<Agent> {
        let (_, name) = self
            .transact(move |state, _| {
                let name = match request.name.filter(|n| !n.trim().is_empty()) {
                    Some(name) => name,
                    None => unique_agent_name(|candidate| state.agent(candidate).is_some()),
                };
                let payload = EventPayload::AgentRegistered(AgentRegistered {
                    name: name.clone(),
                    program: request.program.unwrap_or_else(|| "unknown".to_string()),
                    model: request.model.unwrap_or_else(|| "unknown".to_string()),
                    task_description: request.task_description.unwrap_or_default(),
                });
                Ok((vec![payload], name))
            })
            .await?;
        self.agent(&name).await
    }

    /// Fetch a registered agent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown name.
    pub async fn agent(&self, name: &str) -> ConvoyResult<Agent> {
        self.read()
            .await
            .agent(name)
            .cloned()
            .ok_or_else(|| ConvoyError::not_found("agent", name))
    }

    /// Record that an agent is alive.
    pub async fn heartbeat(&self, name: &str) -> ConvoyResult<Agent> {
        self.transact(|state, _| {
            require_agent(state, name)?;
            Ok((
                vec![EventPayload::AgentActive(AgentActive {
                    name: name.to_string(),
                })],
                (),
            ))
        })
        .await?;
        self.agent(name).await
    }

    pub async fn update_task(&self, name: &str, task_description: String) -> ConvoyResult<Agent> {
        self.transact(|state, _| {
            require_agent(state, name)?;
            Ok((
                vec![EventPayload::AgentTaskUpdated(AgentTaskUpdated {
                    name: name.to_string(),
                    task_description,
                })],
                (),
            ))
        })
        .await?;
        self.agent(name).await
    }

    /// Inbox of a registered agent.
    pub async fn inbox(&self, agent: &str, query: &InboxQuery) -> ConvoyResult<Vec<InboxEntry>> {
        let state = self.read().await;
        require_agent(&*state, agent)?;
        Ok(state.inbox(agent, query))
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Send a message from a registered agent.
    ///
    /// Recipients are recorded as given; names that register later still
    /// see the message in their inbox.
    pub async fn send_message(&self, request: SendMessage) -> ConvoyResult<Message> {
        let (events, ()) = self
            .transact(move |state, _| {
                require_agent(state, &request.from)?;
                let payload = EventPayload::MessageSent(MessageSent {
                    thread_id: request.thread_id,
                    from: request.from,
                    to: request.to,
                    subject: request.subject,
                    body: request.body,
                    importance: request.importance,
                    ack_required: request.ack_required,
                });
                Ok((vec![payload], ()))
            })
            .await?;
        let id = events
            .first()
            .map(|e| e.offset)
            .ok_or_else(|| ConvoyError::invalid("message", "nothing was appended"))?;
        self.message(id).await
    }

    pub async fn message(&self, id: Offset) -> ConvoyResult<Message> {
        self.read()
            .await
            .message(id)
            .cloned()
            .ok_or_else(|| ConvoyError::not_found("message", id))
    }

    /// Mark a message read by one of its recipients.
    pub async fn mark_read(&self, message_id: Offset, agent: &str) -> ConvoyResult<Receipt> {
        self.receipt_event(message_id, agent, EventPayload::MessageRead)
            .await
    }

    /// Acknowledge a message. Implies read.
    pub async fn acknowledge(&self, message_id: Offset, agent: &str) -> ConvoyResult<Receipt> {
        self.receipt_event(message_id, agent, EventPayload::MessageAcknowledged)
            .await
    }

    async fn receipt_event(
        &self,
        message_id: Offset,
        agent: &str,
        variant: fn(MessageReceipt) -> EventPayload,
    ) -> ConvoyResult<Receipt> {
        self.transact(|state, _| {
            require_agent(state, agent)?;
            let message = state
                .message(message_id)
                .ok_or_else(|| ConvoyError::not_found("message", message_id))?;
            if !message.to_agents.iter().any(|to| to == agent) {
                return Err(ConvoyError::invalid(
                    "agent",
                    format!("{agent} is not a recipient of message {message_id}"),
                ));
            }
            Ok((
                vec![variant(MessageReceipt {
                    message_id,
                    agent: agent.to_string(),
                })],
                (),
            ))
        })
        .await?;

        let state = self.read().await;
        state
            .receipts(message_id)
            .into_iter()
            .find(|r| r.agent == agent)
            .cloned()
            .ok_or_else(|| ConvoyError::not_found("receipt", format!("{message_id}/{agent}")))
    }

    // ========================================================================
    // EXPORT
    // ========================================================================

    /// Acknowledge exported entities, or everything currently dirty when
    /// `entities` is `None`. Returns what was acknowledged.
    pub async fn acknowledge_export(
        &self,
        entities: Option<Vec<EntityRef>>,
    ) -> ConvoyResult<Vec<EntityRef>> {
        let (_, acknowledged) = self
            .transact(move |state, _| {
                let entities = entities.unwrap_or_else(|| state.dirty_entities());
                if entities.is_empty() {
                    return Ok((Vec::new(), entities));
                }
                let payload = EventPayload::ExportAcknowledged(ExportAcknowledged {
                    entities: entities.clone(),
                });
                Ok((vec![payload], entities))
            })
            .await?;
        Ok(acknowledged)
    }

    /// Record `project_created` unless the project already has one.
    pub(crate) async fn ensure_created(&self, human_key: &str) -> ConvoyResult<Project> {
        self.transact(|state, _| {
            if state.project().is_some() {
                return Ok((Vec::new(), ()));
            }
            Ok((
                vec![EventPayload::ProjectCreated(ProjectCreated {
                    slug: self.slug.clone(),
                    human_key: human_key.to_string(),
                })],
                (),
            ))
        })
        .await?;
        self.read()
            .await
            .project()
            .cloned()
            .ok_or_else(|| ConvoyError::not_found("project", &self.slug))
    }
}

fn require_agent(state: &ProjectionState, name: &str) -> ConvoyResult<()> {
    match state.agent(name) {
        Some(_) => Ok(()),
        None => Err(ConvoyError::not_found("agent", name)),
    }
}

/// Apply everything in the log past `state.applied_through()`.
pub(crate) async fn catch_up(
    log: &dyn EventLog,
    state: &mut ProjectionState,
    batch: usize,
) -> ConvoyResult<()> {
    loop {
        let page = log
            .read(state.project_key(), state.applied_through() + 1, Some(batch.max(1)))
            .await?;
        if page.is_empty() {
            return Ok(());
        }
        for event in &page {
            state.apply(event)?;
        }
    }
}
