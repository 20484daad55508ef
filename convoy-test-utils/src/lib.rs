//! CONVOY Test Utilities
//!
//! Shared test infrastructure for the CONVOY workspace:
//! - Proptest generators for patterns, payloads and event scripts
//! - Isolated store fixtures over the in-memory log and a manual clock
//! - Assertions for CONVOY error variants and log invariants

pub use convoy_core::{
    Agent, Clock, ConvoyError, ConvoyResult, EntityKind, EntityRef, Event, EventPayload,
    LeaseConfig, LeaseMode, ManualClock, Message, Offset, PathPattern, ReserveRequest,
    StorageError, StoreConfig, StreamConfig, Timestamp, ValidationError,
};
pub use convoy_events::{EventLog, EventLogExt, InMemoryEventLog};
pub use convoy_storage::{ProjectHandle, ProjectRegistry, RegisterAgent, RegistryConfig};

use chrono::{DateTime, Utc};

/// Fixed instant every fixture clock starts at, so snapshots are stable.
pub fn epoch() -> Timestamp {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_else(Utc::now)
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CONVOY inputs.

    use super::*;
    use chrono::Duration;
    use convoy_core::{
        AgentActive, AgentRegistered, AgentTaskUpdated, BeadCreated, BeadRef, DependencyChange,
        ExportAcknowledged, MessageReceipt, MessageSent, ReservationGranted, ReservationReleased,
    };
    use proptest::prelude::*;

    /// Agents that scripted events refer to.
    pub const AGENTS: &[&str] = &["BlueLake", "GreenCastle", "RedFox"];

    /// Beads that scripted events refer to.
    pub const BEADS: &[&str] = &["bd-1", "bd-2", "bd-3", "bd-4"];

    const SEGMENTS: &[&str] = &["src", "lib", "docs", "a.rs", "b.rs", "mod.rs"];
    const THREADS: &[&str] = &["t-1", "t-2"];

    pub fn arb_agent_name() -> impl Strategy<Value = String> {
        prop::sample::select(AGENTS).prop_map(str::to_string)
    }

    pub fn arb_bead_id() -> impl Strategy<Value = String> {
        prop::sample::select(BEADS).prop_map(str::to_string)
    }

    /// Generate a Timestamp within a day of [`epoch`].
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..86_400).prop_map(|secs| epoch() + Duration::seconds(secs))
    }

    pub fn arb_lease_mode() -> impl Strategy<Value = LeaseMode> {
        prop_oneof![Just(LeaseMode::Exclusive), Just(LeaseMode::Shared)]
    }

    /// A literal path segment from a tiny alphabet, so overlaps are common.
    pub fn arb_literal_segment() -> impl Strategy<Value = String> {
        prop::sample::select(SEGMENTS).prop_map(str::to_string)
    }

    fn arb_glob_segment() -> impl Strategy<Value = String> {
        prop_oneof![
            4 => arb_literal_segment(),
            1 => Just("*".to_string()),
            1 => Just("*.rs".to_string()),
            1 => Just("?.rs".to_string()),
            1 => Just("**".to_string()),
        ]
    }

    /// A concrete, project-relative file path.
    pub fn arb_concrete_path() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_literal_segment(), 1..4).prop_map(|segs| segs.join("/"))
    }

    /// A raw reservation pattern that always parses.
    pub fn arb_path_pattern() -> impl Strategy<Value = String> {
        (
            prop::collection::vec(arb_glob_segment(), 1..4),
            any::<bool>(),
        )
            .prop_map(|(segs, subtree)| {
                let mut raw = segs.join("/");
                if subtree {
                    raw.push('/');
                }
                raw
            })
    }

    /// A valid, recognized payload over [`AGENTS`] and [`BEADS`].
    ///
    /// Message and reservation ids are drawn from `1..=max_offset`; ids that
    /// do not point at a matching event are skipped by the projection, which
    /// is exactly the behaviour replay tests need to cover.
    pub fn arb_payload(max_offset: Offset) -> impl Strategy<Value = EventPayload> {
        let max_offset = max_offset.max(1);
        prop_oneof![
            arb_agent_name().prop_map(|name| EventPayload::AgentRegistered(AgentRegistered {
                name,
                program: "proptest".to_string(),
                model: "scripted".to_string(),
                task_description: String::new(),
            })),
            arb_agent_name().prop_map(|name| EventPayload::AgentActive(AgentActive { name })),
            (arb_agent_name(), "[a-z ]{0,12}").prop_map(|(name, task_description)| {
                EventPayload::AgentTaskUpdated(AgentTaskUpdated {
                    name,
                    task_description,
                })
            }),
            (
                arb_agent_name(),
                prop::collection::vec(arb_agent_name(), 1..3),
                "[a-z]{1,8}",
                prop::option::of(prop::sample::select(THREADS)),
                any::<bool>(),
            )
                .prop_map(|(from, to, subject, thread, urgent)| {
                    EventPayload::MessageSent(MessageSent {
                        thread_id: thread.map(str::to_string),
                        from,
                        to,
                        subject,
                        body: "body".to_string(),
                        importance: urgent.then(|| "urgent".to_string()),
                        ack_required: urgent,
                    })
                }),
            (1..=max_offset, arb_agent_name()).prop_map(|(message_id, agent)| {
                EventPayload::MessageRead(MessageReceipt { message_id, agent })
            }),
            (1..=max_offset, arb_agent_name()).prop_map(|(message_id, agent)| {
                EventPayload::MessageAcknowledged(MessageReceipt { message_id, agent })
            }),
            (
                arb_agent_name(),
                arb_path_pattern(),
                any::<bool>(),
                arb_timestamp(),
                1i64..7200
            )
                .prop_map(|(agent, path_pattern, exclusive, granted_at, ttl)| {
                    EventPayload::ReservationGranted(ReservationGranted {
                        agent,
                        path_pattern,
                        exclusive,
                        reason: String::new(),
                        granted_at,
                        expires_at: granted_at + Duration::seconds(ttl),
                    })
                }),
            (
                arb_agent_name(),
                prop::collection::vec(1..=max_offset, 0..3),
                arb_timestamp()
            )
                .prop_map(|(agent, reservation_ids, released_at)| {
                    EventPayload::ReservationReleased(ReservationReleased {
                        agent,
                        reservation_ids,
                        released_at,
                    })
                }),
            (arb_bead_id(), "[a-z]{0,6}")
                .prop_map(|(id, title)| EventPayload::BeadCreated(BeadCreated { id, title })),
            arb_bead_id().prop_map(|id| EventPayload::BeadClosed(BeadRef { id })),
            arb_bead_id().prop_map(|id| EventPayload::BeadReopened(BeadRef { id })),
            arb_dependency().prop_map(EventPayload::DependencyAdded),
            arb_dependency().prop_map(EventPayload::DependencyRemoved),
            prop::collection::vec(arb_bead_id(), 0..2).prop_map(|ids| {
                EventPayload::ExportAcknowledged(ExportAcknowledged {
                    entities: ids
                        .into_iter()
                        .map(|id| EntityRef::new(EntityKind::Bead, id))
                        .collect(),
                })
            }),
        ]
    }

    fn arb_dependency() -> impl Strategy<Value = DependencyChange> {
        (0..BEADS.len(), 1..BEADS.len()).prop_map(|(a, step)| DependencyChange {
            bead_id: BEADS[a].to_string(),
            depends_on: BEADS[(a + step) % BEADS.len()].to_string(),
        })
    }

    /// A tag no build of CONVOY routes.
    pub fn arb_unrecognized_payload() -> impl Strategy<Value = EventPayload> {
        ("x_[a-z]{3,10}", any::<u32>()).prop_map(|(event_type, n)| EventPayload::Unrecognized {
            event_type,
            data: serde_json::json!({ "n": n }),
        })
    }

    /// A script of payloads, mostly recognized with the odd unknown tag.
    pub fn arb_event_script(max_len: usize) -> impl Strategy<Value = Vec<EventPayload>> {
        let max_offset = max_len as Offset;
        prop::collection::vec(
            prop_oneof![
                19 => arb_payload(max_offset),
                1 => arb_unrecognized_payload(),
            ],
            0..max_len,
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Isolated stores for tests. Nothing here is shared between calls.

    use super::*;
    use std::sync::Arc;

    /// A registry over its own in-memory log, driven by a manual clock.
    #[derive(Debug, Clone)]
    pub struct TestStore {
        pub registry: Arc<ProjectRegistry>,
        pub log: Arc<InMemoryEventLog>,
        pub clock: ManualClock,
    }

    /// Registry config with a short default lease.
    pub fn registry_config() -> RegistryConfig {
        RegistryConfig {
            store: StoreConfig {
                replay_batch_size: 8,
                ..StoreConfig::default()
            },
            lease: LeaseConfig {
                default_ttl_secs: 300,
                max_ttl_secs: 3600,
                ..LeaseConfig::default()
            },
        }
    }

    /// Stream config small enough to overflow in a test.
    pub fn small_stream_config(buffer_max_size: usize) -> StreamConfig {
        StreamConfig {
            buffer_max_size,
            replay_page_size: 4,
            tail_poll_interval: std::time::Duration::from_millis(20),
            ..StreamConfig::default()
        }
    }

    /// Open a fresh store.
    pub async fn test_store() -> TestStore {
        let log = Arc::new(InMemoryEventLog::new());
        open_store(log, ManualClock::new(epoch())).await
    }

    /// Open a store over an existing log, e.g. to simulate a restart.
    pub async fn open_store(log: Arc<InMemoryEventLog>, clock: ManualClock) -> TestStore {
        let registry = ProjectRegistry::open(
            Arc::clone(&log) as Arc<dyn EventLog>,
            Arc::new(clock.clone()),
            registry_config(),
        )
        .await
        .expect("in-memory registry should open");
        TestStore {
            registry: Arc::new(registry),
            log,
            clock,
        }
    }

    impl TestStore {
        /// Ensure a project and return its handle.
        pub async fn project(&self, human_key: &str) -> Arc<ProjectHandle> {
            let project = self
                .registry
                .ensure_project(human_key)
                .await
                .expect("ensure_project should succeed");
            self.registry
                .project(&project.slug)
                .await
                .expect("project should load after ensure")
        }

        /// Move the clock forward.
        pub fn advance_secs(&self, secs: i64) {
            self.clock.advance(chrono::Duration::seconds(secs));
        }
    }

    /// Register `name` with fixed program and model strings.
    pub async fn register(project: &ProjectHandle, name: &str) -> Agent {
        project
            .register_agent(RegisterAgent {
                name: Some(name.to_string()),
                program: Some("test-program".to_string()),
                model: Some("test-model".to_string()),
                task_description: None,
            })
            .await
            .expect("register_agent should succeed")
    }

    /// Stamp `payloads` as a gap-free history starting at offset 1, one
    /// second apart from [`epoch`].
    pub fn stamp_events(project_key: &str, payloads: &[EventPayload]) -> Vec<Event> {
        payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| Event {
                offset: i as Offset + 1,
                project_key: project_key.to_string(),
                timestamp: epoch() + chrono::Duration::seconds(i as i64),
                payload: payload.clone(),
            })
            .collect()
    }

    /// Snapshot bytes of a project's current read model.
    pub async fn snapshot(project: &ProjectHandle) -> Vec<u8> {
        project
            .read()
            .await
            .snapshot()
            .expect("snapshot should serialize")
    }

    /// An exclusive reservation request with the default TTL.
    pub fn exclusive(paths: &[&str]) -> ReserveRequest {
        ReserveRequest {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            exclusive: true,
            ttl_seconds: None,
            reason: None,
        }
    }

    /// A shared reservation request with the default TTL.
    pub fn shared(paths: &[&str]) -> ReserveRequest {
        ReserveRequest {
            exclusive: false,
            ..exclusive(paths)
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for CONVOY-specific validation.

    use super::*;

    /// Assert that a ConvoyResult is a NotFound for `entity`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ConvoyResult<T>, entity: &str) {
        match result {
            Err(ConvoyError::Storage(StorageError::NotFound { entity: e, .. })) => {
                assert_eq!(e, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound error for {entity}, got: {other:?}"),
        }
    }

    /// Assert that a ConvoyResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ConvoyResult<T>) {
        match result {
            Err(ConvoyError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {other:?}"),
        }
    }

    /// Assert that a ConvoyResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &ConvoyResult<T>) {
        match result {
            Err(ConvoyError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {other:?}"),
        }
    }

    /// Assert that `events` carry offsets `first, first + 1, ...` with no gaps.
    #[track_caller]
    pub fn assert_contiguous(events: &[Event], first: Offset) {
        for (i, event) in events.iter().enumerate() {
            assert_eq!(
                event.offset,
                first + i as Offset,
                "offset gap at position {i} (event type {})",
                event.event_type()
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_store_fixture_is_isolated() {
        let a = fixtures::test_store().await;
        let b = fixtures::test_store().await;
        let project = a.project("/alpha").await;
        fixtures::register(&project, "BlueLake").await;

        assert_eq!(a.registry.project_keys(), vec!["_alpha".to_string()]);
        assert!(b.registry.project_keys().is_empty());
    }

    #[tokio::test]
    async fn test_store_clock_is_manual() {
        let store = fixtures::test_store().await;
        let project = store.project("/alpha").await;
        assert_eq!(project.now(), epoch());
        store.advance_secs(90);
        assert_eq!(project.now(), epoch() + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_assertion_not_found() {
        let result: ConvoyResult<()> = Err(ConvoyError::not_found("agent", "Ghost"));
        assertions::assert_not_found(&result, "agent");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_patterns_parse(raw in generators::arb_path_pattern()) {
            prop_assert!(PathPattern::parse(&raw).is_ok());
        }

        #[test]
        fn prop_generated_payloads_validate(payload in generators::arb_payload(20)) {
            prop_assert!(payload.validate().is_ok());
            prop_assert!(payload.is_recognized());
        }

        #[test]
        fn prop_generated_paths_are_literal(path in generators::arb_concrete_path()) {
            let pattern = PathPattern::parse(&path).expect("literal path parses");
            prop_assert!(pattern.is_literal());
        }
    }
}
