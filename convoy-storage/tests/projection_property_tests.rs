//! Property-Based Tests for the Projection Engine
//!
//! **Property: Deterministic replay**
//!
//! For any gap-free event history, replaying it from offset 1 SHALL produce
//! byte-identical snapshots, whether the history is applied in one pass,
//! split into a prefix and a tail, appended live through a project handle,
//! reloaded after a restart or rebuilt in the background.

use std::sync::Arc;

use convoy_core::BeadRef;
use convoy_storage::{ProjectionState, RebuildStatus};
use convoy_test_utils::fixtures::{self, open_store, stamp_events, test_store};
use convoy_test_utils::{generators, Clock, EventLog, EventLogExt, EventPayload, ManualClock};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

#[path = "support/runtime.rs"]
mod test_runtime_support;
use test_runtime_support::{fail, runtime};

const PROJECT: &str = "_repo";

fn unrecognized(script: &[EventPayload]) -> u64 {
    script.iter().filter(|p| !p.is_recognized()).count() as u64
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(60))]

    /// Two replays of the same history agree byte for byte.
    #[test]
    fn prop_replay_is_deterministic(script in generators::arb_event_script(40)) {
        let events = stamp_events(PROJECT, &script);
        let a = ProjectionState::replay(PROJECT, &events).map_err(fail("replay a"))?;
        let b = ProjectionState::replay(PROJECT, &events).map_err(fail("replay b"))?;

        prop_assert_eq!(a.applied_through(), events.len() as u64);
        prop_assert_eq!(a.skipped_events(), unrecognized(&script));
        prop_assert_eq!(
            a.snapshot().map_err(fail("snapshot a"))?,
            b.snapshot().map_err(fail("snapshot b"))?
        );
    }

    /// Replaying a prefix and then the tail equals replaying everything.
    #[test]
    fn prop_split_replay_matches_full(
        script in generators::arb_event_script(40),
        cut in 0usize..40,
    ) {
        let events = stamp_events(PROJECT, &script);
        let cut = cut.min(events.len());

        let full = ProjectionState::replay(PROJECT, &events).map_err(fail("full replay"))?;
        let mut split =
            ProjectionState::replay(PROJECT, &events[..cut]).map_err(fail("prefix replay"))?;
        for event in &events[cut..] {
            split.apply(event).map_err(fail("tail apply"))?;
        }

        prop_assert_eq!(
            full.snapshot().map_err(fail("snapshot full"))?,
            split.snapshot().map_err(fail("snapshot split"))?
        );
    }

    /// Live appends, a restart and a rebuild all land on the same state.
    #[test]
    fn prop_live_restart_and_rebuild_agree(script in generators::arb_event_script(30)) {
        let rt = runtime()?;
        rt.block_on(async {
            let store = test_store().await;
            let project = store.project("/repo").await;
            for payload in &script {
                project
                    .append_payload(payload.clone())
                    .await
                    .map_err(fail("append"))?;
            }
            let live = fixtures::snapshot(&project).await;

            let history = store
                .log
                .read_all(project.slug(), 7)
                .await
                .map_err(fail("read_all"))?;
            let replayed = ProjectionState::replay(project.slug(), &history)
                .map_err(fail("replay"))?;
            prop_assert_eq!(&live, &replayed.snapshot().map_err(fail("snapshot"))?);

            let restarted = open_store(Arc::clone(&store.log), ManualClock::new(store.clock.now()))
                .await;
            let reloaded = restarted
                .registry
                .project(project.slug())
                .await
                .map_err(fail("reload"))?;
            prop_assert_eq!(&live, &fixtures::snapshot(&reloaded).await);

            let status = project.rebuild().await.map_err(fail("rebuild"))?;
            prop_assert_eq!(
                status,
                RebuildStatus::Completed { through: history.len() as u64 }
            );
            prop_assert_eq!(&live, &fixtures::snapshot(&project).await);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[test]
fn test_gap_in_history_is_rejected() {
    let script = vec![
        EventPayload::BeadClosed(BeadRef { id: "bd-1".to_string() }),
        EventPayload::BeadClosed(BeadRef { id: "bd-2".to_string() }),
    ];
    let mut events = stamp_events(PROJECT, &script);
    events[1].offset = 3;
    let err = ProjectionState::replay(PROJECT, &events).expect_err("gap must be rejected");
    assert!(err.to_string().contains("expected offset 2, got 3"));
}

#[tokio::test]
async fn test_unknown_event_is_stored_and_skipped() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let before = project.read().await.dirty_entities();

    let event = project
        .append("x_future_event", serde_json::json!({ "anything": [1, 2, 3] }))
        .await
        .expect("unknown tags are accepted");
    assert_eq!(event.offset, 2);

    let state = project.read().await;
    assert_eq!(state.applied_through(), 2);
    assert_eq!(state.skipped_events(), 1);
    assert_eq!(state.dirty_entities(), before);
    drop(state);

    let stored = store.log.read(project.slug(), 2, Some(1)).await.expect("read");
    assert_eq!(stored[0].event_type(), "x_future_event");
}
