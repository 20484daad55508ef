//! Stream Hub Tests
//!
//! **Property: Ordered, exactly-once delivery per client**
//!
//! Every client SHALL receive each event after its cursor exactly once and in
//! offset order, unless its own buffer overflowed, in which case it SHALL be
//! told how many events it lost. A slow client SHALL NOT affect any other.

use std::sync::Arc;
use std::time::Duration;

use convoy_api::stream::StreamHub;
use convoy_core::Offset;
use convoy_storage::ProjectHandle;
use convoy_test_utils::assertions::assert_not_found;
use convoy_test_utils::fixtures::{small_stream_config, test_store};
use serde_json::json;

#[path = "support/sink.rs"]
mod sink_support;
use sink_support::{wait_until, RecordingSink, Sent, StallingSink};

const WAIT: Duration = Duration::from_secs(10);

async fn append_beads(project: &ProjectHandle, count: usize, start: usize) {
    for i in start..start + count {
        project
            .append("bead_created", json!({ "id": format!("bd-{i}"), "title": "stream" }))
            .await
            .expect("append should succeed");
    }
}

fn range(from: Offset, to: Offset) -> Vec<Offset> {
    (from..=to).collect()
}

#[tokio::test]
async fn test_clients_see_identical_order() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let base = project.latest_offset().await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(64))
        .expect("hub should start");

    let sinks: Vec<Arc<RecordingSink>> = (0..3).map(|_| Arc::new(RecordingSink::new())).collect();
    let mut clients = Vec::new();
    for sink in &sinks {
        let client = hub
            .connect(project.slug(), base, Arc::clone(sink) as _)
            .await
            .expect("connect");
        clients.push(client);
    }
    assert_eq!(hub.stats(Some(project.slug())).clients, 3);

    append_beads(&project, 10, 0).await;

    let expected = range(base + 1, base + 10);
    for sink in &sinks {
        assert!(
            wait_until(WAIT, || sink.event_offsets().len() >= 10).await,
            "client saw {:?}",
            sink.event_offsets()
        );
        assert_eq!(sink.event_offsets(), expected);
        assert_eq!(sink.frames().first(), Some(&Sent::Connected(base)));
        assert_eq!(sink.dropped_frames(), 0);
    }

    for client in clients {
        client.disconnect();
        client.finished().await;
    }
    assert_eq!(hub.stats(None).clients, 0);
}

#[tokio::test]
async fn test_resume_from_cursor_delivers_exactly_the_gap() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(64))
        .expect("hub should start");

    append_beads(&project, 5, 0).await;

    let first = Arc::new(RecordingSink::new());
    let client = hub
        .connect(project.slug(), 0, Arc::clone(&first) as _)
        .await
        .expect("connect");
    let head = project.latest_offset().await;
    assert!(wait_until(WAIT, || first.event_offsets().last() == Some(&head)).await);
    assert_eq!(first.event_offsets(), range(1, head));
    let cursor = client.stats().cursor;
    assert_eq!(cursor, head);
    client.disconnect();
    client.finished().await;

    // Events appended while nobody is listening.
    append_beads(&project, 5, 5).await;

    let second = Arc::new(RecordingSink::new());
    let client = hub
        .connect(project.slug(), cursor, Arc::clone(&second) as _)
        .await
        .expect("reconnect");
    assert!(wait_until(WAIT, || second.event_offsets().len() >= 5).await);
    assert_eq!(second.event_offsets(), range(cursor + 1, cursor + 5));

    // And live events after the replay, still without duplicates.
    append_beads(&project, 3, 10).await;
    assert!(wait_until(WAIT, || second.event_offsets().len() >= 8).await);
    assert_eq!(second.event_offsets(), range(cursor + 1, cursor + 8));
    assert_eq!(second.frames().first(), Some(&Sent::Connected(cursor)));

    client.disconnect();
    client.finished().await;
}

#[tokio::test]
async fn test_cursor_ahead_of_log_waits_for_new_events() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let base = project.latest_offset().await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(64))
        .expect("hub should start");

    let sink = Arc::new(RecordingSink::new());
    let client = hub
        .connect(project.slug(), base + 2, Arc::clone(&sink) as _)
        .await
        .expect("connect");

    append_beads(&project, 4, 0).await;
    assert!(wait_until(WAIT, || sink.event_offsets().len() >= 2).await);
    assert_eq!(sink.event_offsets(), range(base + 3, base + 4));

    client.disconnect();
    client.finished().await;
}

#[tokio::test]
async fn test_slow_client_does_not_stall_fast_client() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let base = project.latest_offset().await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(4))
        .expect("hub should start");

    let slow = Arc::new(RecordingSink::slow(Duration::from_millis(200)));
    let fast = Arc::new(RecordingSink::new());
    let slow_client = hub
        .connect(project.slug(), base, Arc::clone(&slow) as _)
        .await
        .expect("connect slow");
    let fast_client = hub
        .connect(project.slug(), base, Arc::clone(&fast) as _)
        .await
        .expect("connect fast");

    for i in 0..20 {
        append_beads(&project, 1, i).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let last = base + 20;
    assert!(wait_until(WAIT, || fast.event_offsets().last() == Some(&last)).await);
    assert_eq!(fast.event_offsets(), range(base + 1, last));
    assert_eq!(fast.dropped_frames(), 0);
    assert_eq!(fast_client.stats().dropped, 0);

    // The newest event is never evicted, so the slow client ends on it.
    assert!(wait_until(WAIT, || slow.event_offsets().last() == Some(&last)).await);
    let received = slow.event_offsets();
    assert!(received.windows(2).all(|w| w[0] < w[1]));
    assert!(slow.dropped_frames() >= 1);

    // Every event was either delivered or reported dropped, never both.
    let reported = slow
        .frames()
        .iter()
        .filter_map(|f| match f {
            Sent::Dropped(total, _) => Some(*total),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    assert_eq!(received.len() as u64 + reported, 20);
    assert_eq!(slow_client.stats().dropped, reported);

    slow_client.disconnect();
    fast_client.disconnect();
    slow_client.finished().await;
    fast_client.finished().await;
}

#[tokio::test]
async fn test_connect_to_unknown_project_fails() {
    let store = test_store().await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(8))
        .expect("hub should start");
    let result = hub
        .connect("no_such_project", 0, Arc::new(RecordingSink::new()) as _)
        .await
        .map(|client| client.id());
    assert_not_found(&result, "project");
}

#[tokio::test]
async fn test_shutdown_ends_every_client() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(8))
        .expect("hub should start");

    let client = hub
        .connect(project.slug(), 0, Arc::new(RecordingSink::new()) as _)
        .await
        .expect("connect");
    hub.shutdown();
    tokio::time::timeout(WAIT, client.finished())
        .await
        .expect("client should stop after shutdown");
}

#[tokio::test]
async fn test_disconnect_interrupts_a_stuck_send() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let base = project.latest_offset().await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(8))
        .expect("hub should start");

    let sink = Arc::new(StallingSink::default());
    let client = hub
        .connect(project.slug(), base, Arc::clone(&sink) as _)
        .await
        .expect("connect");

    append_beads(&project, 1, 0).await;
    assert!(wait_until(WAIT, || sink.stalled()).await);

    client.disconnect();
    tokio::time::timeout(Duration::from_secs(2), client.finished())
        .await
        .expect("client should stop while its send is pending");
    assert_eq!(hub.stats(Some(project.slug())).clients, 0);
}

#[tokio::test]
async fn test_shutdown_interrupts_a_stuck_replay() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    append_beads(&project, 3, 0).await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(8))
        .expect("hub should start");

    let sink = Arc::new(StallingSink::default());
    let client = hub
        .connect(project.slug(), 0, Arc::clone(&sink) as _)
        .await
        .expect("connect");
    assert!(wait_until(WAIT, || sink.stalled()).await);

    hub.shutdown();
    tokio::time::timeout(Duration::from_secs(2), client.finished())
        .await
        .expect("client should stop while replay is pending");
}

#[tokio::test]
async fn test_transport_error_drops_only_that_client() {
    let store = test_store().await;
    let project = store.project("/repo").await;
    let base = project.latest_offset().await;
    let hub = StreamHub::new(Arc::clone(&store.registry), small_stream_config(64))
        .expect("hub should start");

    let failing = Arc::new(RecordingSink::failing_at(base + 3));
    let healthy = Arc::new(RecordingSink::new());
    let failing_client = hub
        .connect(project.slug(), base, Arc::clone(&failing) as _)
        .await
        .expect("connect failing");
    let healthy_client = hub
        .connect(project.slug(), base, Arc::clone(&healthy) as _)
        .await
        .expect("connect healthy");

    for i in 0..5 {
        append_beads(&project, 1, i).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(wait_until(WAIT, || hub.stats(Some(project.slug())).clients == 1).await);
    tokio::time::timeout(WAIT, failing_client.finished())
        .await
        .expect("failed client should end on its own");
    assert_eq!(failing.event_offsets(), range(base + 1, base + 2));

    assert!(wait_until(WAIT, || healthy.event_offsets().len() >= 5).await);
    assert_eq!(healthy.event_offsets(), range(base + 1, base + 5));

    // The tailer keeps serving the survivor.
    append_beads(&project, 5, 5).await;
    assert!(wait_until(WAIT, || healthy.event_offsets().len() >= 10).await);
    assert_eq!(healthy.event_offsets(), range(base + 1, base + 10));
    assert_eq!(healthy.dropped_frames(), 0);

    let stats = hub.stats(Some(project.slug()));
    assert_eq!(stats.clients, 1);
    assert_eq!(stats.per_client[0].id, healthy_client.id());

    healthy_client.disconnect();
    healthy_client.finished().await;
}
