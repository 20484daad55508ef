//! Per-client bounded event buffer.
//!
//! `enqueue` is synchronous so the fan-out never waits on a client. When the
//! buffer is full the oldest undelivered event is evicted and counted in
//! `dropped`. `flush` drains the buffer into an [`EventSink`] under an async
//! lock, so two flushes of the same client never interleave.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use convoy_core::{Event, Offset, TransportError};
use serde::{Deserialize, Serialize};

use super::sink::{EventSink, Frame};

/// Emitted when a buffer goes from healthy to unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureSignal {
    pub buffered: usize,
    pub dropped: u64,
    pub max_size: usize,
}

/// Result of one [`ClientBuffer::enqueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Offset of the event evicted to make room, if any.
    pub evicted: Option<Offset>,
    pub backpressure: Option<BackpressureSignal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub buffered: usize,
    pub max_size: usize,
    pub dropped: u64,
    pub cursor: Offset,
    pub healthy: bool,
}

#[derive(Debug)]
struct Inner {
    events: VecDeque<Arc<Event>>,
    dropped: u64,
    reported_dropped: u64,
    cursor: Offset,
    healthy: bool,
}

enum Next {
    Dropped { dropped_total: u64, last_delivered: Offset },
    Event(Arc<Event>),
}

#[derive(Debug)]
pub struct ClientBuffer {
    max_size: usize,
    threshold: f64,
    inner: Mutex<Inner>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl ClientBuffer {
    /// `max_size` of 0 is treated as 1.
    pub fn new(max_size: usize, threshold: f64, cursor: Offset) -> Self {
        Self {
            max_size: max_size.max(1),
            threshold,
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                dropped: 0,
                reported_dropped: 0,
                cursor,
                healthy: true,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    // Nothing panics while the guard is held, so a poisoned lock still
    // guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn healthy_at(&self, buffered: usize) -> bool {
        (buffered as f64) / (self.max_size as f64) < self.threshold
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Buffer `event`, evicting the oldest one when full. Never blocks on
    /// the transport.
    pub fn enqueue(&self, event: Arc<Event>) -> EnqueueOutcome {
        let mut inner = self.lock();
        let mut outcome = EnqueueOutcome::default();

        if inner.events.len() >= self.max_size {
            outcome.evicted = inner.events.pop_front().map(|e| e.offset);
            inner.dropped += 1;
        }
        inner.events.push_back(event);

        let healthy = self.healthy_at(inner.events.len());
        if inner.healthy && !healthy {
            outcome.backpressure = Some(BackpressureSignal {
                buffered: inner.events.len(),
                dropped: inner.dropped,
                max_size: self.max_size,
            });
        }
        inner.healthy = healthy;
        outcome
    }

    /// Record that everything up to `offset` reached the client by another
    /// route (cursor replay).
    pub fn mark_delivered(&self, offset: Offset) {
        let mut inner = self.lock();
        inner.cursor = inner.cursor.max(offset);
    }

    /// Send everything buffered to `sink`, in offset order.
    ///
    /// Events at or below the cursor are discarded without sending. The
    /// cursor moves only after the sink accepts an event. A `dropped` frame
    /// precedes the next event whenever evictions happened since the last
    /// report.
    ///
    /// # Errors
    ///
    /// Returns the sink's `TransportError`; the event being sent is lost to
    /// this client and the cursor stays at the last confirmed offset.
    pub async fn flush(&self, sink: &dyn EventSink) -> Result<usize, TransportError> {
        let _flushing = self.flush_lock.lock().await;
        let mut sent = 0;

        loop {
            let next = {
                let mut inner = self.lock();
                if inner.dropped > inner.reported_dropped {
                    Next::Dropped {
                        dropped_total: inner.dropped,
                        last_delivered: inner.cursor,
                    }
                } else {
                    let cursor = inner.cursor;
                    while inner.events.front().is_some_and(|e| e.offset <= cursor) {
                        inner.events.pop_front();
                    }
                    match inner.events.pop_front() {
                        Some(event) => Next::Event(event),
                        None => {
                            inner.healthy = self.healthy_at(0);
                            break;
                        }
                    }
                }
            };

            match next {
                Next::Dropped {
                    dropped_total,
                    last_delivered,
                } => {
                    sink.send(Frame::Dropped {
                        dropped_total,
                        last_delivered,
                    })
                    .await?;
                    let mut inner = self.lock();
                    inner.reported_dropped = inner.reported_dropped.max(dropped_total);
                }
                Next::Event(event) => {
                    sink.send(Frame::Event(&event)).await?;
                    let mut inner = self.lock();
                    inner.cursor = inner.cursor.max(event.offset);
                    let buffered = inner.events.len();
                    inner.healthy = self.healthy_at(buffered);
                    sent += 1;
                }
            }
        }
        Ok(sent)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy_at(self.lock().events.len())
    }

    /// Last offset confirmed delivered.
    pub fn cursor(&self) -> Offset {
        self.lock().cursor
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.lock();
        BufferStats {
            buffered: inner.events.len(),
            max_size: self.max_size,
            dropped: inner.dropped,
            cursor: inner.cursor,
            healthy: self.healthy_at(inner.events.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use convoy_core::{AgentActive, EventPayload};
    use std::time::Duration;

    fn event(offset: Offset) -> Arc<Event> {
        Arc::new(Event {
            offset,
            project_key: "alpha".to_string(),
            timestamp: chrono::Utc::now(),
            payload: EventPayload::AgentActive(AgentActive {
                name: "BlueLake".to_string(),
            }),
        })
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Event(Offset),
        Dropped(u64, Offset),
        Connected(Offset),
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Sent>>,
        delay: Option<Duration>,
        fail_at: Option<Offset>,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<Sent> {
            self.frames.lock().map(|f| f.clone()).unwrap_or_default()
        }

        fn event_offsets(&self) -> Vec<Offset> {
            self.frames()
                .into_iter()
                .filter_map(|f| match f {
                    Sent::Event(o) => Some(o),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&self, frame: Frame<'_>) -> Result<(), TransportError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let sent = match frame {
                Frame::Connected { cursor } => Sent::Connected(cursor),
                Frame::Event(e) => {
                    if self.fail_at == Some(e.offset) {
                        return Err(TransportError::Closed);
                    }
                    Sent::Event(e.offset)
                }
                Frame::Dropped {
                    dropped_total,
                    last_delivered,
                } => Sent::Dropped(dropped_total, last_delivered),
            };
            if let Ok(mut frames) = self.frames.lock() {
                frames.push(sent);
            }
            Ok(())
        }

        async fn closed(&self) {
            std::future::pending::<()>().await
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let buffer = ClientBuffer::new(3, 0.5, 0);
        for offset in 1..=3 {
            assert_eq!(buffer.enqueue(event(offset)).evicted, None);
        }
        let outcome = buffer.enqueue(event(4));
        assert_eq!(outcome.evicted, Some(1));

        let stats = buffer.stats();
        assert_eq!(stats.buffered, 3);
        assert_eq!(stats.dropped, 1);

        let sink = RecordingSink::default();
        assert_eq!(buffer.flush(&sink).await, Ok(3));
        assert_eq!(sink.event_offsets(), vec![2, 3, 4]);
        assert_eq!(sink.frames()[0], Sent::Dropped(1, 0));
        assert_eq!(buffer.cursor(), 4);
    }

    #[test]
    fn test_backpressure_threshold() {
        let buffer = ClientBuffer::new(10, 0.5, 0);
        for offset in 1..=3 {
            assert!(buffer.enqueue(event(offset)).backpressure.is_none());
        }
        assert!(buffer.is_healthy());

        let mut signals = Vec::new();
        for offset in 4..=6 {
            if let Some(signal) = buffer.enqueue(event(offset)).backpressure {
                signals.push(signal);
            }
        }
        assert!(!buffer.is_healthy());
        assert_eq!(
            signals,
            vec![BackpressureSignal {
                buffered: 5,
                dropped: 0,
                max_size: 10,
            }]
        );
    }

    #[tokio::test]
    async fn test_signal_rearms_after_drain() {
        let buffer = ClientBuffer::new(4, 0.5, 0);
        assert!(buffer.enqueue(event(1)).backpressure.is_none());
        assert!(buffer.enqueue(event(2)).backpressure.is_some());
        assert!(buffer.enqueue(event(3)).backpressure.is_none());

        let sink = RecordingSink::default();
        assert_eq!(buffer.flush(&sink).await, Ok(3));
        assert!(buffer.is_healthy());

        assert!(buffer.enqueue(event(4)).backpressure.is_none());
        assert!(buffer.enqueue(event(5)).backpressure.is_some());
    }

    #[tokio::test]
    async fn test_flush_skips_delivered_offsets() {
        let buffer = ClientBuffer::new(10, 0.5, 2);
        for offset in 1..=5 {
            buffer.enqueue(event(offset));
        }
        buffer.mark_delivered(3);

        let sink = RecordingSink::default();
        assert_eq!(buffer.flush(&sink).await, Ok(2));
        assert_eq!(sink.event_offsets(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_concurrent_flushes_send_each_event_once() {
        let buffer = Arc::new(ClientBuffer::new(100, 0.9, 0));
        for offset in 1..=20 {
            buffer.enqueue(event(offset));
        }
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(1)),
            ..RecordingSink::default()
        });

        let (a, b) = tokio::join!(buffer.flush(sink.as_ref()), buffer.flush(sink.as_ref()));
        assert_eq!(a.unwrap_or(0) + b.unwrap_or(0), 20);
        assert_eq!(sink.event_offsets(), (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_send_keeps_cursor() {
        let buffer = ClientBuffer::new(10, 0.5, 0);
        for offset in 1..=4 {
            buffer.enqueue(event(offset));
        }
        let sink = RecordingSink {
            fail_at: Some(3),
            ..RecordingSink::default()
        };
        assert_eq!(buffer.flush(&sink).await, Err(TransportError::Closed));
        assert_eq!(buffer.cursor(), 2);
        assert_eq!(sink.event_offsets(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_dropped_reported_once() {
        let buffer = ClientBuffer::new(2, 1.0, 0);
        for offset in 1..=4 {
            buffer.enqueue(event(offset));
        }
        let sink = RecordingSink::default();
        buffer.flush(&sink).await.ok();
        buffer.enqueue(event(5));
        buffer.flush(&sink).await.ok();

        let dropped: Vec<Sent> = sink
            .frames()
            .into_iter()
            .filter(|f| matches!(f, Sent::Dropped(..)))
            .collect();
        assert_eq!(dropped, vec![Sent::Dropped(2, 0)]);
        assert_eq!(sink.event_offsets(), vec![3, 4, 5]);
    }

    proptest::proptest! {
        #[test]
        fn prop_overflow_keeps_newest(max_size in 1usize..8, count in 0u64..40) {
            let buffer = ClientBuffer::new(max_size, 0.5, 0);
            for offset in 1..=count {
                buffer.enqueue(event(offset));
            }
            let stats = buffer.stats();
            let kept = count.min(max_size as u64);
            proptest::prop_assert_eq!(stats.buffered as u64, kept);
            proptest::prop_assert_eq!(stats.dropped, count - kept);
            proptest::prop_assert_eq!(stats.cursor, 0);

            let front = buffer.lock().events.front().map(|e| e.offset);
            let expected_front = if count == 0 { None } else { Some(count - kept + 1) };
            proptest::prop_assert_eq!(front, expected_front);
        }
    }
}
