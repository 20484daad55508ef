//! In-process stream sinks for hub tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use convoy_api::stream::{EventSink, Frame};
use convoy_core::{Offset, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Connected(Offset),
    Event(Offset),
    Dropped(u64, Offset),
}

/// Records every frame; optionally slow, optionally failing on one event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<Sent>>,
    delay: Option<Duration>,
    fail_at: Option<Offset>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Rejects the event at `offset` with `TransportError::Closed`.
    pub fn failing_at(offset: Offset) -> Self {
        Self {
            fail_at: Some(offset),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<Sent> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn event_offsets(&self) -> Vec<Offset> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Sent::Event(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    pub fn dropped_frames(&self) -> usize {
        self.frames()
            .iter()
            .filter(|f| matches!(f, Sent::Dropped(..)))
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, frame: Frame<'_>) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let (Frame::Event(e), Some(fail_at)) = (&frame, self.fail_at) {
            if e.offset == fail_at {
                return Err(TransportError::Closed);
            }
        }
        let sent = match frame {
            Frame::Connected { cursor } => Sent::Connected(cursor),
            Frame::Event(e) => Sent::Event(e.offset),
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

/// Accepts the handshake, then never completes an event send.
#[derive(Debug, Default)]
pub struct StallingSink {
    stalled: AtomicBool,
}

impl StallingSink {
    pub fn stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for StallingSink {
    async fn send(&self, frame: Frame<'_>) -> Result<(), TransportError> {
        if let Frame::Event(_) = frame {
            self.stalled.store(true, Ordering::SeqCst);
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
