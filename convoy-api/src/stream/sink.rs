//! Transport seam between a stream client and its connection.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::response::sse;
use convoy_core::{Event, Offset, TransportError};
use tokio::sync::mpsc;

/// One unit written to a client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame<'a> {
    /// First frame of every connection.
    Connected { cursor: Offset },
    Event(&'a Event),
    /// Events were evicted from this client's buffer.
    Dropped {
        dropped_total: u64,
        last_delivered: Offset,
    },
}

/// Where a client's frames go.
///
/// `send` resolves once the transport has accepted the frame; a slow peer
/// stalls only the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, frame: Frame<'_>) -> Result<(), TransportError>;

    /// Resolves when the peer has gone away.
    async fn closed(&self);
}

pub type SseItem = Result<sse::Event, Infallible>;

/// Sink feeding an axum `Sse` body through a bounded channel.
#[derive(Debug, Clone)]
pub struct SseSink {
    tx: mpsc::Sender<SseItem>,
}

impl SseSink {
    /// Returns the sink and the receiving half for the response body.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SseItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for SseSink {
    async fn send(&self, frame: Frame<'_>) -> Result<(), TransportError> {
        let event = super::sse::encode_frame(frame)?;
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}
