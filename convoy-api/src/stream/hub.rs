//! Stream hub: per-project tailers fanning out to per-client tasks.
//!
//! Each project with at least one connected client gets one tailer task. The
//! tailer wakes on the project's tail watch (or on a poll tick), reads new
//! events from the log and enqueues them into every client buffer under the
//! project's fan-out lock. Enqueueing never blocks, so a slow client cannot
//! hold up the tailer or any other client.
//!
//! A client registers under the same lock and records the tailer's
//! high-water mark `F`. Its task replays `(cursor, F]` straight from the log,
//! then flushes its buffer (which only ever sees offsets above `F`) each time
//! the tailer notifies it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use convoy_core::{ConvoyResult, Event, Offset, StreamConfig, TransportError};
use convoy_events::EventLog;
use convoy_storage::{ProjectHandle, ProjectRegistry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::buffer::{BufferStats, ClientBuffer};
use super::sink::{EventSink, Frame};
use crate::telemetry::with_metrics;

pub type ClientId = u64;

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub id: ClientId,
    pub project_key: String,
    #[serde(flatten)]
    pub buffer: BufferStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubStats {
    pub projects: usize,
    pub clients: usize,
    pub per_client: Vec<ClientStats>,
}

// ============================================================================
// FAN-OUT
// ============================================================================

struct ClientSlot {
    buffer: Arc<ClientBuffer>,
    notify: Arc<Notify>,
}

struct FanoutState {
    high_water: Offset,
    clients: HashMap<ClientId, ClientSlot>,
}

/// Fan-out point of one project.
struct Fanout {
    slug: String,
    state: Mutex<FanoutState>,
    tailer: CancellationToken,
}

impl Fanout {
    fn lock(&self) -> MutexGuard<'_, FanoutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn high_water(&self) -> Offset {
        self.lock().high_water
    }

    /// Enqueue `events` into every client, then wake them.
    fn publish(&self, events: &[Arc<Event>]) {
        let mut state = self.lock();
        let fresh: Vec<&Arc<Event>> = events
            .iter()
            .filter(|e| e.offset > state.high_water)
            .collect();
        let Some(last) = fresh.last() else {
            return;
        };
        let head = last.offset;

        for (id, slot) in &state.clients {
            let mut evicted = 0u64;
            for event in &fresh {
                let outcome = slot.buffer.enqueue(Arc::clone(event));
                if outcome.evicted.is_some() {
                    evicted += 1;
                }
                if let Some(signal) = outcome.backpressure {
                    with_metrics(|m| m.record_backpressure());
                    tracing::warn!(
                        project_key = %self.slug,
                        client_id = id,
                        buffered = signal.buffered,
                        dropped = signal.dropped,
                        max_size = signal.max_size,
                        "stream client under backpressure"
                    );
                }
            }
            if evicted > 0 {
                with_metrics(|m| m.record_events_dropped(evicted));
                tracing::warn!(
                    project_key = %self.slug,
                    client_id = id,
                    evicted,
                    dropped_total = slot.buffer.dropped(),
                    "stream buffer overflow, oldest events dropped"
                );
            }
            slot.notify.notify_one();
        }
        state.high_water = head;
    }

    fn remove(&self, id: ClientId) -> usize {
        let mut state = self.lock();
        state.clients.remove(&id);
        state.clients.len()
    }
}

// ============================================================================
// CLIENT HANDLE
// ============================================================================

/// A connected client.
#[derive(Debug)]
pub struct StreamClient {
    id: ClientId,
    buffer: Arc<ClientBuffer>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl StreamClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Disconnect this client only.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Wait for the client task to end.
    pub async fn finished(self) {
        if let Err(e) = self.join.await {
            tracing::error!(client_id = self.id, error = %e, "stream client task aborted");
        }
    }
}

// ============================================================================
// HUB
// ============================================================================

pub struct StreamHub {
    registry: Arc<ProjectRegistry>,
    config: StreamConfig,
    fanouts: DashMap<String, Arc<Fanout>>,
    next_client_id: AtomicU64,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("projects", &self.fanouts.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamHub {
    /// # Errors
    ///
    /// Returns a `ConfigError` when `config` does not validate.
    pub fn new(registry: Arc<ProjectRegistry>, config: StreamConfig) -> ConvoyResult<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            fanouts: DashMap::new(),
            next_client_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Attach a client to `project` that has already seen everything up to
    /// `cursor`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown project.
    pub async fn connect(
        &self,
        project: &str,
        cursor: Offset,
        sink: Arc<dyn EventSink>,
    ) -> ConvoyResult<StreamClient> {
        let handle = self.registry.project(project).await?;
        let fanout = self.fanout(&handle).await;

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let buffer = Arc::new(ClientBuffer::new(
            self.config.buffer_max_size,
            self.config.backpressure_threshold,
            cursor,
        ));
        let notify = Arc::new(Notify::new());
        let high_water = {
            let mut state = fanout.lock();
            state.clients.insert(
                id,
                ClientSlot {
                    buffer: Arc::clone(&buffer),
                    notify: Arc::clone(&notify),
                },
            );
            state.high_water
        };
        with_metrics(|m| m.stream_connected());

        let cancel = self.shutdown.child_token();
        let task = ClientTask {
            id,
            slug: handle.slug().to_string(),
            log: Arc::clone(handle.log()),
            sink,
            buffer: Arc::clone(&buffer),
            notify,
            cursor,
            high_water,
            page_size: self.config.replay_page_size,
        };
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let outcome = task.run(&token).await;
            let remaining = fanout.remove(task.id);
            with_metrics(|m| m.stream_disconnected());
            match outcome {
                Ok(()) => tracing::info!(
                    project_key = %task.slug,
                    client_id = task.id,
                    cursor = task.buffer.cursor(),
                    remaining,
                    "stream client disconnected"
                ),
                Err(e) => tracing::warn!(
                    project_key = %task.slug,
                    client_id = task.id,
                    cursor = task.buffer.cursor(),
                    remaining,
                    error = %e,
                    "stream client dropped after transport error"
                ),
            }
        });

        tracing::debug!(
            project_key = %handle.slug(),
            client_id = id,
            cursor,
            high_water,
            "stream client registered"
        );
        Ok(StreamClient {
            id,
            buffer,
            cancel,
            join,
        })
    }

    /// The fan-out for `handle`, starting its tailer on first use.
    async fn fanout(&self, handle: &Arc<ProjectHandle>) -> Arc<Fanout> {
        if let Some(existing) = self.fanouts.get(handle.slug()) {
            return Arc::clone(existing.value());
        }
        let head = handle.latest_offset().await;
        match self.fanouts.entry(handle.slug().to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let fanout = Arc::new(Fanout {
                    slug: handle.slug().to_string(),
                    state: Mutex::new(FanoutState {
                        high_water: head,
                        clients: HashMap::new(),
                    }),
                    tailer: self.shutdown.child_token(),
                });
                entry.insert(Arc::clone(&fanout));
                tokio::spawn(run_tailer(
                    Arc::clone(&fanout),
                    Arc::clone(handle),
                    self.config.clone(),
                ));
                tracing::debug!(project_key = %handle.slug(), head, "stream tailer started");
                fanout
            }
        }
    }

    /// Client counts and per-client buffer stats, optionally for one project.
    pub fn stats(&self, project: Option<&str>) -> HubStats {
        let mut per_client = Vec::new();
        let mut projects = 0;
        for entry in self.fanouts.iter() {
            if project.is_some_and(|p| p != entry.key().as_str()) {
                continue;
            }
            projects += 1;
            let state = entry.value().lock();
            per_client.extend(state.clients.iter().map(|(id, slot)| ClientStats {
                id: *id,
                project_key: entry.key().clone(),
                buffer: slot.buffer.stats(),
            }));
        }
        per_client.sort_by_key(|c| c.id);
        HubStats {
            projects,
            clients: per_client.len(),
            per_client,
        }
    }

    /// Stop every tailer and client task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.fanouts.clear();
        tracing::info!("stream hub shut down");
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// TASKS
// ============================================================================

async fn run_tailer(fanout: Arc<Fanout>, handle: Arc<ProjectHandle>, config: StreamConfig) {
    let mut tail: Option<watch::Receiver<Offset>> = Some(handle.subscribe_tail());
    let log = Arc::clone(handle.log());

    loop {
        if let Err(e) = drain_new_events(&fanout, log.as_ref(), config.replay_page_size).await {
            tracing::error!(project_key = %fanout.slug, error = %e, "stream tailer read failed");
        }

        tokio::select! {
            _ = fanout.tailer.cancelled() => break,
            changed = wait_for_tail(&mut tail) => {
                if !changed {
                    tracing::debug!(project_key = %fanout.slug, "tail watch closed, polling only");
                    tail = None;
                }
            }
            _ = tokio::time::sleep(config.tail_poll_interval) => {}
        }
    }
    tracing::debug!(project_key = %fanout.slug, "stream tailer stopped");
}

/// `false` once the watch sender is gone. Never resolves without a watch.
async fn wait_for_tail(tail: &mut Option<watch::Receiver<Offset>>) -> bool {
    match tail {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

async fn drain_new_events(
    fanout: &Fanout,
    log: &dyn EventLog,
    page_size: usize,
) -> ConvoyResult<()> {
    loop {
        let from = fanout.high_water() + 1;
        let page = log.read(&fanout.slug, from, Some(page_size)).await?;
        if page.is_empty() {
            return Ok(());
        }
        let events: Vec<Arc<Event>> = page.into_iter().map(Arc::new).collect();
        fanout.publish(&events);
    }
}

struct ClientTask {
    id: ClientId,
    slug: String,
    log: Arc<dyn EventLog>,
    sink: Arc<dyn EventSink>,
    buffer: Arc<ClientBuffer>,
    notify: Arc<Notify>,
    cursor: Offset,
    high_water: Offset,
    page_size: usize,
}

impl ClientTask {
    async fn run(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let handshake = async {
            self.sink
                .send(Frame::Connected {
                    cursor: self.cursor,
                })
                .await?;
            self.replay().await
        };
        match self.until_stopped(cancel, handshake).await {
            Some(result) => result?,
            None => return Ok(()),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.sink.closed() => return Ok(()),
                _ = self.notify.notified() => {}
            }
            let flush = self.buffer.flush(self.sink.as_ref());
            match self.until_stopped(cancel, flush).await {
                Some(result) => {
                    result?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Drive `work` until it completes, the client is cancelled, or the sink
    /// closes. `None` means the client stopped first and `work` was dropped
    /// mid-send.
    async fn until_stopped<T>(
        &self,
        cancel: &CancellationToken,
        work: impl Future<Output = T>,
    ) -> Option<T> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            _ = self.sink.closed() => None,
            out = work => Some(out),
        }
    }

    /// Send `(cursor, high_water]` from the log.
    async fn replay(&self) -> Result<(), TransportError> {
        let mut next = self.cursor + 1;
        while next <= self.high_water {
            let want = (self.high_water - next + 1).min(self.page_size as Offset) as usize;
            let page = self
                .log
                .read(&self.slug, next, Some(want))
                .await
                .map_err(|e| TransportError::SendFailed {
                    reason: format!("replay read failed: {e}"),
                })?;
            if page.is_empty() {
                break;
            }
            for event in page.iter().take_while(|e| e.offset <= self.high_water) {
                self.sink.send(Frame::Event(event)).await?;
                self.buffer.mark_delivered(event.offset);
                next = event.offset + 1;
            }
        }
        tracing::debug!(
            project_key = %self.slug,
            client_id = self.id,
            from = self.cursor,
            through = self.buffer.cursor(),
            "stream replay complete"
        );
        Ok(())
    }
}
