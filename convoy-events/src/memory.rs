//! In-memory EventLog implementation.
//!
//! Used by tests and by the server when no data directory is configured.
//! Offsets are assigned under a single mutex, which trivially serializes
//! appends per project.

use async_trait::async_trait;
use convoy_core::{ConvoyResult, Event, EventPayload, Offset, StorageError, Timestamp};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::log::EventLog;

/// In-memory event log.
///
/// # Example
///
/// ```rust,ignore
/// use convoy_events::{EventLog, InMemoryEventLog};
///
/// let log = InMemoryEventLog::new();
/// let event = log.append("/repo", &payload, Utc::now()).await?;
/// assert_eq!(event.offset, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLog {
    partitions: Arc<Mutex<BTreeMap<String, Vec<Event>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> ConvoyResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "in-memory log marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn lock(&self) -> ConvoyResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<Event>>>> {
        self.partitions
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        project_key: &str,
        payload: &EventPayload,
        timestamp: Timestamp,
    ) -> ConvoyResult<Event> {
        self.check_available()?;
        let mut partitions = self.lock()?;
        let partition = partitions.entry(project_key.to_string()).or_default();
        let event = Event {
            offset: partition.len() as Offset + 1,
            project_key: project_key.to_string(),
            timestamp,
            payload: payload.clone(),
        };
        partition.push(event.clone());
        Ok(event)
    }

    async fn read(
        &self,
        project_key: &str,
        from_offset: Offset,
        limit: Option<usize>,
    ) -> ConvoyResult<Vec<Event>> {
        self.check_available()?;
        let partitions = self.lock()?;
        let Some(partition) = partitions.get(project_key) else {
            return Ok(Vec::new());
        };
        // Offset n lives at index n - 1.
        let start = from_offset.max(1) as usize - 1;
        let events = partition
            .iter()
            .skip(start)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(events)
    }

    async fn latest_offset(&self, project_key: &str) -> ConvoyResult<Offset> {
        self.check_available()?;
        let partitions = self.lock()?;
        Ok(partitions
            .get(project_key)
            .map(|p| p.len() as Offset)
            .unwrap_or(0))
    }

    async fn projects(&self) -> ConvoyResult<Vec<String>> {
        self.check_available()?;
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn health_check(&self) -> ConvoyResult<()> {
        self.check_available()?;
        self.lock().map(|_| ())
    }
}
