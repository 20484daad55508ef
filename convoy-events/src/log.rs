//! EventLog trait definition.

use async_trait::async_trait;
use convoy_core::{ConvoyResult, Event, EventPayload, Offset, Timestamp};

/// Append-only, per-project-partitioned event storage.
///
/// Implementations must make `append` atomic per project: two concurrent
/// appends never receive the same offset, and a failed append leaves the
/// sequence untouched.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Persist `payload` as the next event of `project_key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` or `StorageError::TransactionFailed`
    /// when the event could not be made durable. No offset is consumed.
    async fn append(
        &self,
        project_key: &str,
        payload: &EventPayload,
        timestamp: Timestamp,
    ) -> ConvoyResult<Event>;

    /// Events with `offset >= from_offset`, ascending, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the log cannot be read.
    async fn read(
        &self,
        project_key: &str,
        from_offset: Offset,
        limit: Option<usize>,
    ) -> ConvoyResult<Vec<Event>>;

    /// Offset of the newest event, or 0 for an empty project.
    async fn latest_offset(&self, project_key: &str) -> ConvoyResult<Offset>;

    /// Every project key that has at least one event.
    async fn projects(&self) -> ConvoyResult<Vec<String>>;

    /// Cheap probe used by readiness checks.
    async fn health_check(&self) -> ConvoyResult<()>;
}

/// Convenience methods built on [`EventLog`].
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Read the whole of a project's history in pages of `page_size`.
    async fn read_all(&self, project_key: &str, page_size: usize) -> ConvoyResult<Vec<Event>> {
        let mut events = Vec::new();
        let mut next = 1;
        loop {
            let page = self.read(project_key, next, Some(page_size.max(1))).await?;
            let Some(last) = page.last() else {
                break;
            };
            next = last.offset + 1;
            events.extend(page);
        }
        Ok(events)
    }
}

impl<T: EventLog + ?Sized> EventLogExt for T {}
