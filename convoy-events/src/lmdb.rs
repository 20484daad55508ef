//! LMDB-backed event log.
//!
//! Two named databases live in one environment:
//!
//! - `events`: `project_key ++ 0x00 ++ offset (u64 big-endian)` -> event JSON
//! - `heads`: `project_key` -> latest offset (u64 big-endian)
//!
//! An append reads the head, writes the event and bumps the head inside a
//! single write transaction. LMDB admits one writer per environment, so two
//! appends can never observe the same head, and an aborted transaction leaves
//! both databases untouched.

use std::path::Path;

use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult, Event, EventPayload, Offset, StorageError, Timestamp};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use crate::log::EventLog;

/// Error type for LMDB log operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbLogError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbLogError> for ConvoyError {
    fn from(e: LmdbLogError) -> Self {
        match e {
            LmdbLogError::EnvOpen(_) | LmdbLogError::DbOpen(_) | LmdbLogError::Io(_) => {
                ConvoyError::Storage(StorageError::Unavailable {
                    reason: e.to_string(),
                })
            }
            LmdbLogError::Serialization(reason) => {
                ConvoyError::Storage(StorageError::Serialization { reason })
            }
            LmdbLogError::Transaction(_) => {
                ConvoyError::Storage(StorageError::TransactionFailed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbLogError {
    LmdbLogError::Transaction(e.to_string())
}

fn event_key(project_key: &str, offset: Offset) -> Vec<u8> {
    let mut key = Vec::with_capacity(project_key.len() + 9);
    key.extend_from_slice(project_key.as_bytes());
    key.push(0);
    key.extend_from_slice(&offset.to_be_bytes());
    key
}

fn decode_offset(bytes: &[u8]) -> Result<Offset, LmdbLogError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LmdbLogError::Serialization("head is not 8 bytes".into()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Durable event log stored in LMDB.
///
/// # Example
///
/// ```ignore
/// use convoy_events::{EventLog, LmdbEventLog};
///
/// let log = LmdbEventLog::open("/var/lib/convoy", 1024)?;
/// let event = log.append("/repo", &payload, Utc::now()).await?;
/// ```
pub struct LmdbEventLog {
    env: Env,
    events: Database<Bytes, Bytes>,
    heads: Database<Bytes, Bytes>,
}

impl LmdbEventLog {
    /// Open (or create) a log under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment and its databases cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbLogError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbLogError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let events: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("events"))
            .map_err(|e| LmdbLogError::DbOpen(e.to_string()))?;
        let heads: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("heads"))
            .map_err(|e| LmdbLogError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        tracing::info!(path = %path.as_ref().display(), map_size_mb, "opened LMDB event log");
        Ok(Self { env, events, heads })
    }

    fn head(&self, txn: &RoTxn, project_key: &str) -> Result<Offset, LmdbLogError> {
        match self.heads.get(txn, project_key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_offset(bytes),
            None => Ok(0),
        }
    }

    fn append_sync(
        &self,
        project_key: &str,
        payload: &EventPayload,
        timestamp: Timestamp,
    ) -> Result<Event, LmdbLogError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let offset = self.head(&wtxn, project_key)? + 1;
        let event = Event {
            offset,
            project_key: project_key.to_string(),
            timestamp,
            payload: payload.clone(),
        };
        let bytes =
            serde_json::to_vec(&event).map_err(|e| LmdbLogError::Serialization(e.to_string()))?;

        self.events
            .put(&mut wtxn, &event_key(project_key, offset), &bytes)
            .map_err(txn_err)?;
        self.heads
            .put(&mut wtxn, project_key.as_bytes(), &offset.to_be_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(event)
    }

    fn read_sync(
        &self,
        project_key: &str,
        from_offset: Offset,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, LmdbLogError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let head = self.head(&rtxn, project_key)?;
        let start = from_offset.max(1);
        if start > head {
            return Ok(Vec::new());
        }

        let available = (head - start + 1) as usize;
        let count = limit.map_or(available, |l| l.min(available));
        let mut events = Vec::with_capacity(count);
        for offset in start..start + count as Offset {
            let bytes = self
                .events
                .get(&rtxn, &event_key(project_key, offset))
                .map_err(txn_err)?
                .ok_or_else(|| {
                    LmdbLogError::Serialization(format!(
                        "offset {offset} missing below head {head} for {project_key}"
                    ))
                })?;
            let event: Event = serde_json::from_slice(bytes)
                .map_err(|e| LmdbLogError::Serialization(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }
}

#[async_trait]
impl EventLog for LmdbEventLog {
    async fn append(
        &self,
        project_key: &str,
        payload: &EventPayload,
        timestamp: Timestamp,
    ) -> ConvoyResult<Event> {
        let event = self.append_sync(project_key, payload, timestamp)?;
        tracing::trace!(project_key, offset = event.offset, event_type = event.event_type(), "appended");
        Ok(event)
    }

    async fn read(
        &self,
        project_key: &str,
        from_offset: Offset,
        limit: Option<usize>,
    ) -> ConvoyResult<Vec<Event>> {
        Ok(self.read_sync(project_key, from_offset, limit)?)
    }

    async fn latest_offset(&self, project_key: &str) -> ConvoyResult<Offset> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.head(&rtxn, project_key)?)
    }

    async fn projects(&self) -> ConvoyResult<Vec<String>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut keys = Vec::new();
        for entry in self.heads.iter(&rtxn).map_err(txn_err)? {
            let (key, _) = entry.map_err(txn_err)?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| LmdbLogError::Serialization(e.to_string()))?;
            keys.push(key);
        }
        Ok(keys)
    }

    async fn health_check(&self) -> ConvoyResult<()> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        drop(rtxn);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::ProjectCreated;
    use tempfile::TempDir;

    fn create_test_log() -> (LmdbEventLog, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let log = LmdbEventLog::open(temp_dir.path(), 10).expect("log creation should succeed");
        (log, temp_dir)
    }

    fn created(key: &str) -> EventPayload {
        EventPayload::ProjectCreated(ProjectCreated {
            slug: convoy_core::generate_slug(key),
            human_key: key.to_string(),
        })
    }

    #[test]
    fn test_event_key_orders_by_offset() {
        assert!(event_key("/a", 2) < event_key("/a", 10));
        assert!(event_key("/a", 255) < event_key("/a", 256));
    }

    #[tokio::test]
    async fn test_empty_project_has_zero_head() {
        let (log, _dir) = create_test_log();
        assert_eq!(log.latest_offset("/nothing").await.expect("head"), 0);
        assert!(log.read("/nothing", 1, None).await.expect("read").is_empty());
        assert!(log.projects().await.expect("projects").is_empty());
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_offsets() {
        let (log, _dir) = create_test_log();
        for expected in 1..=5 {
            let event = log
                .append("/repo", &created("/repo"), chrono::Utc::now())
                .await
                .expect("append should succeed");
            assert_eq!(event.offset, expected);
        }
        let other = log
            .append("/other", &created("/other"), chrono::Utc::now())
            .await
            .expect("append should succeed");
        assert_eq!(other.offset, 1);

        let page = log.read("/repo", 2, Some(2)).await.expect("read");
        assert_eq!(page.iter().map(|e| e.offset).collect::<Vec<_>>(), vec![2, 3]);
        let mut projects = log.projects().await.expect("projects");
        projects.sort();
        assert_eq!(projects, vec!["/other".to_string(), "/repo".to_string()]);
    }

    #[tokio::test]
    async fn test_reopen_preserves_history() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let log = LmdbEventLog::open(temp_dir.path(), 10).expect("open");
            log.append("/repo", &created("/repo"), chrono::Utc::now())
                .await
                .expect("append");
            log.append("/repo", &created("/repo"), chrono::Utc::now())
                .await
                .expect("append");
        }
        let log = LmdbEventLog::open(temp_dir.path(), 10).expect("reopen");
        assert_eq!(log.latest_offset("/repo").await.expect("head"), 2);
        let next = log
            .append("/repo", &created("/repo"), chrono::Utc::now())
            .await
            .expect("append");
        assert_eq!(next.offset, 3);
    }
}
