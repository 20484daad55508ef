//! Supervised projection rebuild.
//!
//! A rebuild replays the project's log into a fresh [`ProjectionState`]
//! without holding the writer lock, then takes the lock, applies whatever
//! was appended meanwhile and swaps the fresh state in. Writers are blocked
//! only for the catch-up tail.

use std::sync::Arc;

use convoy_core::{ConvoyError, ConvoyResult, Offset};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::project::{catch_up, ProjectHandle};
use crate::projection::ProjectionState;

/// Observable progress of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RebuildStatus {
    Idle,
    Running { replayed: Offset, target: Offset },
    Completed { through: Offset },
    Cancelled,
    Failed { reason: String },
}

impl RebuildStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RebuildStatus::Running { .. })
    }
}

/// Handle to a spawned rebuild.
#[derive(Debug)]
pub struct RebuildTask {
    status: watch::Receiver<RebuildStatus>,
    cancel: CancellationToken,
    join: JoinHandle<RebuildStatus>,
}

impl RebuildTask {
    /// Current status.
    pub fn status(&self) -> RebuildStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RebuildStatus> {
        self.status.clone()
    }

    /// Ask the rebuild to stop. The live state is left as it was.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the rebuild to finish and return its final status.
    pub async fn wait(self) -> RebuildStatus {
        match self.join.await {
            Ok(status) => status,
            Err(e) => RebuildStatus::Failed {
                reason: format!("rebuild task aborted: {e}"),
            },
        }
    }
}

impl ProjectHandle {
    /// Start a rebuild in the background.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when a rebuild of this project is already
    /// running.
    pub fn spawn_rebuild(self: &Arc<Self>) -> ConvoyResult<RebuildTask> {
        let started = self.rebuild_status.send_if_modified(|status| {
            if status.is_running() {
                return false;
            }
            *status = RebuildStatus::Running {
                replayed: 0,
                target: 0,
            };
            true
        });
        if !started {
            return Err(ConvoyError::invalid(
                "rebuild",
                "a rebuild of this project is already running",
            ));
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = Arc::clone(self);
        let status = self.rebuild_status.subscribe();
        let join = tokio::spawn(async move {
            let outcome = match handle.run_rebuild(&token).await {
                Ok(Some(through)) => RebuildStatus::Completed { through },
                Ok(None) => RebuildStatus::Cancelled,
                Err(e) => RebuildStatus::Failed {
                    reason: e.to_string(),
                },
            };
            match &outcome {
                RebuildStatus::Failed { reason } => {
                    tracing::error!(project_key = %handle.slug(), %reason, "rebuild failed")
                }
                other => tracing::info!(project_key = %handle.slug(), status = ?other, "rebuild finished"),
            }
            handle.rebuild_status.send_replace(outcome.clone());
            outcome
        });

        Ok(RebuildTask {
            status,
            cancel,
            join,
        })
    }

    /// Rebuild and wait for the result.
    pub async fn rebuild(self: &Arc<Self>) -> ConvoyResult<RebuildStatus> {
        Ok(self.spawn_rebuild()?.wait().await)
    }

    /// `Ok(None)` means cancelled before the swap.
    async fn run_rebuild(&self, cancel: &CancellationToken) -> ConvoyResult<Option<Offset>> {
        let log = self.log();
        let target = log.latest_offset(self.slug()).await?;
        let batch = self.replay_batch_size().max(1);
        let mut fresh = ProjectionState::new(self.slug());

        self.rebuild_status.send_replace(RebuildStatus::Running {
            replayed: 0,
            target,
        });

        while fresh.applied_through() < target {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let page = log
                .read(self.slug(), fresh.applied_through() + 1, Some(batch))
                .await?;
            if page.is_empty() {
                break;
            }
            for event in &page {
                fresh.apply(event)?;
            }
            self.rebuild_status.send_replace(RebuildStatus::Running {
                replayed: fresh.applied_through(),
                target,
            });
            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut live = self.state.write().await;
        catch_up(log.as_ref(), &mut fresh, batch).await?;
        let through = fresh.applied_through();
        *live = fresh;
        Ok(Some(through))
    }
}
