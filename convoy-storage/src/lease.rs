//! Reservation (lease) manager.
//!
//! Grants and releases are decided inside [`ProjectHandle::transact`], so the
//! conflict check and the resulting `reservation_granted` events are atomic
//! with respect to every other writer of the project. The read-only
//! [`LeaseManager::check`] goes through the same
//! [`ProjectionState::conflicting_holders`] rule as the grant path.
//!
//! [`ProjectionState::conflicting_holders`]: crate::ProjectionState::conflicting_holders

use std::collections::BTreeSet;

use chrono::Duration;
use convoy_core::{
    ConvoyError, ConvoyResult, EventPayload, GrantedLease, LeaseConfig, LeaseMode, Offset,
    PathConflict, PathPattern, ReleaseOutcome, ReleaseRequest, ReservationGranted,
    ReservationReleased, ReserveOutcome, ReserveRequest,
};

use crate::project::ProjectHandle;

/// Stateless policy object; all lease state lives in the projection.
#[derive(Debug, Clone, Default)]
pub struct LeaseManager {
    config: LeaseConfig,
}

fn parse_patterns(paths: &[String]) -> ConvoyResult<Vec<(String, PathPattern)>> {
    if paths.is_empty() {
        return Err(ConvoyError::missing("paths"));
    }
    paths
        .iter()
        .map(|raw| Ok((raw.clone(), PathPattern::parse(raw)?)))
        .collect()
}

impl LeaseManager {
    pub fn new(config: LeaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    fn ttl(&self, requested: Option<i64>) -> ConvoyResult<Duration> {
        let secs = requested.unwrap_or(self.config.default_ttl_secs);
        if secs <= 0 || secs > self.config.max_ttl_secs {
            return Err(ConvoyError::invalid(
                "ttl_seconds",
                format!("must be in 1..={}, got {secs}", self.config.max_ttl_secs),
            ));
        }
        Ok(Duration::seconds(secs))
    }

    /// Reserve `request.paths` for `agent`.
    ///
    /// Each path is decided on its own: free paths are granted, contested
    /// ones come back in `conflicts` with the holders in the way. The
    /// agent's own leases never conflict with its new request.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for empty paths, a bad pattern or an out
    /// of range TTL, and `StorageError::NotFound` for an unregistered agent.
    pub async fn reserve(
        &self,
        project: &ProjectHandle,
        agent: &str,
        request: ReserveRequest,
    ) -> ConvoyResult<ReserveOutcome> {
        let patterns = parse_patterns(&request.paths)?;
        let ttl = self.ttl(request.ttl_seconds)?;
        let mode = request.mode();
        let reason = request.reason.unwrap_or_default();

        let (events, conflicts) = project
            .transact(|state, now| {
                if state.agent(agent).is_none() {
                    return Err(ConvoyError::not_found("agent", agent));
                }
                let mut payloads = Vec::new();
                let mut conflicts = Vec::new();
                for (raw, pattern) in &patterns {
                    let holders = state.conflicting_holders(agent, pattern, mode, now);
                    if holders.is_empty() {
                        payloads.push(EventPayload::ReservationGranted(ReservationGranted {
                            agent: agent.to_string(),
                            path_pattern: pattern.to_string(),
                            exclusive: mode.is_exclusive(),
                            reason: reason.clone(),
                            granted_at: now,
                            expires_at: now + ttl,
                        }));
                    } else {
                        conflicts.push(PathConflict {
                            path: raw.clone(),
                            holders,
                        });
                    }
                }
                Ok((payloads, conflicts))
            })
            .await?;

        let granted: Vec<GrantedLease> = events
            .iter()
            .filter_map(|event| match &event.payload {
                EventPayload::ReservationGranted(g) => Some(GrantedLease {
                    id: event.offset,
                    path_pattern: g.path_pattern.clone(),
                    exclusive: g.exclusive,
                    expires_at: g.expires_at,
                }),
                _ => None,
            })
            .collect();

        tracing::info!(
            project_key = %project.slug(),
            agent,
            mode = %mode,
            granted = granted.len(),
            conflicts = conflicts.len(),
            "reserve"
        );
        Ok(ReserveOutcome { granted, conflicts })
    }

    /// Release some or all of `agent`'s active leases.
    ///
    /// Selection is by `reservation_ids` when non-empty, else by exact
    /// normalized pattern when `paths` is non-empty, else everything the
    /// agent holds. An empty selection appends nothing.
    pub async fn release(
        &self,
        project: &ProjectHandle,
        agent: &str,
        request: ReleaseRequest,
    ) -> ConvoyResult<ReleaseOutcome> {
        let ids: Option<BTreeSet<Offset>> = request
            .reservation_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.into_iter().collect());
        let patterns: Option<BTreeSet<PathPattern>> = match request.paths {
            Some(paths) if !paths.is_empty() => Some(
                parse_patterns(&paths)?
                    .into_iter()
                    .map(|(_, pattern)| pattern)
                    .collect(),
            ),
            _ => None,
        };

        let (_, outcome) = project
            .transact(|state, now| {
                if state.agent(agent).is_none() {
                    return Err(ConvoyError::not_found("agent", agent));
                }
                let selected: Vec<Offset> = state
                    .reservations_held_by(agent, now)
                    .into_iter()
                    .filter(|r| match (&ids, &patterns) {
                        (Some(ids), _) => ids.contains(&r.id),
                        (None, Some(patterns)) => patterns.contains(&r.path_pattern),
                        (None, None) => true,
                    })
                    .map(|r| r.id)
                    .collect();

                let outcome = ReleaseOutcome {
                    released: selected.len(),
                    released_at: now,
                };
                if selected.is_empty() {
                    return Ok((Vec::new(), outcome));
                }
                let payload = EventPayload::ReservationReleased(ReservationReleased {
                    agent: agent.to_string(),
                    reservation_ids: selected,
                    released_at: now,
                });
                Ok((vec![payload], outcome))
            })
            .await?;

        tracing::info!(
            project_key = %project.slug(),
            agent,
            released = outcome.released,
            "release"
        );
        Ok(outcome)
    }

    /// Read-only conflict check using the grant rule.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for empty paths or a bad pattern.
    pub async fn check(
        &self,
        project: &ProjectHandle,
        agent: &str,
        paths: &[String],
        mode: LeaseMode,
    ) -> ConvoyResult<Vec<PathConflict>> {
        let patterns: Vec<PathPattern> = parse_patterns(paths)?
            .into_iter()
            .map(|(_, pattern)| pattern)
            .collect();
        let now = project.now();
        let state = project.read().await;
        Ok(state.check_conflicts(agent, &patterns, mode, now))
    }
}
