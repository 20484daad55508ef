//! Read-side queries. Ordering is by id or offset, never by timestamp.

use std::collections::BTreeSet;

use convoy_core::{
    Agent, EntityRef, InboxEntry, InboxQuery, LeaseMode, Message, Offset, PathConflict,
    PathPattern, Project, Receipt, Reservation, SearchHit, ThreadExample, ThreadSummary,
    Timestamp, URGENT_IMPORTANCE,
};

use super::ProjectionState;

const THREAD_KEY_POINTS: usize = 5;
const THREAD_EXAMPLES: usize = 3;

impl ProjectionState {
    pub fn project(&self) -> Option<&Project> {
        self.tables.project.as_ref()
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.tables.agents.get(name)
    }

    /// All agents, by name.
    pub fn agents(&self) -> Vec<&Agent> {
        self.tables.agents.values().collect()
    }

    pub fn message(&self, id: Offset) -> Option<&Message> {
        self.tables.messages.get(&id)
    }

    pub fn receipts(&self, message_id: Offset) -> Vec<&Receipt> {
        self.tables
            .receipts
            .get(&message_id)
            .map(|by_agent| by_agent.values().collect())
            .unwrap_or_default()
    }

    fn receipt(&self, message_id: Offset, agent: &str) -> Option<&Receipt> {
        self.tables.receipts.get(&message_id)?.get(agent)
    }

    /// Messages addressed to `agent`, newest first.
    pub fn inbox(&self, agent: &str, query: &InboxQuery) -> Vec<InboxEntry> {
        let floor = query.since_id.unwrap_or(0);
        self.tables
            .messages
            .range(floor.saturating_add(1)..)
            .rev()
            .map(|(_, m)| m)
            .filter(|m| m.to_agents.iter().any(|to| to == agent))
            .filter(|m| !query.urgent_only || m.importance == URGENT_IMPORTANCE)
            .take(query.limit)
            .map(|m| {
                let receipt = self.receipt(m.id, agent);
                InboxEntry {
                    id: m.id,
                    thread_id: m.thread_id.clone(),
                    from: m.from_agent.clone(),
                    subject: m.subject.clone(),
                    body: query.include_bodies.then(|| m.body.clone()),
                    importance: m.importance.clone(),
                    ack_required: m.ack_required,
                    created_at: m.created_at,
                    read_at: receipt.and_then(|r| r.read_at),
                    acked_at: receipt.and_then(|r| r.acked_at),
                }
            })
            .collect()
    }

    /// Structural digest of a thread. An unknown thread yields an empty
    /// summary rather than an error.
    pub fn thread_summary(&self, thread_id: &str, include_examples: bool) -> ThreadSummary {
        let messages: Vec<&Message> = self
            .tables
            .messages
            .values()
            .filter(|m| m.thread_id.as_deref() == Some(thread_id))
            .collect();

        let participants: BTreeSet<&str> =
            messages.iter().map(|m| m.from_agent.as_str()).collect();

        ThreadSummary {
            thread_id: thread_id.to_string(),
            participants: participants.into_iter().map(str::to_string).collect(),
            key_points: messages
                .iter()
                .take(THREAD_KEY_POINTS)
                .map(|m| m.subject.clone())
                .collect(),
            action_items: messages
                .iter()
                .filter(|m| m.importance == URGENT_IMPORTANCE)
                .map(|m| m.subject.clone())
                .collect(),
            total_messages: messages.len(),
            examples: if include_examples {
                messages
                    .iter()
                    .take(THREAD_EXAMPLES)
                    .map(|m| ThreadExample {
                        id: m.id,
                        from: m.from_agent.clone(),
                        subject: m.subject.clone(),
                        body: m.body.clone(),
                    })
                    .collect()
            } else {
                Vec::new()
            },
        }
    }

    /// Case-insensitive substring search over subjects and bodies, newest
    /// first.
    pub fn search_messages(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let needle = query.to_lowercase();
        self.tables
            .messages
            .values()
            .rev()
            .filter(|m| {
                m.subject.to_lowercase().contains(&needle)
                    || m.body.to_lowercase().contains(&needle)
            })
            .take(limit)
            .map(|m| SearchHit {
                id: m.id,
                thread_id: m.thread_id.clone(),
                from: m.from_agent.clone(),
                subject: m.subject.clone(),
                importance: m.importance.clone(),
                created_at: m.created_at,
            })
            .collect()
    }

    /// Unreleased, unexpired reservations in grant order.
    pub fn active_reservations(&self, now: Timestamp) -> Vec<&Reservation> {
        self.tables
            .reservations
            .values()
            .filter(|r| r.is_active(now))
            .collect()
    }

    /// An agent's own active reservations.
    pub fn reservations_held_by(&self, agent: &str, now: Timestamp) -> Vec<&Reservation> {
        self.tables
            .reservations
            .values()
            .filter(|r| r.agent_name == agent && r.is_active(now))
            .collect()
    }

    /// Other agents whose active leases stop `agent` from taking `pattern`
    /// in `mode`. Sorted and deduplicated.
    ///
    /// This is the one conflict rule: both the grant path and the read-only
    /// check call it.
    pub fn conflicting_holders(
        &self,
        agent: &str,
        pattern: &PathPattern,
        mode: LeaseMode,
        now: Timestamp,
    ) -> Vec<String> {
        let holders: BTreeSet<&str> = self
            .tables
            .reservations
            .values()
            .filter(|r| r.agent_name != agent && r.is_active(now))
            .filter(|r| !r.mode().compatible_with(mode))
            .filter(|r| r.path_pattern.overlaps(pattern))
            .map(|r| r.agent_name.as_str())
            .collect();
        holders.into_iter().map(str::to_string).collect()
    }

    /// Conflicts `agent` would hit reserving `patterns` in `mode` right now.
    pub fn check_conflicts(
        &self,
        agent: &str,
        patterns: &[PathPattern],
        mode: LeaseMode,
        now: Timestamp,
    ) -> Vec<PathConflict> {
        patterns
            .iter()
            .filter_map(|pattern| {
                let holders = self.conflicting_holders(agent, pattern, mode, now);
                (!holders.is_empty()).then(|| PathConflict {
                    path: pattern.to_string(),
                    holders,
                })
            })
            .collect()
    }

    /// Open dependencies of `bead_id`, sorted. A dependency on a bead that
    /// was never created counts as open.
    pub fn blocked_by(&self, bead_id: &str) -> Vec<String> {
        if let Ok(cache) = self.blocked_cache.lock() {
            if let Some(hit) = cache.get(bead_id) {
                return hit.clone();
            }
        }

        let blocked: Vec<String> = self
            .tables
            .beads
            .get(bead_id)
            .map(|bead| {
                bead.depends_on
                    .iter()
                    .filter(|dep| self.tables.beads.get(*dep).map_or(true, |d| !d.closed))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Ok(mut cache) = self.blocked_cache.lock() {
            cache.insert(bead_id.to_string(), blocked.clone());
        }
        blocked
    }

    /// Entities changed since their last export acknowledgment.
    pub fn dirty_entities(&self) -> Vec<EntityRef> {
        self.tables.dirty.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use convoy_core::{Event, EventPayload, MessageSent, ReservationGranted};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Builder {
        state: ProjectionState,
    }

    impl Builder {
        fn new() -> Self {
            Self {
                state: ProjectionState::new("demo"),
            }
        }

        fn push(&mut self, payload: EventPayload) -> Offset {
            let offset = self.state.applied_through() + 1;
            self.state
                .apply(&Event {
                    offset,
                    project_key: "demo".to_string(),
                    timestamp: at(offset as i64),
                    payload,
                })
                .expect("apply");
            offset
        }

        fn send(&mut self, thread: &str, from: &str, to: &[&str], subject: &str, urgent: bool) -> Offset {
            self.push(EventPayload::MessageSent(MessageSent {
                thread_id: Some(thread.to_string()),
                from: from.to_string(),
                to: to.iter().map(|s| s.to_string()).collect(),
                subject: subject.to_string(),
                body: format!("body of {subject}"),
                importance: urgent.then(|| URGENT_IMPORTANCE.to_string()),
                ack_required: false,
            }))
        }

        fn grant(&mut self, agent: &str, pattern: &str, exclusive: bool, ttl: i64) -> Offset {
            self.push(EventPayload::ReservationGranted(ReservationGranted {
                agent: agent.to_string(),
                path_pattern: pattern.to_string(),
                exclusive,
                reason: String::new(),
                granted_at: at(0),
                expires_at: at(0) + Duration::seconds(ttl),
            }))
        }
    }

    #[test]
    fn test_inbox_newest_first_with_filters() {
        let mut b = Builder::new();
        let m1 = b.send("t", "A", &["B"], "first", false);
        let m2 = b.send("t", "A", &["B", "C"], "second", true);
        b.send("t", "A", &["C"], "not for B", false);
        let m4 = b.send("t", "C", &["B"], "fourth", false);

        let ids = |q: InboxQuery| -> Vec<Offset> {
            b.state.inbox("B", &q).iter().map(|e| e.id).collect()
        };
        assert_eq!(ids(InboxQuery::default()), vec![m4, m2, m1]);
        assert_eq!(
            ids(InboxQuery {
                urgent_only: true,
                ..Default::default()
            }),
            vec![m2]
        );
        assert_eq!(
            ids(InboxQuery {
                since_id: Some(m1),
                ..Default::default()
            }),
            vec![m4, m2]
        );
        assert_eq!(
            ids(InboxQuery {
                limit: 1,
                ..Default::default()
            }),
            vec![m4]
        );
        let entries = b.state.inbox("B", &InboxQuery::default());
        assert!(entries.iter().all(|e| e.body.is_none()));
    }

    #[test]
    fn test_thread_summary_shape() {
        let mut b = Builder::new();
        for i in 0..7 {
            let from = if i % 2 == 0 { "Zed" } else { "Amy" };
            b.send("design", from, &["X"], &format!("s{i}"), i == 3);
        }
        b.send("other", "Bob", &["X"], "elsewhere", true);

        let summary = b.state.thread_summary("design", true);
        assert_eq!(summary.participants, vec!["Amy".to_string(), "Zed".to_string()]);
        assert_eq!(summary.key_points, vec!["s0", "s1", "s2", "s3", "s4"]);
        assert_eq!(summary.action_items, vec!["s3".to_string()]);
        assert_eq!(summary.total_messages, 7);
        assert_eq!(summary.examples.len(), 3);

        let empty = b.state.thread_summary("missing", false);
        assert_eq!(empty.total_messages, 0);
        assert!(empty.examples.is_empty());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let mut b = Builder::new();
        b.send("t", "A", &["B"], "Deploy Plan", false);
        let m2 = b.send("t", "A", &["B"], "unrelated", false);
        b.send("t", "A", &["B"], "misc", false);
        let hits: Vec<Offset> = b.state.search_messages("DEPLOY", 10).iter().map(|h| h.id).collect();
        assert_eq!(hits, vec![1]);
        let hits: Vec<Offset> = b.state.search_messages("of unrel", 10).iter().map(|h| h.id).collect();
        assert_eq!(hits, vec![m2]);
    }

    #[test]
    fn test_conflicting_holders_respects_mode_and_owner() {
        let mut b = Builder::new();
        b.grant("A", "src/**", true, 60);
        b.grant("B", "docs/*.md", false, 60);
        b.grant("C", "docs/readme.md", false, 60);
        let now = at(1);
        let pattern = |s: &str| PathPattern::parse(s).expect("pattern");

        assert_eq!(
            b.state.conflicting_holders("Z", &pattern("src/auth.ts"), LeaseMode::Shared, now),
            vec!["A".to_string()]
        );
        assert!(b
            .state
            .conflicting_holders("A", &pattern("src/auth.ts"), LeaseMode::Exclusive, now)
            .is_empty());
        assert!(b
            .state
            .conflicting_holders("Z", &pattern("docs/readme.md"), LeaseMode::Shared, now)
            .is_empty());
        assert_eq!(
            b.state.conflicting_holders("Z", &pattern("docs/readme.md"), LeaseMode::Exclusive, now),
            vec!["B".to_string(), "C".to_string()]
        );
        assert!(b
            .state
            .conflicting_holders("Z", &pattern("src/auth.ts"), LeaseMode::Exclusive, at(60))
            .is_empty());
    }
}
