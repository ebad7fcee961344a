//! Per-term rate limiting and duplicate-enqueue rejection (C3).
//!
//! A best-effort gate: rare races producing duplicate jobs are permitted and
//! absorbed downstream by the idempotent upsert (C5).

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Lock-free in-memory dedup gate, matching the concurrency style of a
/// per-key `DashMap` guarding lazily-created entries under concurrent access.
pub struct DedupGate {
    last_scheduled: DashMap<String, Instant>,
    min_spacing: Duration,
    ttl: Duration,
}

impl DedupGate {
    pub fn new(min_spacing: Duration, ttl: Duration) -> Self {
        Self {
            last_scheduled: DashMap::new(),
            min_spacing,
            ttl,
        }
    }

    /// Returns whether `term` may be scheduled right now: no entry, or the
    /// last schedule for `term` is older than `min_spacing`.
    ///
    /// Does not itself check broker-side "active" membership; callers that
    /// need the fuller C3 policy (spacing OR an in-flight job) should combine
    /// this with a broker lookup — see the call site in the worker pool,
    /// which treats `locked_at IS NOT NULL` rows as the active set. That
    /// check races with claim/ack by design (§9 design note); duplicates are
    /// resolved by C5's idempotent upsert rather than prevented outright here.
    pub fn can_schedule(&self, term: &str) -> bool {
        self.evict_stale();

        match self.last_scheduled.get(term) {
            Some(entry) => entry.elapsed() >= self.min_spacing,
            None => true,
        }
    }

    /// Records that `term` was just scheduled.
    pub fn record_scheduled(&self, term: &str) {
        self.last_scheduled
            .entry(term.to_string())
            .and_modify(|at| *at = Instant::now())
            .or_insert_with(Instant::now);
    }

    /// Lazily evicts entries older than the configured TTL. Called on every
    /// `can_schedule` so the map never grows unbounded without a dedicated
    /// background sweep.
    fn evict_stale(&self) {
        self.last_scheduled.retain(|_, at| at.elapsed() < self.ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_scheduled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unseen_term_can_schedule() {
        let gate = DedupGate::new(Duration::from_secs(5), Duration::from_secs(600));
        assert!(gate.can_schedule("smith"));
    }

    #[tokio::test]
    async fn recently_scheduled_term_is_rejected() {
        let gate = DedupGate::new(Duration::from_secs(5), Duration::from_secs(600));
        gate.record_scheduled("smith");
        assert!(!gate.can_schedule("smith"));
    }

    #[tokio::test]
    async fn different_terms_are_independent() {
        let gate = DedupGate::new(Duration::from_secs(5), Duration::from_secs(600));
        gate.record_scheduled("smith");
        assert!(gate.can_schedule("jones"));
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_elapses_after_min_spacing() {
        let gate = DedupGate::new(Duration::from_millis(50), Duration::from_secs(600));
        gate.record_scheduled("smith");
        assert!(!gate.can_schedule("smith"));
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(gate.can_schedule("smith"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_evicted_lazily() {
        let gate = DedupGate::new(Duration::from_millis(10), Duration::from_millis(50));
        gate.record_scheduled("smith");
        assert_eq!(gate.len(), 1);
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(gate.can_schedule("smith"));
        assert_eq!(gate.len(), 0);
    }
}
