//! Bounded exponential backoff per (node, model).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use neuronetes_types::{ModelId, NodeId, SharedClock};
use std::time::Duration;

struct BackoffState {
    delay: Duration,
    blocked_until: DateTime<Utc>,
}

/// Tracks retry delays for failed loads and evictions.
pub struct BackoffTracker {
    entries: DashMap<(NodeId, ModelId), BackoffState>,
    initial: Duration,
    cap: Duration,
    clock: SharedClock,
}

impl BackoffTracker {
    /// Create a tracker with the given initial delay and cap.
    pub fn new(clock: SharedClock, initial: Duration, cap: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            initial,
            cap,
            clock,
        }
    }

    /// Standard control-plane backoff: 1 s initial, 5 min cap.
    pub fn standard(clock: SharedClock) -> Self {
        Self::new(clock, Duration::from_secs(1), Duration::from_secs(300))
    }

    /// Whether a new attempt for this (node, model) may start now.
    pub fn ready(&self, node: &NodeId, model: &ModelId) -> bool {
        self.entries
            .get(&(node.clone(), model.clone()))
            .map(|state| self.clock.now() >= state.blocked_until)
            .unwrap_or(true)
    }

    /// Record a failure and push the next attempt out, doubling up to the
    /// cap.
    pub fn record_failure(&self, node: &NodeId, model: &ModelId) {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry((node.clone(), model.clone()))
            .or_insert_with(|| BackoffState {
                delay: self.initial,
                blocked_until: now,
            });
        let delay = entry.delay;
        entry.blocked_until =
            now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
        entry.delay = (delay * 2).min(self.cap);
    }

    /// Clear the backoff after a success.
    pub fn record_success(&self, node: &NodeId, model: &ModelId) {
        self.entries.remove(&(node.clone(), model.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronetes_types::ManualClock;
    use std::sync::Arc;

    #[test]
    fn failures_double_delay_up_to_cap() {
        let clock = Arc::new(ManualClock::from_wall());
        let tracker = BackoffTracker::new(
            clock.clone(),
            Duration::from_secs(1),
            Duration::from_secs(4),
        );
        let node = NodeId::from("n1");
        let model = ModelId::from("m1");

        assert!(tracker.ready(&node, &model));
        tracker.record_failure(&node, &model);
        assert!(!tracker.ready(&node, &model));

        clock.advance(Duration::from_secs(1));
        assert!(tracker.ready(&node, &model));

        // Second failure: 2 s delay.
        tracker.record_failure(&node, &model);
        clock.advance(Duration::from_secs(1));
        assert!(!tracker.ready(&node, &model));
        clock.advance(Duration::from_secs(1));
        assert!(tracker.ready(&node, &model));

        // Delay is capped at 4 s no matter how many failures pile up.
        for _ in 0..5 {
            tracker.record_failure(&node, &model);
            clock.advance(Duration::from_secs(4));
        }
        assert!(tracker.ready(&node, &model));
    }

    #[test]
    fn success_resets_backoff() {
        let clock = Arc::new(ManualClock::from_wall());
        let tracker = BackoffTracker::standard(clock.clone());
        let node = NodeId::from("n1");
        let model = ModelId::from("m1");

        tracker.record_failure(&node, &model);
        tracker.record_success(&node, &model);
        assert!(tracker.ready(&node, &model));
    }
}
