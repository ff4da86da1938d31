//! Observed replica state.
//!
//! In-memory view of every replica the control plane knows about, rebuilt
//! from runtime observations after leader takeover. Transitions are
//! forward-only; a backward observation is an invariant violation.

use dashmap::DashMap;
use neuronetes_autoscaler::PoolObservation;
use neuronetes_types::{PoolId, Replica, ReplicaId, ReplicaState, Result, SharedClock};

/// The tracker.
pub struct ReplicaTracker {
    replicas: DashMap<ReplicaId, Replica>,
    clock: SharedClock,
}

impl ReplicaTracker {
    /// Create an empty tracker.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            replicas: DashMap::new(),
            clock,
        }
    }

    /// Record a newly created replica.
    pub fn insert(&self, replica: Replica) {
        self.replicas.insert(replica.id.clone(), replica);
    }

    /// Advance a replica's state machine.
    pub fn advance(&self, id: &ReplicaId, next: ReplicaState) -> Result<Replica> {
        let mut entry = self
            .replicas
            .get_mut(id)
            .ok_or_else(|| neuronetes_types::ControlError::NotFound {
                kind: "replica",
                id: id.to_string(),
            })?;
        entry.advance(next, self.clock.now())?;
        Ok(entry.clone())
    }

    /// Fetch one replica.
    pub fn get(&self, id: &ReplicaId) -> Option<Replica> {
        self.replicas.get(id).map(|r| r.clone())
    }

    /// Drop a replica record entirely (after Terminated is fully handled).
    pub fn remove(&self, id: &ReplicaId) {
        self.replicas.remove(id);
    }

    /// All replicas of one pool.
    pub fn list_pool(&self, pool: &PoolId) -> Vec<Replica> {
        self.replicas
            .iter()
            .filter(|r| &r.pool_ref == pool)
            .map(|r| r.clone())
            .collect()
    }

    /// All replicas.
    pub fn list_all(&self) -> Vec<Replica> {
        self.replicas.iter().map(|r| r.clone()).collect()
    }

    /// Replica counts feeding the autoscaler.
    pub fn observe_pool(&self, pool: &PoolId) -> PoolObservation {
        let mut obs = PoolObservation::default();
        for replica in self.replicas.iter() {
            if &replica.pool_ref != pool {
                continue;
            }
            if replica.state.counts_toward_pool() {
                obs.current += 1;
            }
            match replica.state {
                ReplicaState::Serving => obs.serving += 1,
                ReplicaState::Warm => obs.warm += 1,
                _ => {}
            }
        }
        obs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use neuronetes_types::{ManualClock, ModelId};
    use std::sync::Arc;

    fn replica(id: &str, pool: &str, state: ReplicaState) -> Replica {
        Replica {
            id: ReplicaId::from(id),
            pool_ref: PoolId::from(pool),
            node_ref: None,
            state,
            gpu_slots: vec![],
            mig_slot: None,
            model_ref: ModelId::from("m1"),
            birth_time: Utc::now(),
            last_bind_time: None,
        }
    }

    #[test]
    fn counts_by_state() {
        let tracker = ReplicaTracker::new(Arc::new(ManualClock::from_wall()));
        tracker.insert(replica("r1", "p1", ReplicaState::Serving));
        tracker.insert(replica("r2", "p1", ReplicaState::Warm));
        tracker.insert(replica("r3", "p1", ReplicaState::Draining));
        tracker.insert(replica("r4", "other", ReplicaState::Serving));

        let obs = tracker.observe_pool(&PoolId::from("p1"));
        assert_eq!(obs.current, 2); // Serving + Warm; Draining excluded
        assert_eq!(obs.serving, 1);
        assert_eq!(obs.warm, 1);
    }

    #[test]
    fn advance_rejects_backward_observations() {
        let tracker = ReplicaTracker::new(Arc::new(ManualClock::from_wall()));
        tracker.insert(replica("r1", "p1", ReplicaState::Serving));
        assert!(tracker
            .advance(&ReplicaId::from("r1"), ReplicaState::Warm)
            .is_err());
        tracker
            .advance(&ReplicaId::from("r1"), ReplicaState::Draining)
            .unwrap();
    }
}
