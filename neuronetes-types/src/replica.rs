//! Replica records and their lifecycle state machine.

use crate::error::{ControlError, Result};
use crate::ids::{ModelId, NodeId, PoolId, ReplicaId};
use crate::node::MigProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a replica. Transitions only move forward; states may
/// be skipped (a failed create goes straight to Terminated) but never
/// revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaState {
    /// Created, nothing started.
    Pending,
    /// Process starting, weights loading.
    Warming,
    /// Fully initialized, not routed.
    Warm,
    /// Being wired into the router.
    Binding,
    /// Taking traffic.
    Serving,
    /// Finishing bound sessions before termination.
    Draining,
    /// Gone.
    Terminated,
}

impl ReplicaState {
    fn order(self) -> u8 {
        match self {
            ReplicaState::Pending => 0,
            ReplicaState::Warming => 1,
            ReplicaState::Warm => 2,
            ReplicaState::Binding => 3,
            ReplicaState::Serving => 4,
            ReplicaState::Draining => 5,
            ReplicaState::Terminated => 6,
        }
    }

    /// Whether `next` is a legal (strictly forward) transition.
    pub fn can_advance_to(self, next: ReplicaState) -> bool {
        next.order() > self.order()
    }

    /// Whether the replica can receive routed requests.
    pub fn is_routable(self) -> bool {
        matches!(self, ReplicaState::Serving | ReplicaState::Draining)
    }

    /// Whether the replica counts toward pool size.
    pub fn counts_toward_pool(self) -> bool {
        matches!(
            self,
            ReplicaState::Warm | ReplicaState::Binding | ReplicaState::Serving
        )
    }

    /// Terminal state check.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplicaState::Terminated)
    }
}

/// A running or warm inference instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    /// Replica identifier, assigned by the runtime executor.
    pub id: ReplicaId,
    /// Owning pool.
    pub pool_ref: PoolId,
    /// Node the replica is bound to, once scheduled.
    pub node_ref: Option<NodeId>,
    /// Lifecycle state.
    pub state: ReplicaState,
    /// Full-GPU slot indices held on the node.
    #[serde(default)]
    pub gpu_slots: Vec<u32>,
    /// MIG slot held, if the pool uses MIG.
    #[serde(default)]
    pub mig_slot: Option<MigProfile>,
    /// Model the replica serves.
    pub model_ref: ModelId,
    /// Creation time.
    pub birth_time: DateTime<Utc>,
    /// Last transition into Serving.
    #[serde(default)]
    pub last_bind_time: Option<DateTime<Utc>>,
}

impl Replica {
    /// Advance the state machine, recording bind time on entry to Serving.
    /// Backward transitions are invariant violations.
    pub fn advance(&mut self, next: ReplicaState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(ControlError::InvalidTransition {
                replica: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        if next == ReplicaState::Serving {
            self.last_bind_time = Some(now);
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(state: ReplicaState) -> Replica {
        Replica {
            id: ReplicaId::from("r1"),
            pool_ref: PoolId::from("p1"),
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
    fn forward_transitions_allowed() {
        let mut r = replica(ReplicaState::Pending);
        let now = Utc::now();
        r.advance(ReplicaState::Warming, now).unwrap();
        r.advance(ReplicaState::Warm, now).unwrap();
        r.advance(ReplicaState::Binding, now).unwrap();
        r.advance(ReplicaState::Serving, now).unwrap();
        assert_eq!(r.last_bind_time, Some(now));
        r.advance(ReplicaState::Draining, now).unwrap();
        r.advance(ReplicaState::Terminated, now).unwrap();
    }

    #[test]
    fn skipping_states_is_forward() {
        let mut r = replica(ReplicaState::Pending);
        r.advance(ReplicaState::Terminated, Utc::now()).unwrap();
    }

    #[test]
    fn backward_transition_rejected() {
        let mut r = replica(ReplicaState::Serving);
        let err = r.advance(ReplicaState::Warm, Utc::now()).unwrap_err();
        assert!(matches!(err, ControlError::InvalidTransition { .. }));
    }

    #[test]
    fn routable_states() {
        assert!(ReplicaState::Serving.is_routable());
        assert!(ReplicaState::Draining.is_routable());
        assert!(!ReplicaState::Warm.is_routable());
    }
}
