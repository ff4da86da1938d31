//! Warm-pool bookkeeping.
//!
//! A warm replica is fully initialized (node reserved, weights Ready) but
//! not wired into the router. Scale-up draws from here first; activation is
//! pure router wiring and carries no weight load.

use dashmap::DashMap;
use neuronetes_types::{NodeId, PoolId, PoolSpec, ReplicaId};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One warm replica and where it sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmReplica {
    /// Replica id.
    pub replica: ReplicaId,
    /// Node holding its reservation and weights.
    pub node: NodeId,
}

/// Desired warm count:
/// `clamp(floor(prewarm_fraction * current_size), 0, max_replicas - serving)`.
pub fn desired_warm(spec: &PoolSpec, current_size: u32, serving: u32) -> u32 {
    let target = (spec.prewarm_fraction * current_size as f64).floor() as u32;
    target.min(spec.max_replicas.saturating_sub(serving))
}

/// Warm preparations to enqueue this round, rate-limited by the pool's
/// replenish batch size.
pub fn replenish_quota(spec: &PoolSpec, desired: u32, warm_now: u32) -> u32 {
    desired
        .saturating_sub(warm_now)
        .min(spec.replenish_batch_size)
}

/// Per-pool FIFO of warm replicas.
pub struct WarmPool {
    pools: DashMap<PoolId, Mutex<VecDeque<WarmReplica>>>,
}

impl Default for WarmPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmPool {
    /// Create an empty warm pool.
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// A replica reached Warm.
    pub fn register(&self, pool: &PoolId, warm: WarmReplica) {
        let entry = self.pools.entry(pool.clone()).or_default();
        let mut queue = entry.lock();
        if !queue.iter().any(|w| w.replica == warm.replica) {
            queue.push_back(warm);
        }
    }

    /// A warm replica left (terminated or activated out of band).
    pub fn deregister(&self, pool: &PoolId, replica: &ReplicaId) {
        if let Some(entry) = self.pools.get(pool) {
            entry.lock().retain(|w| &w.replica != replica);
        }
    }

    /// Warm replicas currently available for a pool.
    pub fn count(&self, pool: &PoolId) -> u32 {
        self.pools
            .get(pool)
            .map(|entry| entry.lock().len() as u32)
            .unwrap_or(0)
    }

    /// Draw up to `n` warm replicas for activation, oldest first.
    pub fn acquire(&self, pool: &PoolId, n: u32) -> Vec<WarmReplica> {
        let Some(entry) = self.pools.get(pool) else {
            return Vec::new();
        };
        let mut queue = entry.lock();
        let take = (n as usize).min(queue.len());
        queue.drain(..take).collect()
    }

    /// Drop every warm replica of a pool (pool deletion).
    pub fn clear(&self, pool: &PoolId) -> Vec<WarmReplica> {
        self.pools
            .remove(pool)
            .map(|(_, queue)| queue.into_inner().into_iter().collect())
            .unwrap_or_default()
    }
}
