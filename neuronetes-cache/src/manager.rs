//! The cache manager.
//!
//! Owns load and eviction traffic against the runtime executor. Loads and
//! evictions run in background tasks owned by the manager, not by the
//! reconcile that requested them; subsequent reconciles observe progress
//! through residency state.

use crate::backoff::BackoffTracker;
use crate::residency::{LoadRequest, LoadStart, ResidencyMap};
use neuronetes_inventory::{NodeFilter, NodeInventory};
use neuronetes_types::{
    ControlError, ModelSpec, NodeId, PoolSpec, ReplicaRuntime, Result, SharedClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What `ensure_resident` found or started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidencyOutcome {
    /// Weights are Ready on the node.
    Ready,
    /// A load or eviction is in flight; check again next reconcile.
    InFlight,
    /// The (node, model) pair is backing off after a failure.
    BackingOff,
}

/// Decides when weights are loaded or evicted on a node.
pub struct CacheManager {
    residency: Arc<ResidencyMap>,
    inventory: Arc<NodeInventory>,
    runtime: Arc<dyn ReplicaRuntime>,
    backoff: Arc<BackoffTracker>,
    clock: SharedClock,
}

impl CacheManager {
    /// Wire the manager to its collaborators.
    pub fn new(
        residency: Arc<ResidencyMap>,
        inventory: Arc<NodeInventory>,
        runtime: Arc<dyn ReplicaRuntime>,
        clock: SharedClock,
    ) -> Self {
        Self {
            residency,
            inventory,
            runtime,
            backoff: Arc::new(BackoffTracker::standard(clock.clone())),
            clock,
        }
    }

    /// Shared residency view for the scheduler.
    pub fn residency(&self) -> Arc<ResidencyMap> {
        Arc::clone(&self.residency)
    }

    /// Make `model` resident on `node`, starting a load (and an eviction if
    /// capacity demands one) in the background. Fails with `NoCacheRoom`
    /// when nothing is evictable; the scheduler must pick another node.
    pub fn ensure_resident(&self, node: &NodeId, model: &ModelSpec) -> Result<ResidencyOutcome> {
        if !self.backoff.ready(node, &model.id) {
            return Ok(ResidencyOutcome::BackingOff);
        }
        let request = LoadRequest {
            model: model.id.clone(),
            bytes: model.size_bytes,
            priority: model.cache_priority,
            pin_for: model.pin_duration_secs.map(Duration::from_secs),
        };
        match self.residency.begin_load(node, &request)? {
            LoadStart::AlreadyReady => Ok(ResidencyOutcome::Ready),
            LoadStart::AlreadyLoading => Ok(ResidencyOutcome::InFlight),
            LoadStart::Started => {
                self.spawn_load(node.clone(), model.id.clone());
                Ok(ResidencyOutcome::InFlight)
            }
            LoadStart::NeedsEviction(victim) => {
                self.spawn_named_eviction(node.clone(), victim);
                Ok(ResidencyOutcome::InFlight)
            }
        }
    }

    /// Preload candidate nodes for a pool, up to
    /// `max(min_replicas, ceil(prewarm_fraction * max_replicas))` of them.
    /// Returns how many nodes are Ready or have a load in flight.
    pub fn preload_for_pool(&self, pool: &PoolSpec, model: &ModelSpec) -> Result<u32> {
        let wanted = pool.preload_node_count();
        if wanted == 0 {
            return Ok(0);
        }
        let mut candidates = self.inventory.list(&pool_filter(pool));
        if candidates.is_empty() {
            return Err(ControlError::NoFeasibleNode(format!(
                "no node matches pool {} requirements for preload",
                pool.id
            )));
        }
        // Nodes that already hold the model come first so preload converges
        // instead of spreading to fresh nodes on every pass.
        candidates.sort_by(|a, b| {
            let pa = self.residency.presence_score(&a.fact.id, &model.id);
            let pb = self.residency.presence_score(&b.fact.id, &model.id);
            pb.partial_cmp(&pa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.free_gpus.cmp(&a.free_gpus))
        });

        let mut covered = 0u32;
        for candidate in candidates {
            if covered >= wanted {
                break;
            }
            let node = &candidate.fact.id;
            self.residency
                .ensure_node(node, candidate.fact.cache_capacity_bytes);
            match self.ensure_resident(node, model) {
                Ok(ResidencyOutcome::Ready) | Ok(ResidencyOutcome::InFlight) => covered += 1,
                Ok(ResidencyOutcome::BackingOff) => {
                    debug!(node = %node, model = %model.id, "preload skipped: backing off");
                }
                Err(ControlError::NoCacheRoom { .. }) => {
                    debug!(node = %node, model = %model.id, "preload skipped: no cache room");
                }
                Err(e) => {
                    warn!(node = %node, model = %model.id, error = %e, "preload failed");
                }
            }
        }
        info!(pool = %pool.id, model = %model.id, covered, wanted, "preload pass complete");
        Ok(covered)
    }

    /// Nodes where the model is Ready, for scale-up delegation ordering.
    pub fn preloaded_nodes(&self, model: &ModelSpec) -> Vec<NodeId> {
        self.residency.nodes_with_ready(&model.id)
    }

    /// Evict a Ready model from a node on behalf of policy (making room for
    /// a gang, or retiring a deleted model). The eviction runs in the
    /// background. Referenced and pinned entries refuse.
    pub fn request_eviction(&self, node: &NodeId, model: &neuronetes_types::ModelId) -> Result<()> {
        self.residency.mark_evicting(node, model)?;
        self.spawn_named_eviction(node.clone(), model.clone());
        Ok(())
    }

    fn spawn_load(&self, node: NodeId, model: neuronetes_types::ModelId) {
        let residency = Arc::clone(&self.residency);
        let inventory = Arc::clone(&self.inventory);
        let runtime = Arc::clone(&self.runtime);
        let backoff = Arc::clone(&self.backoff);
        tokio::spawn(async move {
            debug!(node = %node, model = %model, "weight load started");
            match runtime.preload_model(&node, &model).await {
                Ok(()) => {
                    residency.finish_load(&node, &model);
                    backoff.record_success(&node, &model);
                    inventory.set_resident_models(&node, residency.ready_models(&node));
                    info!(node = %node, model = %model, "weight load complete");
                }
                Err(e) => {
                    residency.fail_load(&node, &model);
                    backoff.record_failure(&node, &model);
                    warn!(node = %node, model = %model, error = %e, "weight load failed");
                }
            }
        });
    }

    fn spawn_named_eviction(&self, node: NodeId, victim: neuronetes_types::ModelId) {
        let residency = Arc::clone(&self.residency);
        let inventory = Arc::clone(&self.inventory);
        let runtime = Arc::clone(&self.runtime);
        let backoff = Arc::clone(&self.backoff);
        tokio::spawn(async move {
            debug!(node = %node, model = %victim, "eviction started");
            match runtime.evict_model(&node, &victim).await {
                Ok(()) => {
                    residency.finish_eviction(&node, &victim);
                    inventory.set_resident_models(&node, residency.ready_models(&node));
                    info!(node = %node, model = %victim, "eviction complete");
                }
                Err(e) => {
                    backoff.record_failure(&node, &victim);
                    warn!(node = %node, model = %victim, error = %e, "eviction failed");
                }
            }
        });
    }

    /// Clock the manager runs on.
    pub fn clock(&self) -> SharedClock {
        Arc::clone(&self.clock)
    }
}

/// Inventory filter matching a pool's per-replica requirements.
pub(crate) fn pool_filter(pool: &PoolSpec) -> NodeFilter {
    NodeFilter {
        require_ready: true,
        labels: pool.affinity.node_labels.clone(),
        selector: pool.affinity.node_selector.clone(),
        gpu_type: pool.gpu.gpu_type.clone(),
        min_free_gpus: if pool.mig_profile.is_some() {
            0
        } else {
            pool.gpu.count
        },
        min_gpu_memory: pool.gpu.memory_bytes,
        mig_profile: pool.mig_profile.clone(),
        capacity_class: None,
    }
}
