//! Shared wiring for reconcilers.

use crate::config::ControllerConfig;
use crate::node_source::NodeSource;
use crate::telemetry::Telemetry;
use crate::tracker::ReplicaTracker;
use neuronetes_autoscaler::Evaluator;
use neuronetes_cache::{CacheManager, ResidencyMap, WarmPool};
use neuronetes_inventory::NodeInventory;
use neuronetes_metrics::{MetricReader, MetricSource};
use neuronetes_router::{RouterConfig, SessionRouter};
use neuronetes_scheduler::{Scheduler, SchedulerConfig};
use neuronetes_store::Store;
use neuronetes_types::{ReplicaId, ReplicaRuntime, ReplicaState, Result, SharedClock};
use std::sync::Arc;
use tracing::info;

/// Every component a reconciler may touch. Each piece of global mutable
/// state (inventory, residency map, warm pool, router tables, tracker) is
/// owned by exactly one component behind its typed accessor.
pub struct ControlContext {
    /// Declarative record store.
    pub store: Arc<Store>,
    /// Node inventory.
    pub inventory: Arc<NodeInventory>,
    /// Residency view shared by cache manager and scheduler.
    pub residency: Arc<ResidencyMap>,
    /// Cache and load/evict traffic.
    pub cache: Arc<CacheManager>,
    /// Warm replicas per pool.
    pub warm: Arc<WarmPool>,
    /// Placement.
    pub scheduler: Arc<Scheduler>,
    /// Scaling evaluation.
    pub evaluator: Arc<Evaluator>,
    /// Session routing.
    pub router: Arc<SessionRouter>,
    /// Observed replica state.
    pub tracker: Arc<ReplicaTracker>,
    /// Runtime executor.
    pub runtime: Arc<dyn ReplicaRuntime>,
    /// External node facts.
    pub nodes: Arc<dyn NodeSource>,
    /// Prometheus metrics.
    pub telemetry: Arc<Telemetry>,
    /// Injected clock.
    pub clock: SharedClock,
    /// Daemon configuration.
    pub config: ControllerConfig,
}

impl ControlContext {
    /// Assemble the full component graph from its leaves.
    pub fn build(
        config: ControllerConfig,
        store: Arc<Store>,
        metric_source: Arc<dyn MetricSource>,
        runtime: Arc<dyn ReplicaRuntime>,
        nodes: Arc<dyn NodeSource>,
        clock: SharedClock,
    ) -> Result<Self> {
        let inventory = Arc::new(NodeInventory::new());
        let residency = Arc::new(ResidencyMap::new(clock.clone()));
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&residency),
            Arc::clone(&inventory),
            Arc::clone(&runtime),
            clock.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig {
                max_attempts: config.scheduler_max_attempts,
                enable_preemption: config.enable_preemption,
                ..Default::default()
            },
            Arc::clone(&inventory),
            Arc::clone(&residency),
        )?);
        let reader = Arc::new(MetricReader::new(
            metric_source,
            config.metric_concurrency,
            clock.clone(),
        ));
        let evaluator = Arc::new(Evaluator::new(reader, clock.clone()));
        let router = Arc::new(SessionRouter::new(RouterConfig::default(), clock.clone()));
        let tracker = Arc::new(ReplicaTracker::new(clock.clone()));
        let telemetry = Arc::new(Telemetry::new()?);

        Ok(Self {
            store,
            inventory,
            residency,
            cache,
            warm: Arc::new(WarmPool::new()),
            scheduler,
            evaluator,
            router,
            tracker,
            runtime,
            nodes,
            telemetry,
            clock,
            config,
        })
    }

    /// Handle an observed replica termination: retire its routing entry,
    /// release its reservation and drop its model reference. Idempotent.
    pub fn on_replica_terminated(&self, id: &ReplicaId) {
        let Some(replica) = self.tracker.get(id) else {
            return;
        };
        if replica.state != ReplicaState::Terminated {
            // Skipping states forward is legal; a crash can terminate a
            // replica from any state.
            let _ = self.tracker.advance(id, ReplicaState::Terminated);
        }
        self.router.remove_replica(&replica.pool_ref, id);
        self.warm.deregister(&replica.pool_ref, id);
        if let Some(node) = &replica.node_ref {
            self.inventory.release(node, id);
            self.residency.remove_ref(node, &replica.model_ref);
        }
        self.tracker.remove(id);
        info!(replica = %id, pool = %replica.pool_ref, "replica retired");
    }
}
