//! GPU-topology scheduler.
//!
//! Given a placement request `(pool, count)`, filters ready nodes against
//! the pool's requirements, scores the survivors, and commits a group of
//! slot reservations (atomically on one node for co-located gangs), or
//! returns a structured unschedulable reason. Reservations are keyed by
//! generated reservation tokens; the controller re-keys them once the
//! runtime executor assigns authoritative replica ids.

mod score;

pub use score::ScoreWeights;

use neuronetes_cache::ResidencyMap;
use neuronetes_inventory::{NodeFilter, NodeInventory, NodeSnapshot, SlotRequest};
use neuronetes_types::{
    CapacityHint, ControlError, ModelSpec, NodeBinding, NodeId, PoolSpec, ReplicaId, Result,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Scheduler policy knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scoring weights; must sum to 1.0.
    pub weights: ScoreWeights,
    /// Candidate sets tried before giving up on a bind.
    pub max_attempts: usize,
    /// Whether the scheduler may emit preemption requests. Default off.
    pub enable_preemption: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            max_attempts: 5,
            enable_preemption: false,
        }
    }
}

/// One placement request.
#[derive(Debug, Clone)]
pub struct PlacementRequest<'a> {
    /// Pool the replicas belong to.
    pub pool: &'a PoolSpec,
    /// Model the replicas serve.
    pub model: &'a ModelSpec,
    /// Replicas to place.
    pub count: u32,
    /// Capacity constraint from the autoscaler's SLO guard.
    pub hint: CapacityHint,
}

/// One committed placement, keyed by its reservation token.
#[derive(Debug, Clone)]
pub struct ScheduledReplica {
    /// Reservation token held in the inventory until the controller re-keys
    /// it to the runtime-assigned replica id.
    pub reservation: ReplicaId,
    /// Node and slots reserved.
    pub binding: NodeBinding,
}

/// A replica that could be preempted to make room, supplied by the
/// controller from its replica view.
#[derive(Debug, Clone)]
pub struct PreemptionCandidate {
    /// Replica that would be preempted.
    pub replica: ReplicaId,
    /// Node it runs on.
    pub node: NodeId,
    /// Scheduling priority of its pool.
    pub priority: i32,
    /// Pinned or critical-priority replicas are never preempted.
    pub protected: bool,
}

/// The scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    inventory: Arc<NodeInventory>,
    residency: Arc<ResidencyMap>,
}

impl Scheduler {
    /// Wire the scheduler to the inventory and the residency view.
    pub fn new(
        config: SchedulerConfig,
        inventory: Arc<NodeInventory>,
        residency: Arc<ResidencyMap>,
    ) -> Result<Self> {
        config.weights.validate()?;
        Ok(Self {
            config,
            inventory,
            residency,
        })
    }

    /// Place `request.count` replicas. On success every binding is reserved
    /// in the inventory; on failure every reservation made for this request
    /// has been rolled back.
    pub fn schedule(
        &self,
        request: &PlacementRequest<'_>,
        preemptibles: &[PreemptionCandidate],
    ) -> Result<Vec<ScheduledReplica>> {
        if request.count == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.candidates(request);
        if candidates.is_empty() {
            return self.maybe_preempt(
                request,
                preemptibles,
                ControlError::NoFeasibleNode(format!(
                    "no ready node matches pool {} requirements",
                    request.pool.id
                )),
            );
        }

        let gang = request.count > 1 && request.pool.gpu.topology_class.requires_co_location();
        let result = if gang {
            self.commit_gang(request, candidates)
        } else {
            self.commit_spread(request, candidates)
        };
        match result {
            Ok(placements) => {
                info!(
                    pool = %request.pool.id,
                    count = placements.len(),
                    gang,
                    "placement committed"
                );
                Ok(placements)
            }
            Err(e) => self.maybe_preempt(request, preemptibles, e),
        }
    }

    /// Filter phase: ready nodes satisfying labels, GPU type/memory/count,
    /// MIG profile, capacity hint and topology class.
    fn candidates(&self, request: &PlacementRequest<'_>) -> Vec<NodeSnapshot> {
        let pool = request.pool;
        let filter = NodeFilter {
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
        };
        self.inventory
            .list(&filter)
            .into_iter()
            .filter(|snapshot| {
                snapshot
                    .fact
                    .interconnect
                    .satisfies(pool.gpu.topology_class)
            })
            .filter(|snapshot| match request.hint {
                CapacityHint::Any => true,
                CapacityHint::Durable => {
                    snapshot.fact.capacity_class == neuronetes_types::CapacityClass::Durable
                }
            })
            .collect()
    }

    /// Score and order candidates, best first, ties broken by node-id hash
    /// for stability.
    fn ranked(&self, request: &PlacementRequest<'_>, mut candidates: Vec<NodeSnapshot>) -> Vec<NodeSnapshot> {
        let mut scored: Vec<(f64, u64, NodeSnapshot)> = candidates
            .drain(..)
            .map(|snapshot| {
                let score = self.config.weights.score(
                    request.pool,
                    request.model,
                    &snapshot,
                    &self.residency,
                );
                let mut hasher = DefaultHasher::new();
                snapshot.fact.id.hash(&mut hasher);
                (score, hasher.finish(), snapshot)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        for (score, _, snapshot) in &scored {
            debug!(node = %snapshot.fact.id, score = format!("{score:.1}"), "candidate scored");
        }
        scored.into_iter().map(|(_, _, snapshot)| snapshot).collect()
    }

    /// Gang commit: all replicas on one node, atomically or rolled back.
    fn commit_gang(
        &self,
        request: &PlacementRequest<'_>,
        candidates: Vec<NodeSnapshot>,
    ) -> Result<Vec<ScheduledReplica>> {
        let per_replica = self.slot_request(request.pool);
        for snapshot in self.ranked(request, candidates) {
            if !self.gang_fits(request, &snapshot) {
                continue;
            }
            let node = snapshot.fact.id.clone();
            match self.reserve_group(&node, &per_replica, request.count) {
                Ok(placements) => {
                    self.residency.touch(&node, &request.model.id);
                    return Ok(placements);
                }
                Err(e) => {
                    debug!(node = %node, error = %e, "gang reservation lost a race, trying next node");
                }
            }
        }
        Err(ControlError::GangInfeasible(format!(
            "no single node can host {} co-located replicas of pool {}",
            request.count, request.pool.id
        )))
    }

    fn gang_fits(&self, request: &PlacementRequest<'_>, snapshot: &NodeSnapshot) -> bool {
        match &request.pool.mig_profile {
            Some(profile) => {
                snapshot.free_mig.get(profile).copied().unwrap_or(0) >= request.count
            }
            None => snapshot.free_gpus >= request.count * request.pool.gpu.count,
        }
    }

    /// Spread commit: each replica on its best node, with bounded candidate
    /// retries and full rollback on exhaustion.
    fn commit_spread(
        &self,
        request: &PlacementRequest<'_>,
        candidates: Vec<NodeSnapshot>,
    ) -> Result<Vec<ScheduledReplica>> {
        let per_replica = self.slot_request(request.pool);
        let mut placements: Vec<ScheduledReplica> = Vec::new();
        let mut failed_attempts = 0usize;

        'replicas: for _ in 0..request.count {
            // Refresh free counts after each reservation.
            let fresh: Vec<NodeSnapshot> = candidates
                .iter()
                .filter_map(|snapshot| self.inventory.get(&snapshot.fact.id))
                .collect();
            for snapshot in self.ranked(request, fresh) {
                let node = snapshot.fact.id.clone();
                let reservation = ReplicaId::generate();
                match self.inventory.reserve(&node, &reservation, &per_replica) {
                    Ok(grant) => {
                        self.residency.touch(&node, &request.model.id);
                        placements.push(ScheduledReplica {
                            reservation,
                            binding: NodeBinding {
                                node,
                                gpu_slots: grant.gpu_slots,
                                mig_slot: grant.mig_slot,
                            },
                        });
                        continue 'replicas;
                    }
                    Err(e) => {
                        failed_attempts += 1;
                        debug!(node = %node, error = %e, "reserve failed, trying next candidate");
                        if failed_attempts >= self.config.max_attempts {
                            self.rollback(&placements);
                            return Err(ControlError::AllCandidatesExhausted(failed_attempts));
                        }
                    }
                }
            }
            // No candidate could take this replica.
            self.rollback(&placements);
            return Err(ControlError::CapacityExhausted(
                candidates
                    .first()
                    .map(|s| s.fact.id.clone())
                    .unwrap_or_else(|| NodeId::from("(none)")),
            ));
        }
        Ok(placements)
    }

    fn reserve_group(
        &self,
        node: &NodeId,
        per_replica: &SlotRequest,
        count: u32,
    ) -> Result<Vec<ScheduledReplica>> {
        let mut placements = Vec::new();
        for _ in 0..count {
            let reservation = ReplicaId::generate();
            match self.inventory.reserve(node, &reservation, per_replica) {
                Ok(grant) => placements.push(ScheduledReplica {
                    reservation,
                    binding: NodeBinding {
                        node: node.clone(),
                        gpu_slots: grant.gpu_slots,
                        mig_slot: grant.mig_slot,
                    },
                }),
                Err(e) => {
                    self.rollback(&placements);
                    return Err(e);
                }
            }
        }
        Ok(placements)
    }

    fn rollback(&self, placements: &[ScheduledReplica]) {
        for placement in placements {
            self.inventory
                .release(&placement.binding.node, &placement.reservation);
        }
        if !placements.is_empty() {
            warn!(count = placements.len(), "rolled back partial placement");
        }
    }

    fn slot_request(&self, pool: &PoolSpec) -> SlotRequest {
        SlotRequest {
            gpu_count: pool.gpu.count,
            mig: pool.mig_profile.clone(),
        }
    }

    /// When enabled, convert a terminal placement failure into a preemption
    /// request for the lowest-priority unprotected replica below this
    /// pool's priority.
    fn maybe_preempt(
        &self,
        request: &PlacementRequest<'_>,
        preemptibles: &[PreemptionCandidate],
        original: ControlError,
    ) -> Result<Vec<ScheduledReplica>> {
        if !self.config.enable_preemption {
            return Err(original);
        }
        let victim = preemptibles
            .iter()
            .filter(|c| !c.protected && c.priority < request.pool.scheduling_priority)
            .min_by_key(|c| c.priority);
        match victim {
            Some(victim) => Err(ControlError::PreemptionRequired {
                node: victim.node.clone(),
                victim: victim.replica.clone(),
            }),
            None => Err(original),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronetes_types::{
        AgentClassId, CachePriority, CapacityClass, GpuRequirements, InterconnectClass,
        ManualClock, MigProfile, ModelId, NodeFact, PoolId, SharedClock, ShardStrategy,
        TopologyClass,
    };
    use std::collections::BTreeMap;

    fn node(id: &str, gpus: u32, interconnect: InterconnectClass, class: CapacityClass) -> NodeFact {
        NodeFact {
            id: NodeId::from(id),
            labels: BTreeMap::new(),
            total_gpu_count: gpus,
            gpu_type: "h100".to_string(),
            gpu_memory_bytes: 80 << 30,
            interconnect,
            mig_capacity: BTreeMap::new(),
            resident_models: Default::default(),
            assigned_replicas: Default::default(),
            capacity_class: class,
            ready: true,
            cache_capacity_bytes: 500 << 30,
        }
    }

    fn model() -> ModelSpec {
        ModelSpec {
            id: ModelId::from("m1"),
            uri: "s3://weights/m1".to_string(),
            size_bytes: 10 << 30,
            quantization: None,
            shard_count: 1,
            shard_strategy: ShardStrategy::Tensor,
            topology_class: TopologyClass::Any,
            cache_priority: CachePriority::Medium,
            pin_duration_secs: None,
            labels: Default::default(),
            generation: 1,
        }
    }

    fn pool(count: u32, topology: TopologyClass) -> PoolSpec {
        PoolSpec {
            id: PoolId::from("p1"),
            agent_class_ref: AgentClassId::from("ac1"),
            min_replicas: 0,
            max_replicas: 16,
            prewarm_fraction: 0.0,
            tokens_per_second_budget: None,
            mig_profile: None,
            gpu: GpuRequirements {
                count,
                gpu_type: None,
                memory_bytes: 1,
                topology_class: topology,
            },
            affinity: Default::default(),
            session_affinity_key: None,
            scaling_metrics: vec![],
            behavior: Default::default(),
            cost: Default::default(),
            scheduling_priority: 0,
            replenish_batch_size: 2,
            session_ttl_secs: 900,
            max_sessions_per_replica: 8,
            generation: 1,
        }
    }

    fn scheduler(inventory: Arc<NodeInventory>) -> (Arc<ResidencyMap>, Scheduler) {
        let clock: SharedClock = Arc::new(ManualClock::from_wall());
        let residency = Arc::new(ResidencyMap::new(clock));
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            inventory,
            Arc::clone(&residency),
        )
        .unwrap();
        (residency, scheduler)
    }

    #[test]
    fn places_on_the_only_feasible_node() {
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(node("n1", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        let (_, scheduler) = scheduler(Arc::clone(&inventory));
        let pool = pool(1, TopologyClass::Any);
        let model = model();

        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 2,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap();
        assert_eq!(placements.len(), 2);
        assert_eq!(inventory.get(&NodeId::from("n1")).unwrap().free_gpus, 2);
    }

    #[test]
    fn no_feasible_node_when_filter_rejects_everything() {
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(node("n1", 4, InterconnectClass::Pcie, CapacityClass::Durable));
        let (_, scheduler) = scheduler(inventory);
        let pool = pool(1, TopologyClass::FastInterconnect);
        let model = model();

        let err = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 1,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::NoFeasibleNode(_)));
    }

    #[test]
    fn cache_presence_outranks_otherwise_equal_nodes() {
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(node("n1", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        inventory.upsert(node("n2", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        let (residency, scheduler) = scheduler(Arc::clone(&inventory));
        let pool = pool(1, TopologyClass::Any);
        let model = model();

        residency.ensure_node(&NodeId::from("n2"), 500 << 30);
        residency
            .begin_load(
                &NodeId::from("n2"),
                &neuronetes_cache::LoadRequest {
                    model: model.id.clone(),
                    bytes: model.size_bytes,
                    priority: model.cache_priority,
                    pin_for: None,
                },
            )
            .unwrap();
        residency.finish_load(&NodeId::from("n2"), &model.id);

        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 1,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap();
        assert_eq!(placements[0].binding.node, NodeId::from("n2"));
    }

    #[test]
    fn gang_lands_on_one_node_or_fails() {
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(node("n1", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        inventory.upsert(node("n2", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        let (_, scheduler) = scheduler(Arc::clone(&inventory));
        let pool = pool(1, TopologyClass::FastInterconnect);
        let model = model();

        // 4 replicas x 1 GPU fit on one node.
        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 4,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap();
        let nodes: std::collections::BTreeSet<_> =
            placements.iter().map(|p| p.binding.node.clone()).collect();
        assert_eq!(nodes.len(), 1);

        // 6 more cannot land on any single node.
        let err = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 6,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::GangInfeasible(_)));

        // Failed gang left no stray reservations.
        let free: u32 = ["n1", "n2"]
            .iter()
            .map(|n| inventory.get(&NodeId::from(*n)).unwrap().free_gpus)
            .sum();
        assert_eq!(free, 4);
    }

    #[test]
    fn selector_expressions_narrow_the_candidate_set() {
        use neuronetes_types::{SelectorOperator, SelectorRequirement};

        let inventory = Arc::new(NodeInventory::new());
        let mut tiered = node("tiered", 4, InterconnectClass::Nvlink, CapacityClass::Durable);
        tiered
            .labels
            .insert("tier".to_string(), "inference".to_string());
        inventory.upsert(tiered);
        inventory.upsert(node("plain", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        let (_, scheduler) = scheduler(inventory);

        let mut pool = pool(1, TopologyClass::Any);
        pool.affinity.node_selector.match_expressions = vec![SelectorRequirement {
            key: "tier".to_string(),
            operator: SelectorOperator::In,
            values: vec!["inference".to_string()],
        }];
        let model = model();

        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 1,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap();
        assert_eq!(placements[0].binding.node, NodeId::from("tiered"));
    }

    #[test]
    fn durable_hint_excludes_preemptible_nodes() {
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(node("spot", 8, InterconnectClass::Nvlink, CapacityClass::Preemptible));
        inventory.upsert(node("stable", 2, InterconnectClass::Nvlink, CapacityClass::Durable));
        let (_, scheduler) = scheduler(inventory);
        let pool = pool(1, TopologyClass::Any);
        let model = model();

        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 1,
                    hint: CapacityHint::Durable,
                },
                &[],
            )
            .unwrap();
        assert_eq!(placements[0].binding.node, NodeId::from("stable"));
    }

    #[test]
    fn spot_preference_ranks_preemptible_first() {
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(node("spot", 4, InterconnectClass::Nvlink, CapacityClass::Preemptible));
        inventory.upsert(node("stable", 4, InterconnectClass::Nvlink, CapacityClass::Durable));
        let (_, scheduler) = scheduler(inventory);
        let mut pool = pool(1, TopologyClass::Any);
        pool.cost.prefer_spot = true;
        let model = model();

        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 1,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap();
        assert_eq!(placements[0].binding.node, NodeId::from("spot"));
    }

    #[test]
    fn mig_pools_bind_mig_slots() {
        let mut fact = node("n1", 4, InterconnectClass::Nvlink, CapacityClass::Durable);
        fact.mig_capacity.insert(MigProfile::from("1g.10gb"), 3);
        let inventory = Arc::new(NodeInventory::new());
        inventory.upsert(fact);
        let (_, scheduler) = scheduler(inventory);
        let mut pool = pool(0, TopologyClass::Any);
        pool.mig_profile = Some(MigProfile::from("1g.10gb"));
        let model = model();

        let placements = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 2,
                    hint: CapacityHint::Any,
                },
                &[],
            )
            .unwrap();
        assert!(placements
            .iter()
            .all(|p| p.binding.mig_slot == Some(MigProfile::from("1g.10gb"))));
    }

    #[test]
    fn preemption_emits_lowest_priority_unprotected_victim() {
        let inventory = Arc::new(NodeInventory::new());
        // Full node: nothing schedulable.
        let mut fact = node("n1", 0, InterconnectClass::Nvlink, CapacityClass::Durable);
        fact.total_gpu_count = 0;
        inventory.upsert(fact);
        let clock: SharedClock = Arc::new(ManualClock::from_wall());
        let residency = Arc::new(ResidencyMap::new(clock));
        let scheduler = Scheduler::new(
            SchedulerConfig {
                enable_preemption: true,
                ..Default::default()
            },
            inventory,
            residency,
        )
        .unwrap();
        let mut pool = pool(1, TopologyClass::Any);
        pool.scheduling_priority = 10;
        let model = model();

        let preemptibles = vec![
            PreemptionCandidate {
                replica: ReplicaId::from("protected-low"),
                node: NodeId::from("n1"),
                priority: 0,
                protected: true,
            },
            PreemptionCandidate {
                replica: ReplicaId::from("victim"),
                node: NodeId::from("n1"),
                priority: 2,
                protected: false,
            },
            PreemptionCandidate {
                replica: ReplicaId::from("higher"),
                node: NodeId::from("n1"),
                priority: 5,
                protected: false,
            },
        ];
        let err = scheduler
            .schedule(
                &PlacementRequest {
                    pool: &pool,
                    model: &model,
                    count: 1,
                    hint: CapacityHint::Any,
                },
                &preemptibles,
            )
            .unwrap_err();
        match err {
            ControlError::PreemptionRequired { victim, .. } => {
                assert_eq!(victim, ReplicaId::from("victim"));
            }
            other => panic!("expected PreemptionRequired, got {other:?}"),
        }
    }
}
