//! Shared fixture for controller integration tests: a manual clock, an
//! in-memory store and a scripted runtime executor.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neuronetes_controller::reconcilers;
use neuronetes_controller::{ControlContext, ControllerConfig, StaticNodeSource};
use neuronetes_inventory::SlotRequest;
use neuronetes_metrics::MemorySource;
use neuronetes_store::{Kind, Store};
use neuronetes_types::{
    AgentClassId, AgentClassSpec, CachePriority, CapacityClass, Clock, GpuRequirements,
    InterconnectClass, ManualClock, ModelId, ModelSpec, NodeBinding, NodeFact, NodeId, PoolId,
    PoolSpec, PoolStatus, Replica, ReplicaEndpoint, ReplicaId, ReplicaRuntime, ReplicaState,
    ResidencyState, Result, ScalingMetricSpec, SharedClock, ShardStrategy, Signal, SloSpec,
    TopologyClass,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Records every lifecycle call and acknowledges it with synthetic results.
#[derive(Default)]
pub struct FakeRuntime {
    pub created: Mutex<Vec<(ReplicaId, NodeBinding)>>,
    pub warmed: Mutex<Vec<ReplicaId>>,
    pub bound: Mutex<Vec<ReplicaId>>,
    pub drained: Mutex<Vec<(ReplicaId, DateTime<Utc>)>>,
    pub preloaded: Mutex<Vec<(NodeId, ModelId)>>,
    pub evicted: Mutex<Vec<(NodeId, ModelId)>>,
}

#[async_trait]
impl ReplicaRuntime for FakeRuntime {
    async fn create_replica(&self, _pool: &PoolSpec, binding: &NodeBinding) -> Result<ReplicaId> {
        let id = ReplicaId::generate();
        self.created.lock().push((id.clone(), binding.clone()));
        Ok(id)
    }

    async fn warm_replica(&self, replica: &ReplicaId) -> Result<()> {
        self.warmed.lock().push(replica.clone());
        Ok(())
    }

    async fn bind_replica(&self, replica: &ReplicaId) -> Result<ReplicaEndpoint> {
        self.bound.lock().push(replica.clone());
        Ok(ReplicaEndpoint {
            replica: replica.clone(),
            address: format!("grpc://{replica}"),
        })
    }

    async fn drain_replica(&self, replica: &ReplicaId, deadline: DateTime<Utc>) -> Result<()> {
        self.drained.lock().push((replica.clone(), deadline));
        Ok(())
    }

    async fn preload_model(&self, node: &NodeId, model: &ModelId) -> Result<()> {
        self.preloaded.lock().push((node.clone(), model.clone()));
        Ok(())
    }

    async fn evict_model(&self, node: &NodeId, model: &ModelId) -> Result<()> {
        self.evicted.lock().push((node.clone(), model.clone()));
        Ok(())
    }
}

/// Fully wired control context around fakes.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub source: Arc<MemorySource>,
    pub runtime: Arc<FakeRuntime>,
    pub nodes: Arc<StaticNodeSource>,
    pub ctx: Arc<ControlContext>,
}

impl Fixture {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::from_wall());
        let shared: SharedClock = clock.clone();
        let source = Arc::new(MemorySource::new(shared.clone(), Duration::from_secs(3600)));
        let runtime = Arc::new(FakeRuntime::default());
        let nodes = Arc::new(StaticNodeSource::default());
        let config = ControllerConfig {
            metrics_grace_secs: 120,
            ..Default::default()
        };
        let ctx = Arc::new(
            ControlContext::build(
                config,
                Arc::new(Store::memory()),
                source.clone(),
                runtime.clone(),
                nodes.clone(),
                shared,
            )
            .expect("context builds"),
        );
        Self {
            clock,
            source,
            runtime,
            nodes,
            ctx,
        }
    }

    pub async fn sync_nodes(&self) {
        reconcilers::node::reconcile_nodes(&self.ctx)
            .await
            .expect("node sync");
    }

    pub async fn reconcile_pool(&self, id: &str) -> Result<()> {
        reconcilers::reconcile(&self.ctx, Kind::Pool, id).await
    }

    pub async fn pool_status(&self, id: &str) -> PoolStatus {
        self.ctx
            .store
            .read_status::<PoolStatus>(id)
            .await
            .expect("status readable")
            .unwrap_or_default()
    }

    pub async fn wait_model_ready(&self, node: &str, model: &str) {
        let node = NodeId::from(node);
        let model = ModelId::from(model);
        for _ in 0..200 {
            if self.ctx.residency.state(&node, &model) == Some(ResidencyState::Ready) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("model {model} never became Ready on {node}");
    }

    /// Install a replica as if an earlier reconcile had placed it: slots
    /// reserved, tracked, referenced, and routed or registered warm.
    pub fn seed_replica(
        &self,
        pool: &PoolSpec,
        model: &ModelSpec,
        node: &str,
        state: ReplicaState,
        bound_secs_ago: i64,
    ) -> ReplicaId {
        let node_id = NodeId::from(node);
        let id = ReplicaId::generate();
        let grant = self
            .ctx
            .inventory
            .reserve(
                &node_id,
                &id,
                &SlotRequest {
                    gpu_count: pool.gpu.count,
                    mig: pool.mig_profile.clone(),
                },
            )
            .expect("seed reservation");
        let now = self.clock.now();
        self.ctx.tracker.insert(Replica {
            id: id.clone(),
            pool_ref: pool.id.clone(),
            node_ref: Some(node_id.clone()),
            state,
            gpu_slots: grant.gpu_slots,
            mig_slot: grant.mig_slot,
            model_ref: model.id.clone(),
            birth_time: now - chrono::Duration::seconds(bound_secs_ago),
            last_bind_time: Some(now - chrono::Duration::seconds(bound_secs_ago)),
        });
        self.ctx.residency.add_ref(&node_id, &model.id);
        match state {
            ReplicaState::Serving => {
                self.ctx
                    .router
                    .upsert_replica(&pool.id, &id, format!("grpc://{id}"));
            }
            ReplicaState::Warm => {
                self.ctx.warm.register(
                    &pool.id,
                    neuronetes_cache::WarmReplica {
                        replica: id.clone(),
                        node: node_id,
                    },
                );
            }
            _ => {}
        }
        id
    }
}

pub fn node(id: &str, gpus: u32, interconnect: InterconnectClass, class: CapacityClass) -> NodeFact {
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

pub fn model(id: &str) -> ModelSpec {
    ModelSpec {
        id: ModelId::from(id),
        uri: format!("s3://weights/{id}"),
        size_bytes: 10 << 30,
        quantization: None,
        shard_count: 1,
        shard_strategy: ShardStrategy::Tensor,
        topology_class: TopologyClass::Any,
        cache_priority: CachePriority::Medium,
        pin_duration_secs: None,
        labels: Default::default(),
        generation: 0,
    }
}

pub fn agent_class(id: &str, model: &str) -> AgentClassSpec {
    AgentClassSpec {
        id: AgentClassId::from(id),
        model_ref: ModelId::from(model),
        max_context_tokens: 128_000,
        tool_permissions: vec![],
        guardrail_ids: vec![],
        slo: SloSpec {
            ttft_ms: 500,
            tokens_per_second: 50.0,
            p95_latency_ms: 2000,
        },
        memory_backend: None,
        generation: 0,
    }
}

pub fn pool(id: &str, min: u32, max: u32, prewarm: f64) -> PoolSpec {
    PoolSpec {
        id: PoolId::from(id),
        agent_class_ref: AgentClassId::from("chat"),
        min_replicas: min,
        max_replicas: max,
        prewarm_fraction: prewarm,
        tokens_per_second_budget: None,
        mig_profile: None,
        gpu: GpuRequirements {
            count: 1,
            gpu_type: None,
            memory_bytes: 1 << 30,
            topology_class: TopologyClass::Any,
        },
        affinity: Default::default(),
        session_affinity_key: None,
        scaling_metrics: vec![ScalingMetricSpec {
            signal: Signal::TokensQueued,
            target: "100".to_string(),
            window_secs: 60,
        }],
        behavior: Default::default(),
        cost: Default::default(),
        scheduling_priority: 0,
        replenish_batch_size: 2,
        session_ttl_secs: 60,
        max_sessions_per_replica: 8,
        generation: 0,
    }
}

/// Store the default model, agent class and the given pool.
pub async fn apply_stack(f: &Fixture, pool_spec: &PoolSpec) {
    f.ctx.store.apply(model("llama")).await.expect("model");
    f.ctx
        .store
        .apply(agent_class("chat", "llama"))
        .await
        .expect("agent class");
    f.ctx.store.apply(pool_spec.clone()).await.expect("pool");
}
