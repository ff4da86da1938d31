//! Replica pool specifications.

use crate::ids::{AgentClassId, PoolId};
use crate::metric::Signal;
use crate::model::TopologyClass;
use crate::node::MigProfile;
use crate::selector::LabelSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// GPU resources each replica of a pool needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuRequirements {
    /// Full GPUs per replica (ignored when a MIG profile is set).
    pub count: u32,
    /// Required GPU product type, if any.
    #[serde(default)]
    pub gpu_type: Option<String>,
    /// Minimum memory per GPU.
    pub memory_bytes: u64,
    /// Locality required between the replica's GPUs.
    pub topology_class: TopologyClass,
}

/// Node affinity predicates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AffinityRules {
    /// Labels a node must carry.
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,
    /// Expression requirements a node's labels must satisfy.
    #[serde(default)]
    pub node_selector: LabelSelector,
    /// Label key whose presence marks a data-locality target; nodes carrying
    /// it score higher but are not required.
    #[serde(default)]
    pub co_locate_label: Option<String>,
}

/// One scaling signal with its target and averaging window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingMetricSpec {
    /// Signal name.
    pub signal: Signal,
    /// Target in the signal's unit, e.g. `"100"` or `"500ms"`.
    pub target: String,
    /// Averaging window.
    pub window_secs: u64,
}

/// How multiple signal ratios combine into one governing ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingStrategy {
    /// Most demanding signal governs.
    #[default]
    Max,
    /// Mean of the ratios governs.
    Average,
    /// Least demanding signal governs.
    Min,
}

/// Rate limits and smoothing for one scaling direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalePolicy {
    /// Window over which recommendations are smoothed.
    pub stabilization_window_secs: u64,
    /// Maximum absolute replica change per action.
    #[serde(default)]
    pub max_change_absolute: Option<u32>,
    /// Maximum percent replica change per action, against current size.
    #[serde(default)]
    pub max_change_percent: Option<u32>,
}

impl ScalePolicy {
    fn up_default() -> Self {
        Self {
            stabilization_window_secs: 0,
            max_change_absolute: None,
            max_change_percent: None,
        }
    }

    fn down_default() -> Self {
        Self {
            stabilization_window_secs: 300,
            max_change_absolute: None,
            max_change_percent: None,
        }
    }
}

/// Scaling behavior of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingBehavior {
    /// Ratio combination strategy.
    #[serde(default)]
    pub strategy: ScalingStrategy,
    /// Scale-up limits.
    #[serde(default = "ScalePolicy::up_default")]
    pub scale_up: ScalePolicy,
    /// Scale-down limits.
    #[serde(default = "ScalePolicy::down_default")]
    pub scale_down: ScalePolicy,
    /// No scaling action fires within this period of the last one, in
    /// either direction.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_cooldown() -> u64 {
    60
}

impl Default for ScalingBehavior {
    fn default() -> Self {
        Self {
            strategy: ScalingStrategy::Max,
            scale_up: ScalePolicy::up_default(),
            scale_down: ScalePolicy::down_default(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// Cost preferences for a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostProfile {
    /// Prefer preemptible capacity when SLO headroom permits.
    #[serde(default)]
    pub prefer_spot: bool,
    /// Minimum TTFT headroom below the SLO before spot is refused.
    #[serde(default = "default_headroom")]
    pub slo_headroom_ms: u64,
}

fn default_headroom() -> u64 {
    200
}

impl Default for CostProfile {
    fn default() -> Self {
        Self {
            prefer_spot: false,
            slo_headroom_ms: default_headroom(),
        }
    }
}

/// A homogeneous replica pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Record identifier.
    pub id: PoolId,
    /// Agent class every replica serves.
    pub agent_class_ref: AgentClassId,
    /// Lower bound on pool size.
    pub min_replicas: u32,
    /// Upper bound on pool size.
    pub max_replicas: u32,
    /// Fraction of current size kept warm, in [0, 1].
    #[serde(default)]
    pub prewarm_fraction: f64,
    /// Optional pool-wide throughput budget.
    #[serde(default)]
    pub tokens_per_second_budget: Option<f64>,
    /// MIG profile each replica occupies, if the pool runs on partitions.
    #[serde(default)]
    pub mig_profile: Option<MigProfile>,
    /// GPU requirements per replica.
    pub gpu: GpuRequirements,
    /// Node affinity predicates.
    #[serde(default)]
    pub affinity: AffinityRules,
    /// Header or body field carrying the session key. Defaults to the
    /// router's configured header when unset.
    #[serde(default)]
    pub session_affinity_key: Option<String>,
    /// Signals that drive autoscaling.
    #[serde(default)]
    pub scaling_metrics: Vec<ScalingMetricSpec>,
    /// Scaling behavior limits.
    #[serde(default)]
    pub behavior: ScalingBehavior,
    /// Cost preferences.
    #[serde(default)]
    pub cost: CostProfile,
    /// Priority against other pools when preemption is enabled.
    #[serde(default)]
    pub scheduling_priority: i32,
    /// Warm preparations enqueued per replenishment round.
    #[serde(default = "default_replenish_batch")]
    pub replenish_batch_size: u32,
    /// Session binding TTL.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Concurrent session capacity estimate per replica.
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_replica: u32,
    /// Bumped by the store on every spec change.
    #[serde(default)]
    pub generation: u64,
}

fn default_replenish_batch() -> u32 {
    2
}

fn default_session_ttl() -> u64 {
    900
}

fn default_max_sessions() -> u32 {
    8
}

impl PoolSpec {
    /// Nodes the cache manager preloads for this pool:
    /// `max(min_replicas, ceil(prewarm_fraction * max_replicas))`.
    pub fn preload_node_count(&self) -> u32 {
        let prewarm = (self.prewarm_fraction * self.max_replicas as f64).ceil() as u32;
        self.min_replicas.max(prewarm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preload_count_takes_the_larger_bound() {
        let mut spec: PoolSpec = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "agent_class_ref": "ac1",
            "min_replicas": 3,
            "max_replicas": 20,
            "prewarm_fraction": 0.2,
            "gpu": {"count": 1, "memory_bytes": 1, "topology_class": "any"},
        }))
        .unwrap();
        assert_eq!(spec.preload_node_count(), 4);
        spec.prewarm_fraction = 0.05;
        assert_eq!(spec.preload_node_count(), 3);
    }

    #[test]
    fn defaults_applied_on_deserialization() {
        let spec: PoolSpec = serde_json::from_value(serde_json::json!({
            "id": "p1",
            "agent_class_ref": "ac1",
            "min_replicas": 0,
            "max_replicas": 2,
            "gpu": {"count": 1, "memory_bytes": 1, "topology_class": "any"},
        }))
        .unwrap();
        assert_eq!(spec.behavior.strategy, ScalingStrategy::Max);
        assert_eq!(spec.behavior.scale_down.stabilization_window_secs, 300);
        assert_eq!(spec.replenish_batch_size, 2);
        assert!(!spec.cost.prefer_spot);
    }
}
