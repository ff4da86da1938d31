//! Declared model weights artifacts.

use crate::ids::ModelId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a model's weights are split across GPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardStrategy {
    /// Tensor-parallel sharding.
    Tensor,
    /// Pipeline-parallel sharding.
    Pipeline,
    /// Data-parallel replication.
    Data,
}

/// Locality a model's shards demand from the GPUs they land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyClass {
    /// No locality requirement.
    Any,
    /// All shards on GPUs sharing a socket.
    SameSocket,
    /// All shards on one node.
    SameNode,
    /// All shards on GPUs sharing a fast interconnect.
    FastInterconnect,
}

impl TopologyClass {
    /// Whether a multi-replica placement must land on a single node.
    pub fn requires_co_location(self) -> bool {
        !matches!(self, TopologyClass::Any)
    }
}

/// Eviction priority of cached weights. Ordered ascending so the minimum is
/// the first eviction candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePriority {
    /// Evicted first.
    Low,
    /// Default tier.
    Medium,
    /// Kept warm where possible.
    High,
    /// Never evicted while any replica references the model.
    Critical,
}

/// A declared weights artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Record identifier.
    pub id: ModelId,
    /// Artifact location.
    pub uri: String,
    /// Size of the weights on disk.
    pub size_bytes: u64,
    /// Quantization label, if any.
    #[serde(default)]
    pub quantization: Option<String>,
    /// Number of shards; at least 1.
    pub shard_count: u32,
    /// Sharding strategy.
    pub shard_strategy: ShardStrategy,
    /// Locality required between shards.
    pub topology_class: TopologyClass,
    /// Cache eviction tier.
    pub cache_priority: CachePriority,
    /// Residency pin: loads of this model stay resident this long.
    #[serde(default)]
    pub pin_duration_secs: Option<u64>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Bumped by the store on every spec change.
    #[serde(default)]
    pub generation: u64,
}
