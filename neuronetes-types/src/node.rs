//! Observed facts about schedulable hosts.

use crate::ids::{ModelId, NodeId, ReplicaId};
use crate::model::TopologyClass;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Interconnect class between a node's GPUs, ordered weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterconnectClass {
    /// PCIe only.
    Pcie,
    /// GPUs share a CPU socket.
    SameSocket,
    /// NVLink-class fabric.
    Nvlink,
}

impl InterconnectClass {
    /// Whether this interconnect satisfies a requested topology class.
    ///
    /// `SameNode` is satisfied by any single node; `FastInterconnect` needs
    /// an NVLink-class fabric.
    pub fn satisfies(self, required: TopologyClass) -> bool {
        match required {
            TopologyClass::Any | TopologyClass::SameNode => true,
            TopologyClass::SameSocket => self >= InterconnectClass::SameSocket,
            TopologyClass::FastInterconnect => self == InterconnectClass::Nvlink,
        }
    }
}

/// Instance durability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityClass {
    /// On-demand / reserved capacity.
    Durable,
    /// Spot capacity that may be reclaimed.
    Preemptible,
}

/// A MIG partition profile, e.g. `1g.10gb`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigProfile(pub String);

impl MigProfile {
    /// Borrow the profile name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MigProfile {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Scheduler-relevant facts about one host, observed from the external
/// inventory. The inventory component owns the mutable assigned-replica and
/// resident-model fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFact {
    /// Node identifier.
    pub id: NodeId,
    /// Node labels for affinity matching.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Number of physical GPUs.
    pub total_gpu_count: u32,
    /// GPU product type, e.g. `h100`.
    pub gpu_type: String,
    /// Memory per GPU.
    pub gpu_memory_bytes: u64,
    /// Interconnect between the node's GPUs.
    pub interconnect: InterconnectClass,
    /// Free MIG slots per profile when the node is empty.
    #[serde(default)]
    pub mig_capacity: BTreeMap<MigProfile, u32>,
    /// Models whose weights are resident on the node.
    #[serde(default)]
    pub resident_models: BTreeSet<ModelId>,
    /// Replicas currently assigned to the node.
    #[serde(default)]
    pub assigned_replicas: BTreeSet<ReplicaId>,
    /// Durability class.
    pub capacity_class: CapacityClass,
    /// Whether the node accepts new replicas.
    pub ready: bool,
    /// Bytes available for cached model weights.
    pub cache_capacity_bytes: u64,
}
