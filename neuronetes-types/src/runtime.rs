//! Interface to the external runtime executor.
//!
//! The executor creates and destroys replica processes, loads weights and
//! serves tokens; the control plane only tells it what to do and observes
//! the results.

use crate::error::Result;
use crate::ids::{ModelId, NodeId, ReplicaId};
use crate::node::MigProfile;
use crate::pool::PoolSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One placement the scheduler committed: a node plus the concrete slots
/// reserved on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBinding {
    /// Target node.
    pub node: NodeId,
    /// Full-GPU slot indices reserved.
    pub gpu_slots: Vec<u32>,
    /// MIG slot reserved, if the pool uses MIG.
    pub mig_slot: Option<MigProfile>,
}

/// Routable address of a Serving replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaEndpoint {
    /// Replica the endpoint belongs to.
    pub replica: ReplicaId,
    /// Data-plane address.
    pub address: String,
}

/// Replica lifecycle API implemented by the runtime executor.
#[async_trait]
pub trait ReplicaRuntime: Send + Sync {
    /// Create a replica process on the bound node. Returns the authoritative
    /// replica id.
    async fn create_replica(&self, pool: &PoolSpec, binding: &NodeBinding) -> Result<ReplicaId>;

    /// Initialize the replica to Warm (process started, weights resident).
    async fn warm_replica(&self, replica: &ReplicaId) -> Result<()>;

    /// Wire the replica into serving. Returns its routable endpoint.
    async fn bind_replica(&self, replica: &ReplicaId) -> Result<ReplicaEndpoint>;

    /// Begin draining; the replica terminates once its sessions complete or
    /// the deadline passes.
    async fn drain_replica(&self, replica: &ReplicaId, deadline: DateTime<Utc>) -> Result<()>;

    /// Load a model's weights onto a node's cache.
    async fn preload_model(&self, node: &NodeId, model: &ModelId) -> Result<()>;

    /// Remove a model's weights from a node's cache.
    async fn evict_model(&self, node: &NodeId, model: &ModelId) -> Result<()>;
}
