//! Logging runtime adapter.
//!
//! Development stand-in for the external runtime executor: every lifecycle
//! call is logged and acknowledged with synthetic results, so the control
//! plane can be exercised end to end without GPUs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neuronetes_types::{
    ModelId, NodeBinding, NodeId, PoolSpec, ReplicaEndpoint, ReplicaId, ReplicaRuntime, Result,
};
use tracing::info;

/// The adapter.
#[derive(Debug, Default)]
pub struct LoggingRuntime;

#[async_trait]
impl ReplicaRuntime for LoggingRuntime {
    async fn create_replica(&self, pool: &PoolSpec, binding: &NodeBinding) -> Result<ReplicaId> {
        let id = ReplicaId::generate();
        info!(pool = %pool.id, node = %binding.node, replica = %id, slots = ?binding.gpu_slots, "create-replica");
        Ok(id)
    }

    async fn warm_replica(&self, replica: &ReplicaId) -> Result<()> {
        info!(replica = %replica, "warm-replica");
        Ok(())
    }

    async fn bind_replica(&self, replica: &ReplicaId) -> Result<ReplicaEndpoint> {
        info!(replica = %replica, "bind-replica");
        Ok(ReplicaEndpoint {
            replica: replica.clone(),
            address: format!("dryrun://{replica}"),
        })
    }

    async fn drain_replica(&self, replica: &ReplicaId, deadline: DateTime<Utc>) -> Result<()> {
        info!(replica = %replica, %deadline, "drain-replica");
        Ok(())
    }

    async fn preload_model(&self, node: &NodeId, model: &ModelId) -> Result<()> {
        info!(node = %node, model = %model, "preload-model");
        Ok(())
    }

    async fn evict_model(&self, node: &NodeId, model: &ModelId) -> Result<()> {
        info!(node = %node, model = %model, "evict-model");
        Ok(())
    }
}
