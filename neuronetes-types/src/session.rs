//! Session affinity bindings.

use crate::ids::{PoolId, ReplicaId, SessionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maps an externally supplied conversation key to a replica. Bindings
/// reference replicas weakly: on replica departure the binding is dropped,
/// never the replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBinding {
    /// Conversation key.
    pub session_key: SessionKey,
    /// Currently bound replica.
    pub replica_ref: ReplicaId,
    /// Pool the session belongs to.
    pub pool_ref: PoolId,
    /// Last routed request.
    pub last_use: DateTime<Utc>,
    /// Binding expires at this instant unless extended by use.
    pub ttl_deadline: DateTime<Utc>,
    /// Replicas this session was previously bound to. Rebinds never select
    /// one of these, keeping the rebind sequence free of repeats.
    #[serde(default)]
    pub previous: Vec<ReplicaId>,
}

impl SessionBinding {
    /// Whether the binding has expired at `now`.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_deadline
    }

    /// Whether `replica` was ever bound to this session.
    pub fn has_seen(&self, replica: &ReplicaId) -> bool {
        self.replica_ref == *replica || self.previous.contains(replica)
    }
}
