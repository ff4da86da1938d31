//! Per-node model residency records.

use crate::ids::{ModelId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a model's weights on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidencyState {
    /// Load in flight; at most one per (node, model).
    Loading,
    /// Weights resident and usable.
    Ready,
    /// Being removed; not usable.
    Evicting,
}

/// A model cached on a node. Mutable only by the cache manager; the
/// scheduler reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidencyRecord {
    /// Node holding the weights.
    pub node_ref: NodeId,
    /// Cached model.
    pub model_ref: ModelId,
    /// Load/evict state.
    pub state: ResidencyState,
    /// Last time a replica used or the scheduler placed against the entry.
    pub last_used: DateTime<Utc>,
    /// Eviction is blocked until this instant, if set.
    #[serde(default)]
    pub pinned_until: Option<DateTime<Utc>>,
    /// Bytes occupied.
    pub bytes: u64,
}

impl ResidencyRecord {
    /// Whether the pin is still in force at `now`.
    pub fn pinned(&self, now: DateTime<Utc>) -> bool {
        self.pinned_until.map(|until| until > now).unwrap_or(false)
    }
}
