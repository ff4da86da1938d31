//! Autoscaler output.

use crate::ids::PoolId;
use crate::metric::Signal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capacity-class constraint handed from the autoscaler to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityHint {
    /// Any capacity class is acceptable.
    #[default]
    Any,
    /// SLO headroom is thin; only durable capacity may be added.
    Durable,
}

/// One scaling decision, emitted per reconcile and consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    /// Pool being resized.
    pub pool_ref: PoolId,
    /// Size when the decision was computed.
    pub current: u32,
    /// Target size after limits and clamping.
    pub desired: u32,
    /// Signal that governed the decision, if any.
    pub primary_signal: Option<Signal>,
    /// Governing current/target ratio.
    pub ratio: f64,
    /// Human-readable explanation.
    pub reason: String,
    /// Capacity constraint for new placements.
    pub capacity_hint: CapacityHint,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
}

impl ScalingDecision {
    /// Replicas to add; zero when scaling down.
    pub fn scale_up_by(&self) -> u32 {
        self.desired.saturating_sub(self.current)
    }

    /// Replicas to remove; zero when scaling up.
    pub fn scale_down_by(&self) -> u32 {
        self.current.saturating_sub(self.desired)
    }
}
