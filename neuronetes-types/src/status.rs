//! Status sub-records and Conditions.

use crate::ids::NodeId;
use crate::metric::MetricSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// Not yet known.
    Unknown,
}

/// One observed condition on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type, e.g. `Progressing`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Truth value.
    pub status: ConditionStatus,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// When `status` last changed.
    pub last_transition_time: DateTime<Utc>,
}

/// Well-known condition types.
pub mod condition_types {
    /// The record's desired state is being worked toward.
    pub const PROGRESSING: &str = "Progressing";
    /// The record is impaired (e.g. no metrics).
    pub const DEGRADED: &str = "Degraded";
    /// The record passed admission.
    pub const ACCEPTED: &str = "Accepted";
}

/// Upsert `cond` into `conditions`, preserving the transition time when the
/// truth value did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut cond: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == cond.condition_type)
    {
        if existing.status == cond.status {
            cond.last_transition_time = existing.last_transition_time;
        }
        *existing = cond;
    } else {
        conditions.push(cond);
    }
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Pool lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PoolPhase {
    /// Not yet reconciled.
    #[default]
    Pending,
    /// Pool is serving within bounds.
    Active,
    /// Pool is impaired.
    Degraded,
    /// Pool is being deleted; replicas draining.
    Terminating,
}

/// Model lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelPhase {
    /// Not yet reconciled.
    #[default]
    Pending,
    /// Referenced or pinned.
    Active,
    /// No references and no pin; terminal.
    Retired,
}

/// Admission phase for records that only pass validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdmissionPhase {
    /// Not yet reconciled.
    #[default]
    Pending,
    /// Validation passed.
    Accepted,
    /// Validation failed; terminal.
    Rejected,
}

/// Observed status of a pool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Lifecycle phase.
    pub phase: PoolPhase,
    /// Spec generation this status reflects.
    pub observed_generation: u64,
    /// Observed conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Replicas counting toward pool size (Warm, Binding, Serving).
    pub replicas: u32,
    /// Serving replicas.
    pub ready_replicas: u32,
    /// Warm replicas.
    pub warm_replicas: u32,
    /// Latest signal samples.
    #[serde(default)]
    pub current_metrics: Vec<MetricSample>,
    /// Last scaling action in either direction.
    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,
    /// Last scale-up action.
    #[serde(default)]
    pub last_scale_up: Option<DateTime<Utc>>,
    /// Last scale-down action.
    #[serde(default)]
    pub last_scale_down: Option<DateTime<Utc>>,
    /// Since when every configured signal has been stale.
    #[serde(default)]
    pub metrics_stale_since: Option<DateTime<Utc>>,
}

/// Observed status of a model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Lifecycle phase.
    pub phase: ModelPhase,
    /// Spec generation this status reflects.
    pub observed_generation: u64,
    /// Observed conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Nodes where the model is Ready.
    #[serde(default)]
    pub resident_nodes: Vec<NodeId>,
}

/// Observed status of an agent class.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentClassStatus {
    /// Admission phase.
    pub phase: AdmissionPhase,
    /// Spec generation this status reflects.
    pub observed_generation: u64,
    /// Observed conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Observed status of a tool binding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolBindingStatus {
    /// Admission phase.
    pub phase: AdmissionPhase,
    /// Spec generation this status reflects.
    pub observed_generation: u64,
    /// Observed conditions.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
