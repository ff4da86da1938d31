//! Error taxonomy for the control plane.
//!
//! Components return a structured reason: the variant carries the machine
//! tag and human message, `category()` maps it onto the surface taxonomy the
//! controller harness uses to pick a queue action and write Conditions.

use crate::ids::{ModelId, NodeId, PoolId, ReplicaId};
use crate::replica::ReplicaState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Surface error category driving queue actions and Conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    /// Malformed spec; rejected at admission, terminal.
    Validation,
    /// Cannot be satisfied now; retried with backoff.
    Infeasible,
    /// Upstream I/O failure or stale read; retried with backoff.
    Transient,
    /// Observed state changed under us; rerun the reconcile.
    Conflict,
    /// Resource exhaustion; retried like Infeasible, surfaced separately.
    Capacity,
    /// Preemption or cost guard refused; not retried until inputs change.
    Policy,
    /// Programmer invariant violated; the process exits.
    Fatal,
}

/// Errors produced by the control-plane core.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Spec failed admission validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No node passes the placement filter.
    #[error("no feasible node: {0}")]
    NoFeasibleNode(String),

    /// A model load would exceed node cache capacity with nothing evictable.
    #[error("no cache room on node {node} for model {model}")]
    NoCacheRoom {
        /// Node whose cache is full.
        node: NodeId,
        /// Model that could not be loaded.
        model: ModelId,
    },

    /// The runtime executor failed to load weights.
    #[error("load of model {model} failed on node {node}: {reason}")]
    LoadFailed {
        /// Node the load targeted.
        node: NodeId,
        /// Model being loaded.
        model: ModelId,
        /// Executor-reported reason.
        reason: String,
    },

    /// No single node (or group) can host a co-located gang.
    #[error("gang placement infeasible: {0}")]
    GangInfeasible(String),

    /// A reserve found fewer free resources than required.
    #[error("capacity exhausted on node {0}")]
    CapacityExhausted(NodeId),

    /// Every candidate set failed to bind.
    #[error("all {0} placement candidate sets exhausted")]
    AllCandidatesExhausted(usize),

    /// Placement is possible only by preempting the named replica.
    #[error("preemption of replica {victim} on node {node} required")]
    PreemptionRequired {
        /// Node hosting the victim.
        node: NodeId,
        /// Lowest-priority replica that would be preempted.
        victim: ReplicaId,
    },

    /// The node exists but does not accept replicas.
    #[error("node {0} is not ready")]
    NodeNotReady(NodeId),

    /// The node is no longer in the inventory.
    #[error("node {0} is gone")]
    NodeGone(NodeId),

    /// A referenced record does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Record kind name.
        kind: &'static str,
        /// Record identifier.
        id: String,
    },

    /// Someone else edited observed state since we read it.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upstream I/O failure or stale read.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The reconcile budget was exceeded.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A policy gate (preemption, cost guard) refused the action.
    #[error("policy refused: {0}")]
    PolicyRefused(String),

    /// The pool has zero serving replicas.
    #[error("no replica available in pool {0}")]
    NoReplicaAvailable(PoolId),

    /// Attempted backward replica state transition.
    #[error("invalid transition for replica {replica}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Replica the transition targeted.
        replica: ReplicaId,
        /// Current state.
        from: ReplicaState,
        /// Requested state.
        to: ReplicaState,
    },

    /// Record (de)serialization failure; stored records are written by us,
    /// so this is an invariant violation.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Programmer invariant violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Surface category of this error.
    pub fn category(&self) -> Category {
        match self {
            ControlError::Validation(_) => Category::Validation,
            ControlError::NoFeasibleNode(_)
            | ControlError::NoCacheRoom { .. }
            | ControlError::LoadFailed { .. }
            | ControlError::NoReplicaAvailable(_) => Category::Infeasible,
            ControlError::GangInfeasible(_)
            | ControlError::CapacityExhausted(_)
            | ControlError::AllCandidatesExhausted(_) => Category::Capacity,
            ControlError::PreemptionRequired { .. } | ControlError::PolicyRefused(_) => {
                Category::Policy
            }
            ControlError::NodeNotReady(_)
            | ControlError::NodeGone(_)
            | ControlError::NotFound { .. }
            | ControlError::Transient(_)
            | ControlError::DeadlineExceeded
            | ControlError::Cancelled => Category::Transient,
            ControlError::Conflict(_) => Category::Conflict,
            ControlError::InvalidTransition { .. }
            | ControlError::Serialization(_)
            | ControlError::Internal(_) => Category::Fatal,
        }
    }

    /// Stable machine tag for dashboards and Conditions.
    pub fn tag(&self) -> &'static str {
        match self {
            ControlError::Validation(_) => "Validation",
            ControlError::NoFeasibleNode(_) => "NoFeasibleNode",
            ControlError::NoCacheRoom { .. } => "NoCacheRoom",
            ControlError::LoadFailed { .. } => "LoadFailed",
            ControlError::GangInfeasible(_) => "GangInfeasible",
            ControlError::CapacityExhausted(_) => "CapacityExhausted",
            ControlError::AllCandidatesExhausted(_) => "AllCandidatesExhausted",
            ControlError::PreemptionRequired { .. } => "PreemptionRequired",
            ControlError::NodeNotReady(_) => "NodeNotReady",
            ControlError::NodeGone(_) => "NodeGone",
            ControlError::NotFound { .. } => "NotFound",
            ControlError::Conflict(_) => "Conflict",
            ControlError::Transient(_) => "Transient",
            ControlError::DeadlineExceeded => "DeadlineExceeded",
            ControlError::Cancelled => "Cancelled",
            ControlError::PolicyRefused(_) => "PolicyRefused",
            ControlError::NoReplicaAvailable(_) => "NoReplicaAvailable",
            ControlError::InvalidTransition { .. } => "InvalidTransition",
            ControlError::Serialization(_) => "Serialization",
            ControlError::Internal(_) => "Internal",
        }
    }

    /// Whether the harness should requeue with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            Category::Infeasible | Category::Transient | Category::Capacity | Category::Conflict
        )
    }
}
