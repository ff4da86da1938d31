//! Shared data model for the NeuroNetes control plane.
//!
//! Every record kind the control plane stores or exchanges lives here, along
//! with the error taxonomy, the injected clock, admission validation, and the
//! `ReplicaRuntime` trait through which the external runtime executor is
//! driven. The core components (`neuronetes-scheduler`,
//! `neuronetes-autoscaler`, `neuronetes-cache`, `neuronetes-router`) all
//! speak in these types; none of them define records of their own.

pub mod agent_class;
pub mod clock;
pub mod error;
pub mod ids;
pub mod metric;
pub mod model;
pub mod node;
pub mod pool;
pub mod replica;
pub mod residency;
pub mod runtime;
pub mod scaling;
pub mod selector;
pub mod session;
pub mod status;
pub mod tool_binding;
pub mod validate;

pub use agent_class::{AgentClassSpec, SloSpec};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Category, ControlError, Result};
pub use ids::{
    AgentClassId, ModelId, NodeId, PoolId, ReplicaId, SessionKey, ToolBindingId,
};
pub use metric::{MetricSample, MetricValue, Signal, SignalUnit};
pub use model::{CachePriority, ModelSpec, ShardStrategy, TopologyClass};
pub use node::{CapacityClass, InterconnectClass, MigProfile, NodeFact};
pub use pool::{
    AffinityRules, CostProfile, GpuRequirements, PoolSpec, ScalePolicy, ScalingBehavior,
    ScalingMetricSpec, ScalingStrategy,
};
pub use replica::{Replica, ReplicaState};
pub use residency::{ResidencyRecord, ResidencyState};
pub use runtime::{NodeBinding, ReplicaEndpoint, ReplicaRuntime};
pub use scaling::{CapacityHint, ScalingDecision};
pub use selector::{LabelSelector, SelectorOperator, SelectorRequirement};
pub use session::SessionBinding;
pub use status::{
    AdmissionPhase, AgentClassStatus, Condition, ConditionStatus, ModelPhase, ModelStatus,
    PoolPhase, PoolStatus, ToolBindingStatus,
};
pub use tool_binding::ToolBindingSpec;
