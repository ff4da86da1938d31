//! Record kinds and the traits stored objects implement.

use neuronetes_types::{
    AgentClassSpec, AgentClassStatus, ModelSpec, ModelStatus, PoolSpec, PoolStatus,
    ToolBindingSpec, ToolBindingStatus,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// The record kinds the store serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Declared weights artifacts.
    Model,
    /// Agent serving profiles.
    AgentClass,
    /// Replica pools.
    Pool,
    /// Tool bindings.
    ToolBinding,
}

impl Kind {
    /// All kinds, in reconcile dependency order.
    pub const ALL: [Kind; 4] = [Kind::Model, Kind::AgentClass, Kind::ToolBinding, Kind::Pool];
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Model => "model",
            Kind::AgentClass => "agentclass",
            Kind::Pool => "pool",
            Kind::ToolBinding => "toolbinding",
        };
        f.write_str(name)
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "model" | "models" => Ok(Kind::Model),
            "agentclass" | "agentclasses" | "agent-class" => Ok(Kind::AgentClass),
            "pool" | "pools" => Ok(Kind::Pool),
            "toolbinding" | "toolbindings" | "tool-binding" => Ok(Kind::ToolBinding),
            other => Err(format!("unknown record kind: {other:?}")),
        }
    }
}

/// A user-authored spec record.
pub trait Object:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
    /// Kind of the record.
    const KIND: Kind;

    /// Record identifier.
    fn object_id(&self) -> &str;

    /// Stored generation.
    fn generation(&self) -> u64;

    /// Overwrite the generation; used by the store when bumping.
    fn set_generation(&mut self, generation: u64);
}

/// A status sub-record attached to a spec.
pub trait StatusRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind of the spec the status belongs to.
    const KIND: Kind;

    /// Spec generation this status reflects.
    fn observed_generation(&self) -> u64;
}

macro_rules! impl_object {
    ($spec:ty, $kind:expr) => {
        impl Object for $spec {
            const KIND: Kind = $kind;

            fn object_id(&self) -> &str {
                self.id.as_str()
            }

            fn generation(&self) -> u64 {
                self.generation
            }

            fn set_generation(&mut self, generation: u64) {
                self.generation = generation;
            }
        }
    };
}

impl_object!(ModelSpec, Kind::Model);
impl_object!(AgentClassSpec, Kind::AgentClass);
impl_object!(PoolSpec, Kind::Pool);
impl_object!(ToolBindingSpec, Kind::ToolBinding);

macro_rules! impl_status {
    ($status:ty, $kind:expr) => {
        impl StatusRecord for $status {
            const KIND: Kind = $kind;

            fn observed_generation(&self) -> u64 {
                self.observed_generation
            }
        }
    };
}

impl_status!(ModelStatus, Kind::Model);
impl_status!(AgentClassStatus, Kind::AgentClass);
impl_status!(PoolStatus, Kind::Pool);
impl_status!(ToolBindingStatus, Kind::ToolBinding);
