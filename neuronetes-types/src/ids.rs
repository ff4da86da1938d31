//! Identifier newtypes.
//!
//! Every cross-entity reference in the data model is an explicit foreign key
//! carried by one of these newtypes; no component hands out references into
//! another component's graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the underlying identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a declared weights artifact.
    ModelId
);
string_id!(
    /// Identifier of an agent serving profile.
    AgentClassId
);
string_id!(
    /// Identifier of a replica pool.
    PoolId
);
string_id!(
    /// Identifier of a tool binding.
    ToolBindingId
);
string_id!(
    /// Identifier of a schedulable host.
    NodeId
);
string_id!(
    /// Identifier of a running or warm replica.
    ReplicaId
);
string_id!(
    /// Externally supplied conversation key.
    SessionKey
);

impl ReplicaId {
    /// Generate a fresh replica id, used for reservation tokens before the
    /// runtime executor has assigned the authoritative id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}
