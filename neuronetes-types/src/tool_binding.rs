//! Tool bindings attached to agent classes.

use crate::ids::{AgentClassId, ToolBindingId};
use serde::{Deserialize, Serialize};

/// Binds a named tool endpoint to an agent class. Stored and validated by
/// the control plane; invocation happens in the data plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBindingSpec {
    /// Record identifier.
    pub id: ToolBindingId,
    /// Agent class the tool is exposed to.
    pub agent_class_ref: AgentClassId,
    /// Tool name as the agent invokes it.
    pub tool_name: String,
    /// Endpoint the tool is served from.
    pub endpoint: String,
    /// Permission scopes granted to the tool.
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Bumped by the store on every spec change.
    #[serde(default)]
    pub generation: u64,
}
