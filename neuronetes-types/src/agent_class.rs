//! Agent serving profiles.

use crate::ids::{AgentClassId, ModelId};
use serde::{Deserialize, Serialize};

/// Service level objectives for an agent class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloSpec {
    /// Time-to-first-token target.
    pub ttft_ms: u64,
    /// Output rate target per request.
    pub tokens_per_second: f64,
    /// End-to-end P95 latency target.
    pub p95_latency_ms: u64,
}

/// Serving profile binding a model to agent-facing limits and SLOs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentClassSpec {
    /// Record identifier.
    pub id: AgentClassId,
    /// Model served by this class.
    pub model_ref: ModelId,
    /// Maximum context window in tokens.
    pub max_context_tokens: u32,
    /// Tools the agent may invoke.
    #[serde(default)]
    pub tool_permissions: Vec<String>,
    /// Guardrail evaluators applied to this class.
    #[serde(default)]
    pub guardrail_ids: Vec<String>,
    /// Latency and throughput objectives.
    pub slo: SloSpec,
    /// Conversation memory backend label.
    #[serde(default)]
    pub memory_backend: Option<String>,
    /// Bumped by the store on every spec change.
    #[serde(default)]
    pub generation: u64,
}
