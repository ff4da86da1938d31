//! Admission validation of user-authored records.
//!
//! Enum bounds are enforced by the type system at deserialization; the
//! checks here cover the numeric invariants. Violations are terminal.

use crate::agent_class::AgentClassSpec;
use crate::error::{ControlError, Result};
use crate::model::ModelSpec;
use crate::pool::PoolSpec;
use crate::tool_binding::ToolBindingSpec;

/// Validate a model spec.
pub fn validate_model(spec: &ModelSpec) -> Result<()> {
    if spec.id.as_str().is_empty() {
        return Err(ControlError::Validation("model id must not be empty".into()));
    }
    if spec.uri.is_empty() {
        return Err(ControlError::Validation(format!(
            "model {}: uri must not be empty",
            spec.id
        )));
    }
    if spec.shard_count < 1 {
        return Err(ControlError::Validation(format!(
            "model {}: shard_count must be at least 1",
            spec.id
        )));
    }
    if spec.size_bytes == 0 {
        return Err(ControlError::Validation(format!(
            "model {}: size_bytes must be positive",
            spec.id
        )));
    }
    Ok(())
}

/// Validate an agent class spec.
pub fn validate_agent_class(spec: &AgentClassSpec) -> Result<()> {
    if spec.id.as_str().is_empty() {
        return Err(ControlError::Validation(
            "agent class id must not be empty".into(),
        ));
    }
    if spec.max_context_tokens == 0 {
        return Err(ControlError::Validation(format!(
            "agent class {}: max_context_tokens must be positive",
            spec.id
        )));
    }
    if spec.slo.ttft_ms == 0 || spec.slo.p95_latency_ms == 0 {
        return Err(ControlError::Validation(format!(
            "agent class {}: SLO latencies must be positive",
            spec.id
        )));
    }
    Ok(())
}

/// Validate a pool spec.
pub fn validate_pool(spec: &PoolSpec) -> Result<()> {
    if spec.id.as_str().is_empty() {
        return Err(ControlError::Validation("pool id must not be empty".into()));
    }
    if spec.min_replicas > spec.max_replicas {
        return Err(ControlError::Validation(format!(
            "pool {}: min_replicas {} exceeds max_replicas {}",
            spec.id, spec.min_replicas, spec.max_replicas
        )));
    }
    if !(0.0..=1.0).contains(&spec.prewarm_fraction) {
        return Err(ControlError::Validation(format!(
            "pool {}: prewarm_fraction {} outside [0, 1]",
            spec.id, spec.prewarm_fraction
        )));
    }
    if spec.mig_profile.is_none() && spec.gpu.count == 0 {
        return Err(ControlError::Validation(format!(
            "pool {}: gpu count must be positive without a MIG profile",
            spec.id
        )));
    }
    if spec.max_sessions_per_replica == 0 {
        return Err(ControlError::Validation(format!(
            "pool {}: max_sessions_per_replica must be positive",
            spec.id
        )));
    }
    if spec.replenish_batch_size == 0 {
        return Err(ControlError::Validation(format!(
            "pool {}: replenish_batch_size must be positive",
            spec.id
        )));
    }
    spec.affinity.node_selector.validate().map_err(|e| {
        ControlError::Validation(format!("pool {}: {e}", spec.id))
    })?;
    for metric in &spec.scaling_metrics {
        if metric.window_secs == 0 {
            return Err(ControlError::Validation(format!(
                "pool {}: window for {} must be positive",
                spec.id, metric.signal
            )));
        }
        metric.signal.parse_target(&metric.target).map_err(|e| {
            ControlError::Validation(format!("pool {}: {} target: {e}", spec.id, metric.signal))
        })?;
    }
    Ok(())
}

/// Validate a tool binding spec.
pub fn validate_tool_binding(spec: &ToolBindingSpec) -> Result<()> {
    if spec.id.as_str().is_empty() {
        return Err(ControlError::Validation(
            "tool binding id must not be empty".into(),
        ));
    }
    if spec.tool_name.is_empty() {
        return Err(ControlError::Validation(format!(
            "tool binding {}: tool_name must not be empty",
            spec.id
        )));
    }
    if spec.endpoint.is_empty() {
        return Err(ControlError::Validation(format!(
            "tool binding {}: endpoint must not be empty",
            spec.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AgentClassId, ModelId, PoolId};
    use crate::model::{CachePriority, ShardStrategy, TopologyClass};
    use crate::pool::GpuRequirements;

    fn model() -> ModelSpec {
        ModelSpec {
            id: ModelId::from("m1"),
            uri: "s3://weights/m1".to_string(),
            size_bytes: 1 << 30,
            quantization: None,
            shard_count: 1,
            shard_strategy: ShardStrategy::Tensor,
            topology_class: TopologyClass::Any,
            cache_priority: CachePriority::Medium,
            pin_duration_secs: None,
            labels: Default::default(),
            generation: 0,
        }
    }

    fn pool() -> PoolSpec {
        PoolSpec {
            id: PoolId::from("p1"),
            agent_class_ref: AgentClassId::from("ac1"),
            min_replicas: 1,
            max_replicas: 4,
            prewarm_fraction: 0.25,
            tokens_per_second_budget: None,
            mig_profile: None,
            gpu: GpuRequirements {
                count: 1,
                gpu_type: None,
                memory_bytes: 1 << 30,
                topology_class: TopologyClass::Any,
            },
            affinity: Default::default(),
            session_affinity_key: None,
            scaling_metrics: vec![],
            behavior: Default::default(),
            cost: Default::default(),
            scheduling_priority: 0,
            replenish_batch_size: 2,
            session_ttl_secs: 900,
            max_sessions_per_replica: 8,
            generation: 0,
        }
    }

    #[test]
    fn valid_specs_pass() {
        validate_model(&model()).unwrap();
        validate_pool(&pool()).unwrap();
    }

    #[test]
    fn min_above_max_rejected() {
        let mut spec = pool();
        spec.min_replicas = 5;
        assert!(validate_pool(&spec).is_err());
    }

    #[test]
    fn prewarm_out_of_range_rejected() {
        let mut spec = pool();
        spec.prewarm_fraction = 1.5;
        assert!(validate_pool(&spec).is_err());
    }

    #[test]
    fn bad_metric_target_rejected() {
        let mut spec = pool();
        spec.scaling_metrics.push(crate::pool::ScalingMetricSpec {
            signal: crate::metric::Signal::TokensQueued,
            target: "lots".to_string(),
            window_secs: 30,
        });
        assert!(validate_pool(&spec).is_err());
    }

    #[test]
    fn zero_shard_count_rejected() {
        let mut spec = model();
        spec.shard_count = 0;
        assert!(validate_model(&spec).is_err());
    }
}
