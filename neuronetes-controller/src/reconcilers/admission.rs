//! Admission-only reconcilers for agent classes and tool bindings.

use crate::context::ControlContext;
use neuronetes_types::status::{condition_types, set_condition};
use neuronetes_types::{
    validate, AdmissionPhase, AgentClassSpec, AgentClassStatus, Condition, ConditionStatus,
    ControlError, ModelSpec, Result, ToolBindingSpec, ToolBindingStatus,
};

fn accepted(now: chrono::DateTime<chrono::Utc>) -> Condition {
    Condition {
        condition_type: condition_types::ACCEPTED.to_string(),
        status: ConditionStatus::True,
        reason: "Validated".to_string(),
        message: String::new(),
        last_transition_time: now,
    }
}

fn rejected(now: chrono::DateTime<chrono::Utc>, reason: &str, message: String) -> Condition {
    Condition {
        condition_type: condition_types::ACCEPTED.to_string(),
        status: ConditionStatus::False,
        reason: reason.to_string(),
        message,
        last_transition_time: now,
    }
}

/// Reconcile one agent class: validate and check its model reference.
pub async fn reconcile_agent_class(ctx: &ControlContext, id: &str) -> Result<()> {
    let Some(spec) = ctx.store.get::<AgentClassSpec>(id).await? else {
        return Ok(());
    };
    let now = ctx.clock.now();
    let mut status = ctx
        .store
        .read_status::<AgentClassStatus>(id)
        .await?
        .unwrap_or_default();
    status.observed_generation = spec.generation;

    if let Err(e) = validate::validate_agent_class(&spec) {
        status.phase = AdmissionPhase::Rejected;
        set_condition(&mut status.conditions, rejected(now, e.tag(), e.to_string()));
        ctx.store.write_status(id, &status).await?;
        return Err(e);
    }

    if ctx
        .store
        .get::<ModelSpec>(spec.model_ref.as_str())
        .await?
        .is_none()
    {
        status.phase = AdmissionPhase::Pending;
        set_condition(
            &mut status.conditions,
            rejected(
                now,
                "MissingModel",
                format!("model {} does not exist", spec.model_ref),
            ),
        );
        ctx.store.write_status(id, &status).await?;
        return Err(ControlError::NotFound {
            kind: "model",
            id: spec.model_ref.to_string(),
        });
    }

    status.phase = AdmissionPhase::Accepted;
    set_condition(&mut status.conditions, accepted(now));
    ctx.store.write_status(id, &status).await?;
    Ok(())
}

/// Reconcile one tool binding: validate and check its agent class.
pub async fn reconcile_tool_binding(ctx: &ControlContext, id: &str) -> Result<()> {
    let Some(spec) = ctx.store.get::<ToolBindingSpec>(id).await? else {
        return Ok(());
    };
    let now = ctx.clock.now();
    let mut status = ctx
        .store
        .read_status::<ToolBindingStatus>(id)
        .await?
        .unwrap_or_default();
    status.observed_generation = spec.generation;

    if let Err(e) = validate::validate_tool_binding(&spec) {
        status.phase = AdmissionPhase::Rejected;
        set_condition(&mut status.conditions, rejected(now, e.tag(), e.to_string()));
        ctx.store.write_status(id, &status).await?;
        return Err(e);
    }

    if ctx
        .store
        .get::<AgentClassSpec>(spec.agent_class_ref.as_str())
        .await?
        .is_none()
    {
        status.phase = AdmissionPhase::Pending;
        set_condition(
            &mut status.conditions,
            rejected(
                now,
                "MissingAgentClass",
                format!("agent class {} does not exist", spec.agent_class_ref),
            ),
        );
        ctx.store.write_status(id, &status).await?;
        return Err(ControlError::NotFound {
            kind: "agentclass",
            id: spec.agent_class_ref.to_string(),
        });
    }

    status.phase = AdmissionPhase::Accepted;
    set_condition(&mut status.conditions, accepted(now));
    ctx.store.write_status(id, &status).await?;
    Ok(())
}
