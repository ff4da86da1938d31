//! Model reconciliation: admission, residency status, retirement.

use crate::context::ControlContext;
use neuronetes_types::status::{condition_types, set_condition};
use neuronetes_types::{
    validate, AgentClassSpec, Condition, ConditionStatus, ModelId, ModelPhase, ModelSpec,
    ModelStatus, Result,
};
use tracing::info;

/// Reconcile one model.
pub async fn reconcile_model(ctx: &ControlContext, id: &str) -> Result<()> {
    let model_id = ModelId::from(id);
    let Some(spec) = ctx.store.get::<ModelSpec>(id).await? else {
        // Deleted: evict remaining copies. Referenced or pinned entries
        // refuse and retry on later reconciles of the owning pool.
        for node in ctx.residency.nodes_with_ready(&model_id) {
            let _ = ctx.cache.request_eviction(&node, &model_id);
        }
        return Ok(());
    };
    let now = ctx.clock.now();
    let mut status = ctx
        .store
        .read_status::<ModelStatus>(id)
        .await?
        .unwrap_or_default();
    status.observed_generation = spec.generation;

    if let Err(e) = validate::validate_model(&spec) {
        set_condition(
            &mut status.conditions,
            Condition {
                condition_type: condition_types::ACCEPTED.to_string(),
                status: ConditionStatus::False,
                reason: e.tag().to_string(),
                message: e.to_string(),
                last_transition_time: now,
            },
        );
        ctx.store.write_status(id, &status).await?;
        return Err(e);
    }
    set_condition(
        &mut status.conditions,
        Condition {
            condition_type: condition_types::ACCEPTED.to_string(),
            status: ConditionStatus::True,
            reason: "Validated".to_string(),
            message: String::new(),
            last_transition_time: now,
        },
    );

    let referenced = ctx
        .store
        .list::<AgentClassSpec>()
        .await?
        .iter()
        .any(|ac| ac.model_ref == spec.id);
    let resident = ctx.residency.nodes_with_ready(&spec.id);
    let pinned = resident.iter().any(|node| {
        ctx.residency
            .records(node)
            .iter()
            .any(|r| r.model_ref == spec.id && r.pinned(now))
    });

    status.phase = if referenced || pinned || !resident.is_empty() {
        ModelPhase::Active
    } else {
        ModelPhase::Retired
    };
    if status.phase == ModelPhase::Retired {
        info!(model = %id, "model unreferenced and unpinned; retired");
    }
    status.resident_nodes = resident;
    ctx.store.write_status(id, &status).await?;
    Ok(())
}
