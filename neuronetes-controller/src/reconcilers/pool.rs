//! Pool reconciliation: autoscaling, scale delegation and status.

use crate::context::ControlContext;
use neuronetes_autoscaler::{plan_scale_up, select_scale_down_victims, ReplicaView};
use neuronetes_cache::{desired_warm, replenish_quota, WarmReplica};
use neuronetes_scheduler::{PlacementRequest, PreemptionCandidate, ScheduledReplica};
use neuronetes_types::status::{condition_types, set_condition};
use neuronetes_types::{
    validate, AgentClassSpec, CachePriority, CapacityClass, CapacityHint, Condition,
    ConditionStatus, ControlError, ModelSpec, PoolId, PoolPhase, PoolSpec, PoolStatus, Replica,
    ReplicaId, ReplicaState, Result, ScalingDecision,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Reconcile one pool.
pub async fn reconcile_pool(ctx: &ControlContext, id: &str) -> Result<()> {
    let pool_id = PoolId::from(id);
    let Some(spec) = ctx.store.get::<PoolSpec>(id).await? else {
        return teardown(ctx, &pool_id).await;
    };
    let now = ctx.clock.now();
    let mut status = ctx
        .store
        .read_status::<PoolStatus>(id)
        .await?
        .unwrap_or_default();

    if let Err(e) = validate::validate_pool(&spec) {
        status.observed_generation = spec.generation;
        status.phase = PoolPhase::Pending;
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

    let Some(agent_class) = ctx
        .store
        .get::<AgentClassSpec>(spec.agent_class_ref.as_str())
        .await?
    else {
        return blocked(ctx, id, &spec, status, "MissingAgentClass", now).await;
    };
    let Some(model) = ctx
        .store
        .get::<ModelSpec>(agent_class.model_ref.as_str())
        .await?
    else {
        return blocked(ctx, id, &spec, status, "MissingModel", now).await;
    };

    ctx.router.configure_pool(&spec);
    if let Err(e) = ctx.cache.preload_for_pool(&spec, &model) {
        // Preload is best effort; placement itself will surface a harder
        // infeasibility.
        debug!(pool = %id, error = %e, "preload pass incomplete");
    }

    let retired = ctx.router.sweep();
    if retired > 0 {
        ctx.telemetry
            .sessions_retired
            .with_label_values(&[id])
            .inc_by(retired as u64);
    }

    let obs = ctx.tracker.observe_pool(&pool_id);
    let outcome = ctx
        .evaluator
        .evaluate(&spec, Some(&agent_class.slo), &obs, &status)
        .await?;

    // Metric outage bookkeeping: hold current size, degrade after grace.
    if outcome.all_stale {
        let since = *status.metrics_stale_since.get_or_insert(now);
        if (now - since).num_seconds() >= ctx.config.metrics_grace_secs as i64 {
            status.phase = PoolPhase::Degraded;
            set_condition(
                &mut status.conditions,
                Condition {
                    condition_type: condition_types::DEGRADED.to_string(),
                    status: ConditionStatus::True,
                    reason: "NoMetrics".to_string(),
                    message: "every configured scaling signal is stale".to_string(),
                    last_transition_time: now,
                },
            );
        }
    } else {
        status.metrics_stale_since = None;
        status.phase = PoolPhase::Active;
        set_condition(
            &mut status.conditions,
            Condition {
                condition_type: condition_types::DEGRADED.to_string(),
                status: ConditionStatus::False,
                reason: "MetricsAvailable".to_string(),
                message: String::new(),
                last_transition_time: now,
            },
        );
    }

    let mut pending_error: Option<ControlError> = None;
    if let Some(decision) = &outcome.decision {
        let direction = if decision.desired > decision.current {
            "up"
        } else {
            "down"
        };
        ctx.telemetry
            .scaling_decisions
            .with_label_values(&[id, direction])
            .inc();
        if decision.desired > decision.current {
            let (added, err) = scale_up(ctx, &spec, &model, decision).await;
            if added > 0 {
                status.last_scale_up = Some(now);
                status.last_scale_time = Some(now);
            }
            pending_error = err;
        } else {
            let drained = scale_down(ctx, &spec, decision).await?;
            if drained > 0 {
                status.last_scale_down = Some(now);
                status.last_scale_time = Some(now);
            }
        }
    } else {
        // Warm-pool replenishment runs only on quiet ticks so a reconcile
        // produces at most one scaling side effect.
        if let Err(e) = replenish(ctx, &spec, &model, &obs).await {
            debug!(pool = %id, error = %e, "warm replenishment deferred");
        }
    }

    let obs = ctx.tracker.observe_pool(&pool_id);
    status.replicas = obs.current;
    status.ready_replicas = obs.serving;
    status.warm_replicas = obs.warm;
    status.current_metrics = outcome.samples;
    status.observed_generation = spec.generation;
    set_condition(
        &mut status.conditions,
        Condition {
            condition_type: condition_types::PROGRESSING.to_string(),
            status: if pending_error.is_some() {
                ConditionStatus::False
            } else {
                ConditionStatus::True
            },
            reason: pending_error
                .as_ref()
                .map(|e| e.tag().to_string())
                .unwrap_or_else(|| "Reconciled".to_string()),
            message: pending_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default(),
            last_transition_time: now,
        },
    );
    ctx.store.write_status(id, &status).await?;

    for (state, value) in [
        ("current", obs.current),
        ("serving", obs.serving),
        ("warm", obs.warm),
    ] {
        ctx.telemetry
            .pool_replicas
            .with_label_values(&[id, state])
            .set(value as i64);
    }

    match pending_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// The pool's dependencies are missing; record why and retry.
async fn blocked(
    ctx: &ControlContext,
    id: &str,
    spec: &PoolSpec,
    mut status: PoolStatus,
    reason: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    status.observed_generation = spec.generation;
    status.phase = PoolPhase::Pending;
    set_condition(
        &mut status.conditions,
        Condition {
            condition_type: condition_types::PROGRESSING.to_string(),
            status: ConditionStatus::False,
            reason: reason.to_string(),
            message: format!("pool {id} is waiting for its references"),
            last_transition_time: now,
        },
    );
    ctx.store.write_status(id, &status).await?;
    Err(ControlError::NotFound {
        kind: "reference",
        id: reason.to_string(),
    })
}

/// Scale up: warm activations first, then scheduler placements (whose
/// cache-presence weight prefers preloaded nodes, leaving cold starts
/// last). Returns how many replicas were added plus the error that stopped
/// the rest, if any; the retained decision re-fires next tick.
async fn scale_up(
    ctx: &ControlContext,
    spec: &PoolSpec,
    model: &ModelSpec,
    decision: &ScalingDecision,
) -> (u32, Option<ControlError>) {
    let need = decision.scale_up_by();
    let plan = plan_scale_up(&ctx.warm, &spec.id, need);
    info!(
        pool = %spec.id,
        need,
        warm = plan.activate.len(),
        cold = plan.cold,
        "scale-up delegation"
    );

    let mut added = 0;
    for warm in &plan.activate {
        match activate_warm(ctx, spec, warm).await {
            Ok(()) => added += 1,
            Err(e) => {
                warn!(pool = %spec.id, replica = %warm.replica, error = %e, "warm activation failed");
                ctx.on_replica_terminated(&warm.replica);
                return (added, Some(e));
            }
        }
    }

    if plan.cold > 0 {
        let preemptibles = preemption_candidates(ctx, &spec.id).await;
        let request = PlacementRequest {
            pool: spec,
            model,
            count: plan.cold,
            hint: decision.capacity_hint,
        };
        match ctx.scheduler.schedule(&request, &preemptibles) {
            Ok(placements) => {
                for placement in placements {
                    match bring_up_cold(ctx, spec, model, placement, true).await {
                        Ok(_) => added += 1,
                        Err(e) => return (added, Some(e)),
                    }
                }
            }
            Err(e) => return (added, Some(e)),
        }
    }
    (added, None)
}

/// Activate one warm replica: Warm -> Binding -> Serving. Pure router
/// wiring; no weight loads on this path.
async fn activate_warm(ctx: &ControlContext, spec: &PoolSpec, warm: &WarmReplica) -> Result<()> {
    ctx.tracker.advance(&warm.replica, ReplicaState::Binding)?;
    let endpoint = ctx.runtime.bind_replica(&warm.replica).await?;
    ctx.tracker.advance(&warm.replica, ReplicaState::Serving)?;
    ctx.router
        .upsert_replica(&spec.id, &warm.replica, endpoint.address);
    debug!(pool = %spec.id, replica = %warm.replica, "warm replica activated");
    Ok(())
}

/// Create, warm and (optionally) bind one cold replica on its committed
/// placement. Rolls the reservation back when creation fails.
async fn bring_up_cold(
    ctx: &ControlContext,
    spec: &PoolSpec,
    model: &ModelSpec,
    placement: ScheduledReplica,
    bind: bool,
) -> Result<ReplicaId> {
    let node = placement.binding.node.clone();
    let replica_id = match ctx.runtime.create_replica(spec, &placement.binding).await {
        Ok(id) => id,
        Err(e) => {
            ctx.inventory.release(&node, &placement.reservation);
            return Err(e);
        }
    };
    ctx.inventory
        .rename_reservation(&node, &placement.reservation, &replica_id)?;
    ctx.tracker.insert(Replica {
        id: replica_id.clone(),
        pool_ref: spec.id.clone(),
        node_ref: Some(node.clone()),
        state: ReplicaState::Pending,
        gpu_slots: placement.binding.gpu_slots.clone(),
        mig_slot: placement.binding.mig_slot.clone(),
        model_ref: model.id.clone(),
        birth_time: ctx.clock.now(),
        last_bind_time: None,
    });
    ctx.residency.add_ref(&node, &model.id);

    ctx.tracker.advance(&replica_id, ReplicaState::Warming)?;
    if let Err(e) = ctx.runtime.warm_replica(&replica_id).await {
        ctx.on_replica_terminated(&replica_id);
        return Err(e);
    }
    ctx.tracker.advance(&replica_id, ReplicaState::Warm)?;

    if bind {
        ctx.tracker.advance(&replica_id, ReplicaState::Binding)?;
        let endpoint = match ctx.runtime.bind_replica(&replica_id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                ctx.on_replica_terminated(&replica_id);
                return Err(e);
            }
        };
        ctx.tracker.advance(&replica_id, ReplicaState::Serving)?;
        ctx.router
            .upsert_replica(&spec.id, &replica_id, endpoint.address);
    }
    Ok(replica_id)
}

/// Scale down: drain victims chosen by (no sessions, preemptible node,
/// oldest bind), honouring session TTLs up to the drain deadline.
async fn scale_down(
    ctx: &ControlContext,
    spec: &PoolSpec,
    decision: &ScalingDecision,
) -> Result<u32> {
    let views: Vec<ReplicaView> = ctx
        .tracker
        .list_pool(&spec.id)
        .into_iter()
        .map(|replica| {
            let preemptible = replica
                .node_ref
                .as_ref()
                .and_then(|node| ctx.inventory.get(node))
                .map(|snapshot| snapshot.fact.capacity_class == CapacityClass::Preemptible)
                .unwrap_or(false);
            ReplicaView {
                active_sessions: ctx.router.session_count(&replica.id),
                preemptible,
                id: replica.id,
                node: replica.node_ref,
                state: replica.state,
                last_bind_time: replica.last_bind_time,
            }
        })
        .collect();

    let victims = select_scale_down_victims(&views, decision.scale_down_by());
    let deadline = ctx.clock.now() + chrono::Duration::seconds(spec.session_ttl_secs as i64);
    let mut drained = 0;
    for victim in victims {
        ctx.runtime.drain_replica(&victim, deadline).await?;
        ctx.tracker.advance(&victim, ReplicaState::Draining)?;
        ctx.router.mark_draining(&spec.id, &victim);
        info!(pool = %spec.id, replica = %victim, %deadline, "replica draining");
        drained += 1;
    }
    Ok(drained)
}

/// Top up the warm pool toward its desired count, a replenish batch at a
/// time. Warm replicas are created and warmed but never routed.
async fn replenish(
    ctx: &ControlContext,
    spec: &PoolSpec,
    model: &ModelSpec,
    obs: &neuronetes_autoscaler::PoolObservation,
) -> Result<u32> {
    // Warm sizing tracks serving capacity, like the scaling formula.
    let desired = desired_warm(spec, obs.serving, obs.serving);
    let quota = replenish_quota(spec, desired, obs.warm);
    if quota == 0 {
        return Ok(0);
    }
    let request = PlacementRequest {
        pool: spec,
        model,
        count: quota,
        hint: CapacityHint::Any,
    };
    let placements = ctx.scheduler.schedule(&request, &[])?;
    let mut prepared = 0;
    for placement in placements {
        let node = placement.binding.node.clone();
        let replica_id = bring_up_cold(ctx, spec, model, placement, false).await?;
        ctx.warm.register(
            &spec.id,
            WarmReplica {
                replica: replica_id,
                node,
            },
        );
        prepared += 1;
    }
    if prepared > 0 {
        info!(pool = %spec.id, prepared, "warm pool replenished");
    }
    Ok(prepared)
}

/// Preemption candidates from every other pool, when the policy gate is
/// open. Replicas of critical-priority or currently-pinned models are
/// protected.
async fn preemption_candidates(ctx: &ControlContext, exclude: &PoolId) -> Vec<PreemptionCandidate> {
    if !ctx.config.enable_preemption {
        return Vec::new();
    }
    let pools: HashMap<String, i32> = match ctx.store.list::<PoolSpec>().await {
        Ok(pools) => pools
            .into_iter()
            .map(|p| (p.id.to_string(), p.scheduling_priority))
            .collect(),
        Err(_) => return Vec::new(),
    };
    let mut model_protection: HashMap<String, bool> = HashMap::new();
    let mut candidates = Vec::new();
    for replica in ctx.tracker.list_all() {
        if &replica.pool_ref == exclude || replica.state != ReplicaState::Serving {
            continue;
        }
        let Some(node) = replica.node_ref.clone() else {
            continue;
        };
        let model_key = replica.model_ref.to_string();
        let critical = match model_protection.get(&model_key) {
            Some(protected) => *protected,
            None => {
                let protected = match ctx.store.get::<ModelSpec>(&model_key).await {
                    Ok(Some(model)) => model.cache_priority == CachePriority::Critical,
                    _ => true,
                };
                model_protection.insert(model_key, protected);
                protected
            }
        };
        let pinned = ctx
            .residency
            .records(&node)
            .iter()
            .any(|r| r.model_ref == replica.model_ref && r.pinned(ctx.clock.now()));
        let protected = critical || pinned;
        candidates.push(PreemptionCandidate {
            priority: pools
                .get(replica.pool_ref.as_str())
                .copied()
                .unwrap_or_default(),
            replica: replica.id,
            node,
            protected,
        });
    }
    candidates
}

/// The pool record is gone: cascade termination and clean every table.
async fn teardown(ctx: &ControlContext, pool: &PoolId) -> Result<()> {
    info!(pool = %pool, "pool deleted, cascading termination");
    let now = ctx.clock.now();
    for warm in ctx.warm.clear(pool) {
        let _ = ctx.runtime.drain_replica(&warm.replica, now).await;
        ctx.on_replica_terminated(&warm.replica);
    }
    for replica in ctx.tracker.list_pool(pool) {
        if !replica.state.is_terminal() {
            let _ = ctx.runtime.drain_replica(&replica.id, now).await;
        }
        ctx.on_replica_terminated(&replica.id);
    }
    ctx.router.remove_pool(pool);
    ctx.evaluator.forget(pool);
    Ok(())
}
