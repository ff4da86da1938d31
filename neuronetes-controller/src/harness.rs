//! The reconcile loop.

use crate::context::ControlContext;
use crate::leader::LeaderElection;
use crate::reconcilers;
use crate::workqueue::WorkQueue;
use neuronetes_store::{Kind, Object};
use neuronetes_types::{Category, PoolSpec, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Drives watch events and periodic ticks through per-kind work queues into
/// reconciles, gated on leadership.
pub struct Controller {
    ctx: Arc<ControlContext>,
    leader: Arc<LeaderElection>,
    queues: HashMap<Kind, Arc<WorkQueue<String>>>,
}

impl Controller {
    /// Wire the harness.
    pub fn new(ctx: Arc<ControlContext>, leader: Arc<LeaderElection>) -> Self {
        let queues = Kind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(WorkQueue::default())))
            .collect();
        Self {
            ctx,
            leader,
            queues,
        }
    }

    /// Enqueue one key.
    pub fn enqueue(&self, kind: Kind, id: String) {
        if let Some(queue) = self.queues.get(&kind) {
            queue.add(id);
        }
    }

    /// Run until a component fails hard. Spawns the watch bridge, the tick
    /// loop and `workers_per_kind` workers per record kind.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks: JoinSet<()> = JoinSet::new();

        // Watch bridge: spec changes become queue keys.
        {
            let controller = Arc::clone(&self);
            let mut watch = controller.ctx.store.watch();
            tasks.spawn(async move {
                loop {
                    match watch.recv().await {
                        Ok(event) => {
                            // Deletes reconcile like applies: the reconciler
                            // observes the missing spec and cascades.
                            debug!(kind = %event.kind, id = %event.id, op = ?event.op, "watch event");
                            controller.enqueue(event.kind, event.id);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "watch stream lagged; resyncing every kind");
                            controller.resync().await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        // Node-event bridge: ready flips and residency changes re-evaluate
        // every pool so placements react before the next periodic tick.
        {
            let controller = Arc::clone(&self);
            let mut events = controller.ctx.inventory.subscribe();
            tasks.spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => {
                            debug!(?event, "node event");
                            if let Ok(pools) = controller.ctx.store.list::<PoolSpec>().await {
                                for pool in pools {
                                    controller.enqueue(Kind::Pool, pool.object_id().to_string());
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        // Tick loop: leadership, node sync, periodic resync.
        {
            let controller = Arc::clone(&self);
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(
                    controller.ctx.config.tick_interval_secs,
                ));
                loop {
                    ticker.tick().await;
                    let leading = if controller.leader.is_leader() {
                        controller.leader.renew().is_ok()
                    } else {
                        controller.leader.try_acquire()
                    };
                    if !leading {
                        continue;
                    }
                    if let Err(e) = reconcilers::node::reconcile_nodes(&controller.ctx).await {
                        warn!(error = %e, "node sync failed");
                    }
                    controller.resync().await;
                }
            });
        }

        // Workers.
        for kind in Kind::ALL {
            let queue = match self.queues.get(&kind) {
                Some(queue) => Arc::clone(queue),
                None => continue,
            };
            for worker in 0..self.ctx.config.workers_per_kind {
                let ctx = Arc::clone(&self.ctx);
                let leader = Arc::clone(&self.leader);
                let queue = Arc::clone(&queue);
                tasks.spawn(async move {
                    worker_loop(ctx, leader, queue, kind, worker).await;
                });
            }
        }

        info!("controller running");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "controller task exited");
            }
        }
        Ok(())
    }

    /// Enqueue every stored record of every kind.
    pub async fn resync(&self) {
        // Pools carry the scaling loop, so they resync even when listing
        // another kind fails.
        if let Ok(pools) = self.ctx.store.list::<PoolSpec>().await {
            for pool in pools {
                self.enqueue(Kind::Pool, pool.object_id().to_string());
            }
        }
        if let Ok(models) = self.ctx.store.list::<neuronetes_types::ModelSpec>().await {
            for model in models {
                self.enqueue(Kind::Model, model.object_id().to_string());
            }
        }
        if let Ok(classes) = self
            .ctx
            .store
            .list::<neuronetes_types::AgentClassSpec>()
            .await
        {
            for class in classes {
                self.enqueue(Kind::AgentClass, class.object_id().to_string());
            }
        }
        if let Ok(bindings) = self
            .ctx
            .store
            .list::<neuronetes_types::ToolBindingSpec>()
            .await
        {
            for binding in bindings {
                self.enqueue(Kind::ToolBinding, binding.object_id().to_string());
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<ControlContext>,
    leader: Arc<LeaderElection>,
    queue: Arc<WorkQueue<String>>,
    kind: Kind,
    worker: usize,
) {
    debug!(%kind, worker, "reconcile worker up");
    let kind_label = kind.to_string();
    loop {
        let key = queue.next().await;
        // Followers idle: drop the item; the next resync re-delivers once
        // this instance leads.
        if !leader.is_leader() {
            queue.done(&key);
            continue;
        }

        let timer = ctx
            .telemetry
            .reconcile_seconds
            .with_label_values(&[kind_label.as_str()])
            .start_timer();
        let budget = Duration::from_secs(ctx.config.reconcile_budget_secs);
        let result = tokio::time::timeout(budget, reconcilers::reconcile(&ctx, kind, &key)).await;
        timer.observe_duration();

        match result {
            Ok(Ok(())) => {
                ctx.telemetry
                    .reconciles
                    .with_label_values(&[kind_label.as_str(), "ok"])
                    .inc();
                queue.done(&key);
            }
            Ok(Err(e)) => {
                ctx.telemetry
                    .reconciles
                    .with_label_values(&[kind_label.as_str(), e.tag()])
                    .inc();
                match e.category() {
                    Category::Fatal => {
                        error!(%kind, id = %key, error = %e, "invariant violated; exiting for a clean restart");
                        std::process::exit(70);
                    }
                    // Terminal until the inputs change; the watch will
                    // re-enqueue on the next edit.
                    Category::Validation | Category::Policy => {
                        warn!(%kind, id = %key, error = %e, "terminal reconcile failure");
                        queue.done(&key);
                    }
                    _ => {
                        debug!(%kind, id = %key, error = %e, "requeueing with backoff");
                        queue.requeue_backoff(&key);
                    }
                }
            }
            Err(_) => {
                ctx.telemetry
                    .reconciles
                    .with_label_values(&[kind_label.as_str(), "DeadlineExceeded"])
                    .inc();
                warn!(%kind, id = %key, "reconcile exceeded its budget; requeueing");
                queue.requeue_backoff(&key);
            }
        }
    }
}
