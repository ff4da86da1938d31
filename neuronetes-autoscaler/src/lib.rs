//! Token-aware autoscaler.
//!
//! Per tick, each pool's configured signals are read with their averaging
//! windows, stale signals are skipped, and the surviving ratios combine
//! under the pool's strategy into one governing ratio. The raw desired size
//! is smoothed by direction-specific stabilization windows, rate-limited,
//! clamped to `[min, max]` and gated by the pool-wide cooldown before a
//! [`ScalingDecision`] is emitted.

mod evaluator;
mod plan;

pub use evaluator::{EvalOutcome, Evaluator, PoolObservation};
pub use plan::{plan_scale_up, select_scale_down_victims, ReplicaView, ScaleUpPlan};
