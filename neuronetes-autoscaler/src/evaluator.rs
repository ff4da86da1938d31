//! Per-pool scaling evaluation.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use neuronetes_metrics::MetricReader;
use neuronetes_types::{
    CapacityHint, MetricSample, PoolId, PoolSpec, PoolStatus, Result, ScalingDecision,
    ScalingStrategy, SharedClock, Signal, SloSpec,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Replica counts observed for a pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolObservation {
    /// Replicas counting toward pool size (Warm, Binding, Serving).
    pub current: u32,
    /// Serving replicas.
    pub serving: u32,
    /// Warm replicas.
    pub warm: u32,
}

/// Result of one evaluation tick.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    /// Scaling decision, when desired differs from current after limits.
    pub decision: Option<ScalingDecision>,
    /// Every sample read this tick, stale ones included.
    pub samples: Vec<MetricSample>,
    /// True when signals are configured and every one came back stale.
    pub all_stale: bool,
    /// Capacity constraint derived from the SLO guard.
    pub capacity_hint: CapacityHint,
}

/// The evaluator. Holds the in-memory recommendation history that backs the
/// stabilization windows; the history rebuilds naturally after takeover.
pub struct Evaluator {
    reader: Arc<MetricReader>,
    clock: SharedClock,
    history: DashMap<PoolId, Vec<(DateTime<Utc>, u32)>>,
}

impl Evaluator {
    /// Wire the evaluator to its metric reader.
    pub fn new(reader: Arc<MetricReader>, clock: SharedClock) -> Self {
        Self {
            reader,
            clock,
            history: DashMap::new(),
        }
    }

    /// Forget a pool's recommendation history (pool deletion).
    pub fn forget(&self, pool: &PoolId) {
        self.history.remove(pool);
    }

    /// Evaluate one pool.
    pub async fn evaluate(
        &self,
        spec: &PoolSpec,
        slo: Option<&SloSpec>,
        obs: &PoolObservation,
        status: &PoolStatus,
    ) -> Result<EvalOutcome> {
        let now = self.clock.now();
        // Scaling works against serving capacity; warm replicas are
        // headroom drawn at activation time.
        let current = obs.serving;
        let mut samples = Vec::with_capacity(spec.scaling_metrics.len());
        let mut ratios: Vec<(Signal, f64)> = Vec::new();

        for metric in &spec.scaling_metrics {
            let sample = self
                .reader
                .read(
                    &spec.id,
                    metric.signal,
                    Duration::from_secs(metric.window_secs),
                )
                .await?;
            if let Some(value) = sample.value.value() {
                if !metric.signal.informational() {
                    let target = metric.signal.parse_target(&metric.target)?;
                    ratios.push((metric.signal, value / target));
                }
            }
            samples.push(sample);
        }

        let all_stale =
            !spec.scaling_metrics.is_empty() && samples.iter().all(|s| s.value.is_stale());
        let capacity_hint = self.slo_guard(spec, slo, &samples);

        // A sustained metric outage holds current size; it never scales to
        // min.
        if ratios.is_empty() {
            return Ok(EvalOutcome {
                decision: None,
                samples,
                all_stale,
                capacity_hint,
            });
        }

        let (primary_signal, ratio) = combine(spec.behavior.strategy, &ratios);
        let raw_desired = if current == 0 {
            spec.min_replicas
        } else {
            (current as f64 * ratio).ceil() as u32
        };
        let clamped = raw_desired.clamp(spec.min_replicas, spec.max_replicas);

        let stabilized = self.stabilize(spec, current, clamped, now);
        let mut desired = rate_limit(spec, current, stabilized);

        if capacity_hint == CapacityHint::Durable {
            desired = desired.max(current);
        }

        debug!(
            pool = %spec.id,
            current,
            raw = raw_desired,
            stabilized,
            desired,
            ratio = format!("{ratio:.2}"),
            "evaluation"
        );

        if desired == current {
            return Ok(EvalOutcome {
                decision: None,
                samples,
                all_stale,
                capacity_hint,
            });
        }

        if let Some(last) = status.last_scale_time {
            let cooldown = chrono::Duration::seconds(spec.behavior.cooldown_secs as i64);
            if now - last < cooldown {
                debug!(pool = %spec.id, "scaling suppressed by cooldown");
                return Ok(EvalOutcome {
                    decision: None,
                    samples,
                    all_stale,
                    capacity_hint,
                });
            }
        }

        let decision = ScalingDecision {
            pool_ref: spec.id.clone(),
            current,
            desired,
            primary_signal: Some(primary_signal),
            ratio,
            reason: format!(
                "{primary_signal} at {ratio:.2}x target; {} -> {desired} replicas",
                current
            ),
            capacity_hint,
            timestamp: now,
        };
        info!(pool = %spec.id, current, desired, signal = %primary_signal, "scaling decision");
        Ok(EvalOutcome {
            decision: Some(decision),
            samples,
            all_stale,
            capacity_hint,
        })
    }

    /// Record the recommendation and smooth it: scale-up takes the most
    /// conservative (lowest) recommendation inside the up window, scale-down
    /// the highest inside the down window.
    fn stabilize(&self, spec: &PoolSpec, current: u32, desired: u32, now: DateTime<Utc>) -> u32 {
        let up_window = chrono::Duration::seconds(spec.behavior.scale_up.stabilization_window_secs as i64);
        let down_window =
            chrono::Duration::seconds(spec.behavior.scale_down.stabilization_window_secs as i64);
        let retain = up_window.max(down_window);

        let mut entry = self.history.entry(spec.id.clone()).or_default();
        entry.push((now, desired));
        entry.retain(|(ts, _)| now - *ts <= retain);

        if desired > current {
            entry
                .iter()
                .filter(|(ts, _)| now - *ts <= up_window)
                .map(|(_, d)| *d)
                .min()
                .unwrap_or(desired)
                .max(current)
        } else if desired < current {
            entry
                .iter()
                .filter(|(ts, _)| now - *ts <= down_window)
                .map(|(_, d)| *d)
                .max()
                .unwrap_or(desired)
                .min(current)
        } else {
            desired
        }
    }

    /// Capacity hint from the SLO guard: with spot preferred, thin TTFT
    /// headroom forces durable capacity for new placements.
    fn slo_guard(
        &self,
        spec: &PoolSpec,
        slo: Option<&SloSpec>,
        samples: &[MetricSample],
    ) -> CapacityHint {
        if !spec.cost.prefer_spot {
            return CapacityHint::Any;
        }
        let Some(slo) = slo else {
            return CapacityHint::Any;
        };
        let observed = samples
            .iter()
            .find(|s| s.signal == Signal::TtftP95)
            .and_then(|s| s.value.value());
        match observed {
            Some(ttft) if slo.ttft_ms as f64 - ttft < spec.cost.slo_headroom_ms as f64 => {
                debug!(pool = %spec.id, ttft, slo_ttft = slo.ttft_ms, "SLO headroom thin, demanding durable capacity");
                CapacityHint::Durable
            }
            _ => CapacityHint::Any,
        }
    }
}

/// Combine ratios under the strategy; the reported primary signal is the
/// most demanding one in all cases.
fn combine(strategy: ScalingStrategy, ratios: &[(Signal, f64)]) -> (Signal, f64) {
    let max = ratios
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .copied()
        .unwrap_or((Signal::QueueDepth, 1.0));
    match strategy {
        ScalingStrategy::Max => max,
        ScalingStrategy::Min => ratios
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .copied()
            .unwrap_or(max),
        ScalingStrategy::Average => {
            let mean = ratios.iter().map(|(_, r)| r).sum::<f64>() / ratios.len() as f64;
            (max.0, mean)
        }
    }
}

/// Clamp the change against `maxChangeAbsolute` and `maxChangePercent`.
fn rate_limit(spec: &PoolSpec, current: u32, desired: u32) -> u32 {
    let policy = if desired > current {
        &spec.behavior.scale_up
    } else {
        &spec.behavior.scale_down
    };
    let mut allowed = u32::MAX;
    if let Some(absolute) = policy.max_change_absolute {
        allowed = allowed.min(absolute);
    }
    if let Some(percent) = policy.max_change_percent {
        let by_percent = ((current as f64) * (percent as f64) / 100.0).ceil() as u32;
        allowed = allowed.min(by_percent.max(1));
    }
    if allowed == u32::MAX {
        return desired;
    }
    if desired > current {
        desired.min(current + allowed)
    } else {
        desired.max(current.saturating_sub(allowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronetes_metrics::MemorySource;
    use neuronetes_types::{
        AgentClassId, Clock, GpuRequirements, ManualClock, ScalingMetricSpec, TopologyClass,
    };

    struct Fixture {
        clock: Arc<ManualClock>,
        source: Arc<MemorySource>,
        evaluator: Evaluator,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::from_wall());
        let shared: SharedClock = clock.clone();
        let source = Arc::new(MemorySource::new(shared.clone(), Duration::from_secs(3600)));
        let reader = Arc::new(MetricReader::new(source.clone(), 8, shared.clone()));
        let evaluator = Evaluator::new(reader, shared);
        Fixture {
            clock,
            source,
            evaluator,
        }
    }

    fn spec(min: u32, max: u32) -> PoolSpec {
        PoolSpec {
            id: PoolId::from("p1"),
            agent_class_ref: AgentClassId::from("ac1"),
            min_replicas: min,
            max_replicas: max,
            prewarm_fraction: 0.2,
            tokens_per_second_budget: None,
            mig_profile: None,
            gpu: GpuRequirements {
                count: 1,
                gpu_type: None,
                memory_bytes: 1,
                topology_class: TopologyClass::Any,
            },
            affinity: Default::default(),
            session_affinity_key: None,
            scaling_metrics: vec![ScalingMetricSpec {
                signal: Signal::TokensQueued,
                target: "100".to_string(),
                window_secs: 60,
            }],
            behavior: Default::default(),
            cost: Default::default(),
            scheduling_priority: 0,
            replenish_batch_size: 2,
            session_ttl_secs: 900,
            max_sessions_per_replica: 8,
            generation: 1,
        }
    }

    fn obs(current: u32) -> PoolObservation {
        PoolObservation {
            current,
            serving: current,
            warm: 0,
        }
    }

    #[tokio::test]
    async fn scales_up_by_ratio_and_clamps_to_max() {
        let f = fixture();
        let spec = spec(3, 20);
        f.source.push(&spec.id, Signal::TokensQueued, 600.0);

        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(3), &PoolStatus::default())
            .await
            .unwrap();
        let decision = outcome.decision.unwrap();
        // ceil(3 * 6.0) = 18, within max.
        assert_eq!(decision.desired, 18);
        assert_eq!(decision.primary_signal, Some(Signal::TokensQueued));

        let mut tight = spec.clone();
        tight.max_replicas = 10;
        f.evaluator.forget(&tight.id);
        let outcome = f
            .evaluator
            .evaluate(&tight, None, &obs(3), &PoolStatus::default())
            .await
            .unwrap();
        assert_eq!(outcome.decision.unwrap().desired, 10);
    }

    #[tokio::test]
    async fn stale_signals_produce_no_decision() {
        let f = fixture();
        let spec = spec(3, 20);
        // Nothing pushed: every signal stale.
        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(5), &PoolStatus::default())
            .await
            .unwrap();
        assert!(outcome.decision.is_none());
        assert!(outcome.all_stale);
    }

    #[tokio::test]
    async fn max_change_absolute_limits_the_step() {
        let f = fixture();
        let mut spec = spec(3, 20);
        spec.behavior.scale_up.max_change_absolute = Some(6);
        f.source.push(&spec.id, Signal::TokensQueued, 600.0);

        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(3), &PoolStatus::default())
            .await
            .unwrap();
        assert_eq!(outcome.decision.unwrap().desired, 9);
    }

    #[tokio::test]
    async fn zero_replicas_bootstrap_to_min_on_any_signal() {
        let f = fixture();
        let spec = spec(3, 20);
        f.source.push(&spec.id, Signal::TokensQueued, 50.0);

        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(0), &PoolStatus::default())
            .await
            .unwrap();
        assert_eq!(outcome.decision.unwrap().desired, 3);
    }

    #[tokio::test]
    async fn cooldown_suppresses_back_to_back_actions() {
        let f = fixture();
        let spec = spec(3, 20);
        f.source.push(&spec.id, Signal::TokensQueued, 600.0);

        let status = PoolStatus {
            last_scale_time: Some(f.clock.now() - chrono::Duration::seconds(10)),
            ..Default::default()
        };
        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(3), &status)
            .await
            .unwrap();
        assert!(outcome.decision.is_none());

        f.clock.advance(Duration::from_secs(60));
        f.source.push(&spec.id, Signal::TokensQueued, 600.0);
        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(3), &status)
            .await
            .unwrap();
        assert!(outcome.decision.is_some());
    }

    #[tokio::test]
    async fn scale_down_stabilization_holds_the_window_maximum() {
        let f = fixture();
        let mut spec = spec(1, 20);
        spec.behavior.scale_down.stabilization_window_secs = 300;
        spec.behavior.cooldown_secs = 0;

        // Load supports 10 replicas.
        f.source.push(&spec.id, Signal::TokensQueued, 100.0);
        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(10), &PoolStatus::default())
            .await
            .unwrap();
        // ratio 1.0: no change, but the recommendation (10) is recorded.
        assert!(outcome.decision.is_none());

        // Load collapses; the window still holds the earlier high
        // recommendation, so no scale-down yet.
        f.clock.advance(Duration::from_secs(30));
        f.source.clear(&spec.id);
        f.source.push(&spec.id, Signal::TokensQueued, 10.0);
        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(10), &PoolStatus::default())
            .await
            .unwrap();
        assert!(outcome.decision.is_none());

        // Once the high recommendation ages out, the scale-down fires.
        f.clock.advance(Duration::from_secs(301));
        f.source.push(&spec.id, Signal::TokensQueued, 10.0);
        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(10), &PoolStatus::default())
            .await
            .unwrap();
        let decision = outcome.decision.unwrap();
        assert!(decision.desired < 10);
    }

    #[tokio::test]
    async fn slo_guard_demands_durable_capacity_and_blocks_scale_down() {
        let f = fixture();
        let mut spec = spec(1, 20);
        spec.cost.prefer_spot = true;
        spec.cost.slo_headroom_ms = 200;
        spec.behavior.cooldown_secs = 0;
        spec.behavior.scale_down.stabilization_window_secs = 0;
        spec.scaling_metrics.push(ScalingMetricSpec {
            signal: Signal::TtftP95,
            target: "500ms".to_string(),
            window_secs: 60,
        });
        let slo = SloSpec {
            ttft_ms: 500,
            tokens_per_second: 50.0,
            p95_latency_ms: 2000,
        };

        // Low queue pressure would normally scale down, but observed TTFT
        // of 450 ms leaves only 50 ms headroom.
        f.source.push(&spec.id, Signal::TokensQueued, 10.0);
        f.source.push(&spec.id, Signal::TtftP95, 450.0);

        let outcome = f
            .evaluator
            .evaluate(&spec, Some(&slo), &obs(5), &PoolStatus::default())
            .await
            .unwrap();
        assert_eq!(outcome.capacity_hint, CapacityHint::Durable);
        assert!(outcome.decision.is_none());
    }

    #[tokio::test]
    async fn average_strategy_uses_mean_ratio() {
        let f = fixture();
        let mut spec = spec(1, 100);
        spec.behavior.strategy = ScalingStrategy::Average;
        spec.scaling_metrics.push(ScalingMetricSpec {
            signal: Signal::QueueDepth,
            target: "10".to_string(),
            window_secs: 60,
        });
        f.source.push(&spec.id, Signal::TokensQueued, 400.0); // ratio 4
        f.source.push(&spec.id, Signal::QueueDepth, 20.0); // ratio 2

        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(2), &PoolStatus::default())
            .await
            .unwrap();
        // mean ratio 3.0: ceil(2 * 3) = 6.
        assert_eq!(outcome.decision.unwrap().desired, 6);
    }

    #[tokio::test]
    async fn informational_signals_never_govern() {
        let f = fixture();
        let mut spec = spec(1, 20);
        spec.scaling_metrics = vec![ScalingMetricSpec {
            signal: Signal::ContextLength,
            target: "4000".to_string(),
            window_secs: 60,
        }];
        f.source.push(&spec.id, Signal::ContextLength, 16000.0);

        let outcome = f
            .evaluator
            .evaluate(&spec, None, &obs(2), &PoolStatus::default())
            .await
            .unwrap();
        assert!(outcome.decision.is_none());
        assert!(!outcome.all_stale);
    }
}
