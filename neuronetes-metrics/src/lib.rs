//! Metric reader.
//!
//! Pulls time-windowed aggregates for named signals from an external metric
//! collector. A missing or stale signal comes back as the explicit
//! [`MetricValue::Stale`] sentinel rather than zero, so the autoscaler can
//! treat it as "no signal". The reader caps concurrent upstream queries.

use async_trait::async_trait;
use dashmap::DashMap;
use neuronetes_types::{MetricSample, MetricValue, PoolId, Result, SharedClock, Signal};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::trace;

/// Upstream metric collector.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Windowed aggregate of `signal` for `pool`, or `Stale`.
    async fn query(&self, pool: &PoolId, signal: Signal, window: Duration) -> Result<MetricValue>;
}

/// Backpressured reader over a [`MetricSource`].
pub struct MetricReader {
    source: Arc<dyn MetricSource>,
    limit: Arc<Semaphore>,
    clock: SharedClock,
}

impl MetricReader {
    /// Create a reader capping concurrent upstream queries at
    /// `max_concurrent`.
    pub fn new(source: Arc<dyn MetricSource>, max_concurrent: usize, clock: SharedClock) -> Self {
        Self {
            source,
            limit: Arc::new(Semaphore::new(max_concurrent.max(1))),
            clock,
        }
    }

    /// Read one signal.
    pub async fn read(
        &self,
        pool: &PoolId,
        signal: Signal,
        window: Duration,
    ) -> Result<MetricSample> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| neuronetes_types::ControlError::Cancelled)?;
        let value = self.source.query(pool, signal, window).await?;
        trace!(pool = %pool, signal = %signal, ?value, "signal read");
        Ok(MetricSample {
            pool_ref: pool.clone(),
            signal,
            value,
            window_end: self.clock.now(),
        })
    }
}

/// In-memory metric source. Tests and the dry-run daemon push timestamped
/// points; queries average the points inside the window.
pub struct MemorySource {
    points: DashMap<(PoolId, Signal), Vec<(chrono::DateTime<chrono::Utc>, f64)>>,
    retention: chrono::Duration,
    clock: SharedClock,
}

impl MemorySource {
    /// Create a source retaining points for `retention`.
    pub fn new(clock: SharedClock, retention: Duration) -> Self {
        Self {
            points: DashMap::new(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
            clock,
        }
    }

    /// Record one observation at the current clock time.
    pub fn push(&self, pool: &PoolId, signal: Signal, value: f64) {
        let now = self.clock.now();
        let cutoff = now - self.retention;
        let mut entry = self.points.entry((pool.clone(), signal)).or_default();
        entry.push((now, value));
        entry.retain(|(ts, _)| *ts >= cutoff);
    }

    /// Drop every recorded point for a pool.
    pub fn clear(&self, pool: &PoolId) {
        self.points.retain(|(p, _), _| p != pool);
    }
}

#[async_trait]
impl MetricSource for MemorySource {
    async fn query(&self, pool: &PoolId, signal: Signal, window: Duration) -> Result<MetricValue> {
        let now = self.clock.now();
        let start = now
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(60));
        let Some(entry) = self.points.get(&(pool.clone(), signal)) else {
            return Ok(MetricValue::Stale);
        };
        let fresh: Vec<f64> = entry
            .iter()
            .filter(|(ts, _)| *ts >= start && *ts <= now)
            .map(|(_, v)| *v)
            .collect();
        if fresh.is_empty() {
            return Ok(MetricValue::Stale);
        }
        Ok(MetricValue::Value(
            fresh.iter().sum::<f64>() / fresh.len() as f64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronetes_types::{ControlError, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> (Arc<ManualClock>, SharedClock) {
        let manual = Arc::new(ManualClock::from_wall());
        let shared: SharedClock = manual.clone();
        (manual, shared)
    }

    #[tokio::test]
    async fn windowed_average_over_fresh_points() {
        let (manual, shared) = clock();
        let source = MemorySource::new(shared.clone(), Duration::from_secs(600));
        let pool = PoolId::from("p1");

        source.push(&pool, Signal::TokensQueued, 100.0);
        manual.advance(Duration::from_secs(10));
        source.push(&pool, Signal::TokensQueued, 300.0);

        let value = source
            .query(&pool, Signal::TokensQueued, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(value, MetricValue::Value(200.0));
    }

    #[tokio::test]
    async fn points_outside_window_are_stale() {
        let (manual, shared) = clock();
        let source = MemorySource::new(shared, Duration::from_secs(600));
        let pool = PoolId::from("p1");

        source.push(&pool, Signal::QueueDepth, 5.0);
        manual.advance(Duration::from_secs(120));

        let value = source
            .query(&pool, Signal::QueueDepth, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(value.is_stale());
    }

    #[tokio::test]
    async fn unknown_signal_is_stale_not_zero() {
        let (_, shared) = clock();
        let source = MemorySource::new(shared, Duration::from_secs(600));
        let value = source
            .query(&PoolId::from("p1"), Signal::TtftP95, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(value, MetricValue::Stale);
    }

    struct CountingSource {
        inflight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MetricSource for CountingSource {
        async fn query(
            &self,
            _pool: &PoolId,
            _signal: Signal,
            _window: Duration,
        ) -> Result<MetricValue> {
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            Ok(MetricValue::Value(1.0))
        }
    }

    #[tokio::test]
    async fn reader_caps_concurrent_upstream_queries() {
        let (_, shared) = clock();
        let source = Arc::new(CountingSource {
            inflight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let reader = Arc::new(MetricReader::new(source.clone(), 2, shared));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reader = reader.clone();
            handles.push(tokio::spawn(async move {
                reader
                    .read(&PoolId::from("p1"), Signal::QueueDepth, Duration::from_secs(30))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    struct FailingSource;

    #[async_trait]
    impl MetricSource for FailingSource {
        async fn query(
            &self,
            _pool: &PoolId,
            _signal: Signal,
            _window: Duration,
        ) -> Result<MetricValue> {
            Err(ControlError::Transient("collector unreachable".into()))
        }
    }

    #[tokio::test]
    async fn upstream_errors_propagate_as_transient() {
        let (_, shared) = clock();
        let reader = MetricReader::new(Arc::new(FailingSource), 4, shared);
        let err = reader
            .read(&PoolId::from("p1"), Signal::QueueDepth, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err.category(), neuronetes_types::Category::Transient);
    }
}
