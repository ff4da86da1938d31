//! Deduped, rate-limited work queue.
//!
//! Keys enqueue at most once; a key being processed is not handed to a
//! second worker (key-level serialization), and re-adds during processing
//! are remembered and re-delivered after `done`. Per-key rate limiting: a
//! key runs at most once per minimum interval (1 s), and failures requeue
//! with exponential backoff up to 5 min.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct Inner<K> {
    ready: VecDeque<K>,
    queued: HashSet<K>,
    inflight: HashSet<K>,
    redo: HashSet<K>,
    delayed: BinaryHeap<Reverse<(Instant, u64, K)>>,
    failures: std::collections::HashMap<K, u32>,
    last_finished: std::collections::HashMap<K, Instant>,
    seq: u64,
}

/// The queue.
pub struct WorkQueue<K: Eq + Hash + Clone + Ord> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
    min_interval: Duration,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl<K: Eq + Hash + Clone + Ord> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(300),
        )
    }
}

impl<K: Eq + Hash + Clone + Ord> WorkQueue<K> {
    /// Create a queue with the given per-key minimum interval and backoff
    /// bounds.
    pub fn new(min_interval: Duration, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ready: VecDeque::new(),
                queued: HashSet::new(),
                inflight: HashSet::new(),
                redo: HashSet::new(),
                delayed: BinaryHeap::new(),
                failures: std::collections::HashMap::new(),
                last_finished: std::collections::HashMap::new(),
                seq: 0,
            }),
            notify: Notify::new(),
            min_interval,
            base_backoff,
            max_backoff,
        }
    }

    /// Enqueue a key for processing. Duplicate adds coalesce; adds for an
    /// in-flight key are re-delivered after it completes; a key processed
    /// less than the minimum interval ago is deferred to the boundary.
    pub fn add(&self, key: K) {
        let mut inner = self.inner.lock();
        if inner.inflight.contains(&key) {
            inner.redo.insert(key);
            return;
        }
        if let Some(finished) = inner.last_finished.get(&key) {
            let boundary = *finished + self.min_interval;
            if boundary > Instant::now() {
                if inner.queued.insert(key.clone()) {
                    let seq = inner.seq;
                    inner.seq += 1;
                    inner.delayed.push(Reverse((boundary, seq, key)));
                    drop(inner);
                    self.notify.notify_one();
                }
                return;
            }
        }
        if inner.queued.insert(key.clone()) {
            inner.ready.push_back(key);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Enqueue a key after a delay.
    pub fn add_after(&self, key: K, delay: Duration) {
        let mut inner = self.inner.lock();
        if inner.inflight.contains(&key) {
            inner.redo.insert(key);
            return;
        }
        if inner.queued.insert(key.clone()) {
            let seq = inner.seq;
            inner.seq += 1;
            inner.delayed.push(Reverse((Instant::now() + delay, seq, key)));
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Wait for the next key. The key is marked in flight until `done` or
    /// `requeue_backoff` is called for it.
    pub async fn next(&self) -> K {
        loop {
            let wait_until = {
                let mut inner = self.inner.lock();
                let now = Instant::now();
                loop {
                    let due = match inner.delayed.peek() {
                        Some(Reverse((due, _, _))) => *due,
                        None => break,
                    };
                    if due > now {
                        break;
                    }
                    if let Some(Reverse((_, _, key))) = inner.delayed.pop() {
                        inner.ready.push_back(key);
                    }
                }
                if let Some(key) = inner.ready.pop_front() {
                    inner.queued.remove(&key);
                    inner.inflight.insert(key.clone());
                    return key;
                }
                inner.delayed.peek().map(|Reverse((due, _, _))| *due)
            };
            match wait_until {
                Some(due) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Mark a key successfully processed, clearing its failure count and
    /// re-delivering it (after the minimum interval) if it was re-added
    /// while in flight.
    pub fn done(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.inflight.remove(key);
        inner.failures.remove(key);
        inner.last_finished.insert(key.clone(), Instant::now());
        if inner.redo.remove(key) && inner.queued.insert(key.clone()) {
            let seq = inner.seq;
            inner.seq += 1;
            inner.delayed.push(Reverse((
                Instant::now() + self.min_interval,
                seq,
                key.clone(),
            )));
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Mark a key failed and requeue it with exponential backoff.
    pub fn requeue_backoff(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.inflight.remove(key);
        inner.redo.remove(key);
        let failures = inner.failures.entry(key.clone()).or_insert(0);
        *failures += 1;
        let exponent = (*failures - 1).min(16);
        let delay = self
            .base_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        if inner.queued.insert(key.clone()) {
            let seq = inner.seq;
            inner.seq += 1;
            inner
                .delayed
                .push(Reverse((Instant::now() + delay, seq, key.clone())));
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Drop a key and its failure history.
    pub fn forget(&self, key: &K) {
        let mut inner = self.inner.lock();
        inner.failures.remove(key);
        inner.redo.remove(key);
        if inner.queued.remove(key) {
            inner.ready.retain(|k| k != key);
        }
    }

    /// Keys waiting or in flight, for shutdown draining and tests.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.queued.len() + inner.inflight.len()
    }

    /// Whether nothing is queued or running.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_adds_coalesce() {
        let queue = WorkQueue::default();
        queue.add("a".to_string());
        queue.add("a".to_string());
        queue.add("b".to_string());
        assert_eq!(queue.len(), 2);

        let first = queue.next().await;
        let second = queue.next().await;
        assert_ne!(first, second);
        queue.done(&first);
        queue.done(&second);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn inflight_key_is_not_delivered_twice() {
        let queue = Arc::new(WorkQueue::default());
        queue.add("a".to_string());
        let key = queue.next().await;

        // Re-add while in flight: nothing ready yet.
        queue.add("a".to_string());
        assert_eq!(queue.len(), 1);

        // After done, the remembered re-add is delivered.
        queue.done(&key);
        let again = queue.next().await;
        assert_eq!(again, "a");
        queue.done(&again);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_redelivery_exponentially() {
        let queue = WorkQueue::new(Duration::from_secs(1), Duration::from_secs(1), Duration::from_secs(300));
        queue.add("a".to_string());
        let key = queue.next().await;
        queue.requeue_backoff(&key);

        // 1 s for the first failure.
        let start = Instant::now();
        let key = queue.next().await;
        assert!(Instant::now() - start >= Duration::from_secs(1));

        // 2 s for the second.
        queue.requeue_backoff(&key);
        let start = Instant::now();
        let key = queue.next().await;
        assert!(Instant::now() - start >= Duration::from_secs(2));
        queue.done(&key);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_backoff() {
        let queue = WorkQueue::new(Duration::from_secs(1), Duration::from_secs(1), Duration::from_secs(300));
        queue.add("a".to_string());
        let key = queue.next().await;
        queue.requeue_backoff(&key);
        let key = queue.next().await;
        queue.done(&key);

        // Fresh failure starts at the base delay again.
        queue.add("a".to_string());
        let key = queue.next().await;
        queue.requeue_backoff(&key);
        let start = Instant::now();
        let key = queue.next().await;
        let waited = Instant::now() - start;
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
        queue.done(&key);
    }

    #[tokio::test]
    async fn add_after_defers_delivery() {
        tokio::time::pause();
        let queue = WorkQueue::default();
        queue.add_after("later".to_string(), Duration::from_secs(30));
        queue.add("now".to_string());
        assert_eq!(queue.next().await, "now");
        let later = queue.next().await;
        assert_eq!(later, "later");
    }
}
