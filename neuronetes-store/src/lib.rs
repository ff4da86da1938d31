//! Declarative record store with watch semantics.
//!
//! The store persists the four user-authored record kinds plus their status
//! sub-records as JSON values under `spec:<kind>:<id>` / `status:<kind>:<id>`
//! keys, over a pluggable [`Backend`]: an in-memory map for tests and an
//! embedded `sled` database for the daemon and CLI. Applying a spec bumps its
//! generation when (and only when) the spec body changed, and broadcasts a
//! watch event that the controller harness turns into reconcile work.

mod backend;
mod object;

pub use backend::{Backend, MemoryBackend, SledBackend};
pub use object::{Kind, Object, StatusRecord};

use neuronetes_types::{ControlError, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Operation observed on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    /// A spec was created or changed.
    Applied,
    /// A spec was deleted.
    Deleted,
}

/// One change notification.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// Record kind.
    pub kind: Kind,
    /// Record identifier.
    pub id: String,
    /// What happened.
    pub op: WatchOp,
}

/// Typed facade over a [`Backend`] with generation bumping, status
/// writeback and watch broadcast.
pub struct Store {
    backend: Arc<dyn Backend>,
    events: broadcast::Sender<WatchEvent>,
}

impl Store {
    /// Wrap an arbitrary backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self { backend, events }
    }

    /// In-memory store for tests and dry runs.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    /// Sled-backed store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Arc::new(SledBackend::open(path)?)))
    }

    /// Subscribe to spec change notifications.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Apply a spec: create it, or bump its generation if the body changed.
    /// Returns the stored record. Emits a watch event on change only.
    pub async fn apply<T: Object>(&self, mut obj: T) -> Result<T> {
        let key = spec_key(T::KIND, obj.object_id());
        let id = obj.object_id().to_string();
        let existing: Option<T> = self.read_key(&key).await?;
        match existing {
            Some(current) => {
                let mut normalized = obj.clone();
                normalized.set_generation(current.generation());
                if normalized == current {
                    return Ok(current);
                }
                obj.set_generation(current.generation() + 1);
            }
            None => obj.set_generation(1),
        }
        self.write_key(&key, &obj).await?;
        debug!(kind = %T::KIND, %id, generation = obj.generation(), "spec applied");
        let _ = self.events.send(WatchEvent {
            kind: T::KIND,
            id,
            op: WatchOp::Applied,
        });
        Ok(obj)
    }

    /// Fetch a spec by id.
    pub async fn get<T: Object>(&self, id: &str) -> Result<Option<T>> {
        self.read_key(&spec_key(T::KIND, id)).await
    }

    /// List every spec of a kind.
    pub async fn list<T: Object>(&self) -> Result<Vec<T>> {
        let prefix = format!("spec:{}:", T::KIND);
        let mut out = Vec::new();
        for (_, raw) in self.backend.scan(&prefix).await? {
            out.push(serde_json::from_value(raw)?);
        }
        Ok(out)
    }

    /// Delete a spec and its status. Returns whether the spec existed.
    pub async fn delete<T: Object>(&self, id: &str) -> Result<bool> {
        let existed = self.backend.delete(&spec_key(T::KIND, id)).await?;
        self.backend.delete(&status_key(T::KIND, id)).await?;
        if existed {
            let _ = self.events.send(WatchEvent {
                kind: T::KIND,
                id: id.to_string(),
                op: WatchOp::Deleted,
            });
        }
        Ok(existed)
    }

    /// Write a status sub-record. Fails with `Conflict` when a newer status
    /// (higher observed generation) is already stored.
    pub async fn write_status<S: StatusRecord>(&self, id: &str, status: &S) -> Result<()> {
        let key = status_key(S::KIND, id);
        if let Some(current) = self.read_key::<S>(&key).await? {
            if current.observed_generation() > status.observed_generation() {
                return Err(ControlError::Conflict(format!(
                    "{} {id}: stored status observes generation {}, write observes {}",
                    S::KIND,
                    current.observed_generation(),
                    status.observed_generation()
                )));
            }
        }
        self.write_key(&key, status).await
    }

    /// Fetch a status sub-record.
    pub async fn read_status<S: StatusRecord>(&self, id: &str) -> Result<Option<S>> {
        self.read_key(&status_key(S::KIND, id)).await
    }

    async fn read_key<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    async fn write_key<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.backend.put(key, serde_json::to_value(value)?).await
    }
}

fn spec_key(kind: Kind, id: &str) -> String {
    format!("spec:{kind}:{id}")
}

fn status_key(kind: Kind, id: &str) -> String {
    format!("status:{kind}:{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronetes_types::{
        AgentClassId, GpuRequirements, PoolId, PoolSpec, PoolStatus, TopologyClass,
    };

    fn pool(id: &str) -> PoolSpec {
        PoolSpec {
            id: PoolId::from(id),
            agent_class_ref: AgentClassId::from("ac1"),
            min_replicas: 1,
            max_replicas: 4,
            prewarm_fraction: 0.0,
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

    #[tokio::test]
    async fn apply_sets_and_bumps_generation_on_change_only() {
        let store = Store::memory();
        let stored = store.apply(pool("p1")).await.unwrap();
        assert_eq!(stored.generation, 1);

        // Identical body: generation untouched.
        let stored = store.apply(pool("p1")).await.unwrap();
        assert_eq!(stored.generation, 1);

        let mut changed = pool("p1");
        changed.max_replicas = 8;
        let stored = store.apply(changed).await.unwrap();
        assert_eq!(stored.generation, 2);
    }

    #[tokio::test]
    async fn watch_sees_applies_and_deletes() {
        let store = Store::memory();
        let mut watch = store.watch();
        store.apply(pool("p1")).await.unwrap();
        let event = watch.recv().await.unwrap();
        assert_eq!(event.kind, Kind::Pool);
        assert_eq!(event.op, WatchOp::Applied);

        // Unchanged re-apply is silent.
        store.apply(pool("p1")).await.unwrap();
        store.delete::<PoolSpec>("p1").await.unwrap();
        let event = watch.recv().await.unwrap();
        assert_eq!(event.op, WatchOp::Deleted);
    }

    #[tokio::test]
    async fn status_write_conflicts_on_regression() {
        let store = Store::memory();
        store.apply(pool("p1")).await.unwrap();
        let newer = PoolStatus {
            observed_generation: 3,
            ..Default::default()
        };
        store.write_status("p1", &newer).await.unwrap();
        let older = PoolStatus {
            observed_generation: 2,
            ..Default::default()
        };
        let err = store.write_status("p1", &older).await.unwrap_err();
        assert!(matches!(err, ControlError::Conflict(_)));
    }

    #[tokio::test]
    async fn sled_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("records")).unwrap();
        store.apply(pool("p1")).await.unwrap();
        let fetched: Option<PoolSpec> = store.get("p1").await.unwrap();
        assert_eq!(fetched.unwrap().id, PoolId::from("p1"));
        assert_eq!(store.list::<PoolSpec>().await.unwrap().len(), 1);
        assert!(store.delete::<PoolSpec>("p1").await.unwrap());
        assert!(store.get::<PoolSpec>("p1").await.unwrap().is_none());
    }
}
