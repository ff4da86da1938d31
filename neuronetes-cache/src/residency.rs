//! Per-node residency bookkeeping.
//!
//! Each node's cached models form a priority queue keyed by
//! `(priority, pin-remaining, last-used)` ascending, so the minimum entry is
//! the eviction victim. Only the cache manager mutates these records; the
//! scheduler reads presence scores.

use dashmap::DashMap;
use neuronetes_types::{
    CachePriority, ControlError, ModelId, NodeId, ResidencyRecord, ResidencyState, Result,
    SharedClock,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Parameters of one load.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Model to load.
    pub model: ModelId,
    /// Bytes the weights occupy.
    pub bytes: u64,
    /// Eviction tier.
    pub priority: CachePriority,
    /// Residency pin applied on load, if any.
    pub pin_for: Option<std::time::Duration>,
}

/// Outcome of asking to start a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStart {
    /// A Loading entry was created; the caller drives the load.
    Started,
    /// A load for this (node, model) is already in flight; coalesce.
    AlreadyLoading,
    /// The weights are already Ready; last-used was touched.
    AlreadyReady,
    /// Capacity requires evicting the named victim first. The victim has
    /// been marked Evicting; call `finish_eviction` once it is gone, then
    /// retry.
    NeedsEviction(ModelId),
}

struct Entry {
    record: ResidencyRecord,
    priority: CachePriority,
    refs: u32,
}

struct NodeResidency {
    capacity_bytes: u64,
    entries: HashMap<ModelId, Entry>,
}

impl NodeResidency {
    fn used_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.record.bytes).sum()
    }
}

/// The per-node residency map.
pub struct ResidencyMap {
    nodes: DashMap<NodeId, Arc<Mutex<NodeResidency>>>,
    clock: SharedClock,
}

impl ResidencyMap {
    /// Create an empty map.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            nodes: DashMap::new(),
            clock,
        }
    }

    /// Register a node's cache capacity, creating its residency table.
    pub fn ensure_node(&self, node: &NodeId, capacity_bytes: u64) {
        self.nodes
            .entry(node.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(NodeResidency {
                    capacity_bytes,
                    entries: HashMap::new(),
                }))
            })
            .lock()
            .capacity_bytes = capacity_bytes;
    }

    /// Forget a node entirely.
    pub fn remove_node(&self, node: &NodeId) {
        self.nodes.remove(node);
    }

    /// Ask to start loading a model. At most one load per (node, model) is
    /// ever in flight: concurrent requests coalesce onto the existing entry.
    pub fn begin_load(&self, node: &NodeId, request: &LoadRequest) -> Result<LoadStart> {
        let entry = self
            .nodes
            .get(node)
            .ok_or_else(|| ControlError::NodeGone(node.clone()))?;
        let mut residency = entry.lock();
        let now = self.clock.now();

        if let Some(existing) = residency.entries.get_mut(&request.model) {
            return Ok(match existing.record.state {
                ResidencyState::Loading => LoadStart::AlreadyLoading,
                ResidencyState::Ready => {
                    existing.record.last_used = now;
                    LoadStart::AlreadyReady
                }
                // The previous copy is on its way out; wait for it.
                ResidencyState::Evicting => LoadStart::AlreadyLoading,
            });
        }

        if residency.used_bytes() + request.bytes > residency.capacity_bytes {
            let victim = residency
                .entries
                .iter()
                .filter(|(_, e)| {
                    e.refs == 0 && e.record.state == ResidencyState::Ready && !e.record.pinned(now)
                })
                .min_by_key(|(_, e)| {
                    let pin_remaining = e
                        .record
                        .pinned_until
                        .map(|until| (until - now).num_milliseconds().max(0))
                        .unwrap_or(0);
                    (e.priority, pin_remaining, e.record.last_used)
                })
                .map(|(model, _)| model.clone());
            return match victim {
                Some(model) => {
                    if let Some(entry) = residency.entries.get_mut(&model) {
                        entry.record.state = ResidencyState::Evicting;
                    }
                    debug!(node = %node, victim = %model, "eviction selected for load");
                    Ok(LoadStart::NeedsEviction(model))
                }
                None => Err(ControlError::NoCacheRoom {
                    node: node.clone(),
                    model: request.model.clone(),
                }),
            };
        }

        let pinned_until = request
            .pin_for
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);
        residency.entries.insert(
            request.model.clone(),
            Entry {
                record: ResidencyRecord {
                    node_ref: node.clone(),
                    model_ref: request.model.clone(),
                    state: ResidencyState::Loading,
                    last_used: now,
                    pinned_until,
                    bytes: request.bytes,
                },
                priority: request.priority,
                refs: 0,
            },
        );
        Ok(LoadStart::Started)
    }

    /// Mark a load complete: Loading -> Ready.
    pub fn finish_load(&self, node: &NodeId, model: &ModelId) {
        self.with_entry(node, model, |entry| {
            entry.record.state = ResidencyState::Ready;
            entry.record.last_used = self.clock.now();
        });
    }

    /// Drop a failed load's entry so a retry can start fresh.
    pub fn fail_load(&self, node: &NodeId, model: &ModelId) {
        if let Some(entry) = self.nodes.get(node) {
            let mut residency = entry.lock();
            if residency
                .entries
                .get(model)
                .map(|e| e.record.state == ResidencyState::Loading)
                .unwrap_or(false)
            {
                residency.entries.remove(model);
            }
        }
    }

    /// Mark a Ready entry Evicting on behalf of policy. Referenced and
    /// pinned entries refuse.
    pub fn mark_evicting(&self, node: &NodeId, model: &ModelId) -> Result<()> {
        let entry = self
            .nodes
            .get(node)
            .ok_or_else(|| ControlError::NodeGone(node.clone()))?;
        let mut residency = entry.lock();
        let now = self.clock.now();
        let e = residency
            .entries
            .get_mut(model)
            .ok_or_else(|| ControlError::NotFound {
                kind: "residency",
                id: format!("{node}/{model}"),
            })?;
        if e.record.state != ResidencyState::Ready {
            return Err(ControlError::Conflict(format!(
                "model {model} on node {node} is {:?}, not Ready",
                e.record.state
            )));
        }
        if e.refs > 0 {
            return Err(ControlError::PolicyRefused(format!(
                "model {model} on node {node} is referenced by {} replicas",
                e.refs
            )));
        }
        if e.record.pinned(now) {
            return Err(ControlError::PolicyRefused(format!(
                "model {model} on node {node} is pinned"
            )));
        }
        e.record.state = ResidencyState::Evicting;
        Ok(())
    }

    /// Remove an Evicting entry once the executor confirmed removal.
    pub fn finish_eviction(&self, node: &NodeId, model: &ModelId) {
        if let Some(entry) = self.nodes.get(node) {
            let mut residency = entry.lock();
            if residency
                .entries
                .get(model)
                .map(|e| e.record.state == ResidencyState::Evicting)
                .unwrap_or(false)
            {
                residency.entries.remove(model);
            }
        }
    }

    /// Refresh last-used, e.g. when the scheduler places against the entry.
    pub fn touch(&self, node: &NodeId, model: &ModelId) {
        self.with_entry(node, model, |entry| {
            entry.record.last_used = self.clock.now();
        });
    }

    /// A replica on `node` started referencing `model`.
    pub fn add_ref(&self, node: &NodeId, model: &ModelId) {
        self.with_entry(node, model, |entry| entry.refs += 1);
    }

    /// A replica on `node` stopped referencing `model`.
    pub fn remove_ref(&self, node: &NodeId, model: &ModelId) {
        self.with_entry(node, model, |entry| {
            entry.refs = entry.refs.saturating_sub(1)
        });
    }

    /// Scheduler scoring input: 1.0 Ready, 0.5 Loading, 0.0 otherwise.
    pub fn presence_score(&self, node: &NodeId, model: &ModelId) -> f64 {
        self.nodes
            .get(node)
            .and_then(|entry| {
                entry.lock().entries.get(model).map(|e| match e.record.state {
                    ResidencyState::Ready => 1.0,
                    ResidencyState::Loading => 0.5,
                    ResidencyState::Evicting => 0.0,
                })
            })
            .unwrap_or(0.0)
    }

    /// Residency state of a (node, model), if any.
    pub fn state(&self, node: &NodeId, model: &ModelId) -> Option<ResidencyState> {
        self.nodes
            .get(node)
            .and_then(|entry| entry.lock().entries.get(model).map(|e| e.record.state))
    }

    /// Models Ready on `node`, for the inventory mirror.
    pub fn ready_models(&self, node: &NodeId) -> BTreeSet<ModelId> {
        self.nodes
            .get(node)
            .map(|entry| {
                entry
                    .lock()
                    .entries
                    .iter()
                    .filter(|(_, e)| e.record.state == ResidencyState::Ready)
                    .map(|(model, _)| model.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes where `model` is Ready.
    pub fn nodes_with_ready(&self, model: &ModelId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .lock()
                    .entries
                    .get(model)
                    .map(|e| e.record.state == ResidencyState::Ready)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// All residency records on `node`.
    pub fn records(&self, node: &NodeId) -> Vec<ResidencyRecord> {
        self.nodes
            .get(node)
            .map(|entry| {
                entry
                    .lock()
                    .entries
                    .values()
                    .map(|e| e.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn with_entry<F: FnOnce(&mut Entry)>(&self, node: &NodeId, model: &ModelId, f: F) {
        if let Some(entry) = self.nodes.get(node) {
            if let Some(e) = entry.lock().entries.get_mut(model) {
                f(e);
            }
        }
    }
}
