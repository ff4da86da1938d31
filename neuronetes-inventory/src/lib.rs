//! Node inventory.
//!
//! Authoritative, read-optimised view of scheduler-relevant node facts. The
//! inventory is the single source of truth for node capacity: each node is
//! guarded by its own lock (the stripe), so concurrent reserves on distinct
//! nodes proceed in parallel while reserves on one node serialize. Reads
//! build consistent snapshots; callers tolerate one tick of staleness.

use dashmap::DashMap;
use neuronetes_types::{
    CapacityClass, ControlError, LabelSelector, MigProfile, ModelId, NodeFact, NodeId, ReplicaId,
    Result,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Resources one reservation asks for: full GPUs or a single MIG slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    /// Full GPUs wanted; ignored when `mig` is set.
    pub gpu_count: u32,
    /// MIG profile wanted instead of full GPUs.
    pub mig: Option<MigProfile>,
}

/// Concrete slots a reservation holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedSlots {
    /// Full-GPU slot indices.
    pub gpu_slots: Vec<u32>,
    /// MIG slot held, if any.
    pub mig_slot: Option<MigProfile>,
}

/// Change notification to the scheduler and cache manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Node became ready.
    Ready(NodeId),
    /// Node stopped accepting replicas.
    NotReady(NodeId),
    /// The node's resident-model set changed.
    ResidencyChanged(NodeId),
    /// Node left the inventory.
    Removed(NodeId),
}

/// Label/capacity filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Only nodes accepting replicas.
    pub require_ready: bool,
    /// Labels a node must carry with these values.
    pub labels: BTreeMap<String, String>,
    /// Expression requirements against the node's labels.
    pub selector: LabelSelector,
    /// Required GPU product type.
    pub gpu_type: Option<String>,
    /// Minimum free full GPUs.
    pub min_free_gpus: u32,
    /// Minimum memory per GPU.
    pub min_gpu_memory: u64,
    /// A free MIG slot of this profile must exist.
    pub mig_profile: Option<MigProfile>,
    /// Restrict to a capacity class.
    pub capacity_class: Option<CapacityClass>,
}

/// Point-in-time view of one node.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// Observed facts, with the assignment set reflecting current
    /// reservations.
    pub fact: NodeFact,
    /// Full GPUs not held by any reservation.
    pub free_gpus: u32,
    /// Free MIG slots per profile.
    pub free_mig: BTreeMap<MigProfile, u32>,
}

struct NodeState {
    fact: NodeFact,
    assigned: HashMap<ReplicaId, ReservedSlots>,
}

impl NodeState {
    fn used_gpu_slots(&self) -> BTreeSet<u32> {
        self.assigned
            .values()
            .flat_map(|r| r.gpu_slots.iter().copied())
            .collect()
    }

    fn free_gpu_slots(&self) -> Vec<u32> {
        let used = self.used_gpu_slots();
        (0..self.fact.total_gpu_count)
            .filter(|slot| !used.contains(slot))
            .collect()
    }

    fn mig_used(&self, profile: &MigProfile) -> u32 {
        self.assigned
            .values()
            .filter(|r| r.mig_slot.as_ref() == Some(profile))
            .count() as u32
    }

    fn free_mig(&self) -> BTreeMap<MigProfile, u32> {
        self.fact
            .mig_capacity
            .iter()
            .map(|(profile, total)| {
                (profile.clone(), total.saturating_sub(self.mig_used(profile)))
            })
            .collect()
    }

    fn snapshot(&self) -> NodeSnapshot {
        let mut fact = self.fact.clone();
        fact.assigned_replicas = self.assigned.keys().cloned().collect();
        NodeSnapshot {
            free_gpus: self.free_gpu_slots().len() as u32,
            free_mig: self.free_mig(),
            fact,
        }
    }
}

/// The inventory. One lock per node; the map itself is only touched to look
/// entries up or to add/remove nodes.
pub struct NodeInventory {
    nodes: DashMap<NodeId, Arc<Mutex<NodeState>>>,
    events: broadcast::Sender<NodeEvent>,
}

impl Default for NodeInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeInventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            nodes: DashMap::new(),
            events,
        }
    }

    /// Subscribe to node change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Insert or update a node from an external inventory observation.
    /// Reservation state survives updates; the observed assignment set is
    /// ignored in favor of what this inventory committed.
    pub fn upsert(&self, fact: NodeFact) {
        let id = fact.id.clone();
        match self.nodes.get(&id) {
            Some(entry) => {
                let mut state = entry.lock();
                let was_ready = state.fact.ready;
                let residency_changed = state.fact.resident_models != fact.resident_models;
                let assigned = std::mem::take(&mut state.fact.assigned_replicas);
                state.fact = fact;
                state.fact.assigned_replicas = assigned;
                let now_ready = state.fact.ready;
                drop(state);
                if was_ready != now_ready {
                    let event = if now_ready {
                        NodeEvent::Ready(id.clone())
                    } else {
                        NodeEvent::NotReady(id.clone())
                    };
                    let _ = self.events.send(event);
                }
                if residency_changed {
                    let _ = self.events.send(NodeEvent::ResidencyChanged(id));
                }
            }
            None => {
                let ready = fact.ready;
                info!(node = %id, gpus = fact.total_gpu_count, "node joined inventory");
                self.nodes.insert(
                    id.clone(),
                    Arc::new(Mutex::new(NodeState {
                        fact,
                        assigned: HashMap::new(),
                    })),
                );
                if ready {
                    let _ = self.events.send(NodeEvent::Ready(id));
                }
            }
        }
    }

    /// Drop a node from the inventory.
    pub fn remove(&self, id: &NodeId) {
        if self.nodes.remove(id).is_some() {
            info!(node = %id, "node left inventory");
            let _ = self.events.send(NodeEvent::Removed(id.clone()));
        }
    }

    /// Snapshot one node.
    pub fn get(&self, id: &NodeId) -> Option<NodeSnapshot> {
        self.nodes.get(id).map(|entry| entry.lock().snapshot())
    }

    /// Snapshot all nodes matching `filter`.
    pub fn list(&self, filter: &NodeFilter) -> Vec<NodeSnapshot> {
        let mut out = Vec::new();
        for entry in self.nodes.iter() {
            let snapshot = entry.value().lock().snapshot();
            if filter_matches(filter, &snapshot) {
                out.push(snapshot);
            }
        }
        out
    }

    /// Atomically reserve slots for `replica` on `node`. Re-reserving for a
    /// replica that already holds slots on the node is an idempotent no-op
    /// returning the existing grant.
    pub fn reserve(
        &self,
        node: &NodeId,
        replica: &ReplicaId,
        request: &SlotRequest,
    ) -> Result<ReservedSlots> {
        let entry = self
            .nodes
            .get(node)
            .ok_or_else(|| ControlError::NodeGone(node.clone()))?;
        let mut state = entry.lock();
        if !state.fact.ready {
            return Err(ControlError::NodeNotReady(node.clone()));
        }
        if let Some(existing) = state.assigned.get(replica) {
            return Ok(existing.clone());
        }
        let grant = match &request.mig {
            Some(profile) => {
                let capacity = state.fact.mig_capacity.get(profile).copied().unwrap_or(0);
                if state.mig_used(profile) >= capacity {
                    return Err(ControlError::CapacityExhausted(node.clone()));
                }
                ReservedSlots {
                    gpu_slots: Vec::new(),
                    mig_slot: Some(profile.clone()),
                }
            }
            None => {
                let free = state.free_gpu_slots();
                if (free.len() as u32) < request.gpu_count {
                    return Err(ControlError::CapacityExhausted(node.clone()));
                }
                ReservedSlots {
                    gpu_slots: free[..request.gpu_count as usize].to_vec(),
                    mig_slot: None,
                }
            }
        };
        debug!(node = %node, replica = %replica, ?grant, "slots reserved");
        state.assigned.insert(replica.clone(), grant.clone());
        state.fact.assigned_replicas.insert(replica.clone());
        Ok(grant)
    }

    /// Release `replica`'s reservation on `node`. Idempotent; unknown nodes
    /// and replicas are no-ops.
    pub fn release(&self, node: &NodeId, replica: &ReplicaId) {
        if let Some(entry) = self.nodes.get(node) {
            let mut state = entry.lock();
            if state.assigned.remove(replica).is_some() {
                state.fact.assigned_replicas.remove(replica);
                debug!(node = %node, replica = %replica, "reservation released");
            }
        }
    }

    /// Re-key a reservation once the runtime executor has assigned the
    /// authoritative replica id. Idempotent: if `to` already holds the
    /// reservation the call succeeds.
    pub fn rename_reservation(
        &self,
        node: &NodeId,
        from: &ReplicaId,
        to: &ReplicaId,
    ) -> Result<()> {
        let entry = self
            .nodes
            .get(node)
            .ok_or_else(|| ControlError::NodeGone(node.clone()))?;
        let mut state = entry.lock();
        if state.assigned.contains_key(to) {
            return Ok(());
        }
        match state.assigned.remove(from) {
            Some(grant) => {
                state.fact.assigned_replicas.remove(from);
                state.assigned.insert(to.clone(), grant);
                state.fact.assigned_replicas.insert(to.clone());
                Ok(())
            }
            None => Err(ControlError::NotFound {
                kind: "reservation",
                id: from.to_string(),
            }),
        }
    }

    /// Overwrite a node's resident-model set. Called by the cache manager
    /// after loads and evictions complete.
    pub fn set_resident_models(&self, node: &NodeId, models: BTreeSet<ModelId>) {
        if let Some(entry) = self.nodes.get(node) {
            let mut state = entry.lock();
            if state.fact.resident_models != models {
                state.fact.resident_models = models;
                drop(state);
                let _ = self.events.send(NodeEvent::ResidencyChanged(node.clone()));
            }
        }
    }

    /// Every (node, replica) reservation currently held. Used on leader
    /// takeover to release reservations with no matching replica record.
    pub fn assignments(&self) -> Vec<(NodeId, ReplicaId)> {
        let mut out = Vec::new();
        for entry in self.nodes.iter() {
            let state = entry.value().lock();
            for replica in state.assigned.keys() {
                out.push((entry.key().clone(), replica.clone()));
            }
        }
        out
    }
}

fn filter_matches(filter: &NodeFilter, snapshot: &NodeSnapshot) -> bool {
    let fact = &snapshot.fact;
    if filter.require_ready && !fact.ready {
        return false;
    }
    for (key, value) in &filter.labels {
        if fact.labels.get(key) != Some(value) {
            return false;
        }
    }
    if !filter.selector.matches(&fact.labels) {
        return false;
    }
    if let Some(gpu_type) = &filter.gpu_type {
        if &fact.gpu_type != gpu_type {
            return false;
        }
    }
    if snapshot.free_gpus < filter.min_free_gpus {
        return false;
    }
    if fact.gpu_memory_bytes < filter.min_gpu_memory {
        return false;
    }
    if let Some(profile) = &filter.mig_profile {
        if snapshot.free_mig.get(profile).copied().unwrap_or(0) == 0 {
            return false;
        }
    }
    if let Some(class) = filter.capacity_class {
        if fact.capacity_class != class {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuronetes_types::InterconnectClass;

    fn node(id: &str, gpus: u32) -> NodeFact {
        NodeFact {
            id: NodeId::from(id),
            labels: BTreeMap::new(),
            total_gpu_count: gpus,
            gpu_type: "h100".to_string(),
            gpu_memory_bytes: 80 << 30,
            interconnect: InterconnectClass::Nvlink,
            mig_capacity: BTreeMap::new(),
            resident_models: BTreeSet::new(),
            assigned_replicas: BTreeSet::new(),
            capacity_class: CapacityClass::Durable,
            ready: true,
            cache_capacity_bytes: 500 << 30,
        }
    }

    fn gpus(count: u32) -> SlotRequest {
        SlotRequest {
            gpu_count: count,
            mig: None,
        }
    }

    #[test]
    fn reserve_grants_distinct_slots_until_exhausted() {
        let inventory = NodeInventory::new();
        inventory.upsert(node("n1", 2));
        let id = NodeId::from("n1");

        let a = inventory.reserve(&id, &ReplicaId::from("r1"), &gpus(1)).unwrap();
        let b = inventory.reserve(&id, &ReplicaId::from("r2"), &gpus(1)).unwrap();
        assert_ne!(a.gpu_slots, b.gpu_slots);

        let err = inventory
            .reserve(&id, &ReplicaId::from("r3"), &gpus(1))
            .unwrap_err();
        assert!(matches!(err, ControlError::CapacityExhausted(_)));
    }

    #[test]
    fn re_reserve_is_idempotent() {
        let inventory = NodeInventory::new();
        inventory.upsert(node("n1", 2));
        let id = NodeId::from("n1");
        let replica = ReplicaId::from("r1");

        let first = inventory.reserve(&id, &replica, &gpus(2)).unwrap();
        let second = inventory.reserve(&id, &replica, &gpus(2)).unwrap();
        assert_eq!(first, second);
        assert_eq!(inventory.get(&id).unwrap().free_gpus, 0);
    }

    #[test]
    fn release_is_idempotent() {
        let inventory = NodeInventory::new();
        inventory.upsert(node("n1", 1));
        let id = NodeId::from("n1");
        let replica = ReplicaId::from("r1");

        inventory.reserve(&id, &replica, &gpus(1)).unwrap();
        inventory.release(&id, &replica);
        inventory.release(&id, &replica);
        assert_eq!(inventory.get(&id).unwrap().free_gpus, 1);
    }

    #[test]
    fn mig_slots_accounted_per_profile() {
        let mut fact = node("n1", 4);
        fact.mig_capacity.insert(MigProfile::from("1g.10gb"), 2);
        let inventory = NodeInventory::new();
        inventory.upsert(fact);
        let id = NodeId::from("n1");
        let request = SlotRequest {
            gpu_count: 0,
            mig: Some(MigProfile::from("1g.10gb")),
        };

        inventory.reserve(&id, &ReplicaId::from("r1"), &request).unwrap();
        inventory.reserve(&id, &ReplicaId::from("r2"), &request).unwrap();
        let err = inventory
            .reserve(&id, &ReplicaId::from("r3"), &request)
            .unwrap_err();
        assert!(matches!(err, ControlError::CapacityExhausted(_)));

        // Full GPUs remain unaffected by MIG reservations.
        assert_eq!(inventory.get(&id).unwrap().free_gpus, 4);
    }

    #[test]
    fn not_ready_nodes_refuse_reserves() {
        let mut fact = node("n1", 1);
        fact.ready = false;
        let inventory = NodeInventory::new();
        inventory.upsert(fact);
        let err = inventory
            .reserve(&NodeId::from("n1"), &ReplicaId::from("r1"), &gpus(1))
            .unwrap_err();
        assert!(matches!(err, ControlError::NodeNotReady(_)));
    }

    #[test]
    fn filter_narrows_by_capacity_and_labels() {
        let inventory = NodeInventory::new();
        let mut labeled = node("n1", 4);
        labeled.labels.insert("zone".to_string(), "a".to_string());
        inventory.upsert(labeled);
        inventory.upsert(node("n2", 1));

        let filter = NodeFilter {
            require_ready: true,
            min_free_gpus: 2,
            ..Default::default()
        };
        let matches = inventory.list(&filter);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fact.id, NodeId::from("n1"));

        let filter = NodeFilter {
            labels: [("zone".to_string(), "b".to_string())].into(),
            ..Default::default()
        };
        assert!(inventory.list(&filter).is_empty());
    }

    #[test]
    fn filter_applies_selector_expressions() {
        use neuronetes_types::{SelectorOperator, SelectorRequirement};

        let inventory = NodeInventory::new();
        let mut tiered = node("n1", 4);
        tiered.labels.insert("tier".to_string(), "inference".to_string());
        inventory.upsert(tiered);
        inventory.upsert(node("n2", 4));

        let filter = NodeFilter {
            selector: LabelSelector {
                match_labels: Default::default(),
                match_expressions: vec![SelectorRequirement {
                    key: "tier".to_string(),
                    operator: SelectorOperator::In,
                    values: vec!["inference".to_string()],
                }],
            },
            ..Default::default()
        };
        let matches = inventory.list(&filter);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fact.id, NodeId::from("n1"));
    }

    #[test]
    fn ready_flip_and_residency_change_notify() {
        let inventory = NodeInventory::new();
        let mut rx = inventory.subscribe();
        inventory.upsert(node("n1", 1));
        assert_eq!(rx.try_recv().unwrap(), NodeEvent::Ready(NodeId::from("n1")));

        let mut updated = node("n1", 1);
        updated.ready = false;
        inventory.upsert(updated);
        assert_eq!(
            rx.try_recv().unwrap(),
            NodeEvent::NotReady(NodeId::from("n1"))
        );

        inventory.set_resident_models(
            &NodeId::from("n1"),
            [ModelId::from("m1")].into_iter().collect(),
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            NodeEvent::ResidencyChanged(NodeId::from("n1"))
        );
    }

    #[test]
    fn rename_reservation_re_keys_the_grant() {
        let inventory = NodeInventory::new();
        inventory.upsert(node("n1", 1));
        let id = NodeId::from("n1");
        let tmp = ReplicaId::from("tmp");
        let real = ReplicaId::from("real");

        inventory.reserve(&id, &tmp, &gpus(1)).unwrap();
        inventory.rename_reservation(&id, &tmp, &real).unwrap();
        // Idempotent re-invocation.
        inventory.rename_reservation(&id, &tmp, &real).unwrap();

        let assignments = inventory.assignments();
        assert_eq!(assignments, vec![(id.clone(), real)]);
    }

    #[test]
    fn assignments_lists_orphan_candidates() {
        let inventory = NodeInventory::new();
        inventory.upsert(node("n1", 2));
        let id = NodeId::from("n1");
        inventory.reserve(&id, &ReplicaId::from("r1"), &gpus(1)).unwrap();
        inventory.reserve(&id, &ReplicaId::from("r2"), &gpus(1)).unwrap();
        assert_eq!(inventory.assignments().len(), 2);
    }
}
