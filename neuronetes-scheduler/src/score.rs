//! Candidate scoring.

use neuronetes_cache::ResidencyMap;
use neuronetes_inventory::NodeSnapshot;
use neuronetes_types::{
    CapacityClass, ControlError, ModelSpec, PoolSpec, Result, TopologyClass,
};

/// Weighted-sum scoring. Weights must sum to 1.0; the final score is scaled
/// to 0-100.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    /// Interconnect fit.
    pub topology: f64,
    /// Model already resident (Loading counts half).
    pub cache: f64,
    /// Capacity-class preference.
    pub cost: f64,
    /// Data-locality affinity target.
    pub locality: f64,
    /// Free-capacity headroom.
    pub headroom: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            topology: 0.25,
            cache: 0.20,
            cost: 0.15,
            locality: 0.10,
            headroom: 0.30,
        }
    }
}

impl ScoreWeights {
    /// Reject weight sets that do not sum to 1.0.
    pub fn validate(&self) -> Result<()> {
        let sum = self.topology + self.cache + self.cost + self.locality + self.headroom;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ControlError::Validation(format!(
                "scheduler score weights sum to {sum}, expected 1.0"
            )));
        }
        Ok(())
    }

    /// Score one candidate, 0-100.
    pub fn score(
        &self,
        pool: &PoolSpec,
        model: &ModelSpec,
        snapshot: &NodeSnapshot,
        residency: &ResidencyMap,
    ) -> f64 {
        let topology = topology_fit(pool, snapshot);
        let cache = residency.presence_score(&snapshot.fact.id, &model.id);
        let cost = cost_fit(pool, snapshot);
        let locality = locality_fit(pool, snapshot);
        let headroom = headroom_fit(pool, snapshot);

        (self.topology * topology
            + self.cache * cache
            + self.cost * cost
            + self.locality * locality
            + self.headroom * headroom)
            * 100.0
    }
}

/// Exact interconnect match 1.0, weaker locality 0.3, `any` 0.5.
fn topology_fit(pool: &PoolSpec, snapshot: &NodeSnapshot) -> f64 {
    match pool.gpu.topology_class {
        TopologyClass::Any => 0.5,
        required => {
            if snapshot.fact.interconnect.satisfies(required) {
                1.0
            } else {
                0.3
            }
        }
    }
}

/// Prefer-spot pools favor preemptible capacity; otherwise durable wins.
fn cost_fit(pool: &PoolSpec, snapshot: &NodeSnapshot) -> f64 {
    let preemptible = snapshot.fact.capacity_class == CapacityClass::Preemptible;
    if pool.cost.prefer_spot {
        if preemptible {
            1.0
        } else {
            0.6
        }
    } else if preemptible {
        0.6
    } else {
        1.0
    }
}

/// Co-location with a required affinity target scores 1.0, baseline 0.5.
fn locality_fit(pool: &PoolSpec, snapshot: &NodeSnapshot) -> f64 {
    match &pool.affinity.co_locate_label {
        Some(label) if snapshot.fact.labels.contains_key(label) => 1.0,
        _ => 0.5,
    }
}

/// Linear in free GPUs (or free MIG slots for MIG pools).
fn headroom_fit(pool: &PoolSpec, snapshot: &NodeSnapshot) -> f64 {
    match &pool.mig_profile {
        Some(profile) => {
            let total = snapshot
                .fact
                .mig_capacity
                .get(profile)
                .copied()
                .unwrap_or(0);
            if total == 0 {
                return 0.0;
            }
            snapshot.free_mig.get(profile).copied().unwrap_or(0) as f64 / total as f64
        }
        None => {
            if snapshot.fact.total_gpu_count == 0 {
                return 0.0;
            }
            snapshot.free_gpus as f64 / snapshot.fact.total_gpu_count as f64
        }
    }
}
