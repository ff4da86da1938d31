//! Scale delegation planning.
//!
//! Scale-up draws warm replicas first; whatever remains goes to the
//! scheduler, whose cache-presence weight already prefers preloaded nodes
//! over cold ones. Scale-down ranks victims: replicas with no active
//! sessions first, then preemptible nodes, then oldest last-bind-time.

use chrono::{DateTime, Utc};
use neuronetes_cache::{WarmPool, WarmReplica};
use neuronetes_types::{NodeId, PoolId, ReplicaId, ReplicaState};

/// Scale-up delegation: warm activations plus cold placements.
#[derive(Debug, Clone)]
pub struct ScaleUpPlan {
    /// Warm replicas drawn for activation (router wiring only).
    pub activate: Vec<WarmReplica>,
    /// Replicas still needing a fresh placement through the scheduler.
    pub cold: u32,
}

/// Draw up to `needed` warm replicas and leave the rest for the scheduler.
pub fn plan_scale_up(warm: &WarmPool, pool: &PoolId, needed: u32) -> ScaleUpPlan {
    let activate = warm.acquire(pool, needed);
    let cold = needed - activate.len() as u32;
    ScaleUpPlan { activate, cold }
}

/// Controller-supplied view of one replica for victim selection.
#[derive(Debug, Clone)]
pub struct ReplicaView {
    /// Replica id.
    pub id: ReplicaId,
    /// Node it runs on.
    pub node: Option<NodeId>,
    /// Lifecycle state.
    pub state: ReplicaState,
    /// Last transition into Serving.
    pub last_bind_time: Option<DateTime<Utc>>,
    /// Sessions currently bound to it.
    pub active_sessions: u32,
    /// Whether its node is preemptible.
    pub preemptible: bool,
}

/// Pick `count` Serving replicas to drain, preferring (a) no active
/// sessions, (b) preemptible nodes, (c) oldest last-bind-time.
pub fn select_scale_down_victims(replicas: &[ReplicaView], count: u32) -> Vec<ReplicaId> {
    let mut serving: Vec<&ReplicaView> = replicas
        .iter()
        .filter(|r| r.state == ReplicaState::Serving)
        .collect();
    serving.sort_by_key(|r| {
        (
            r.active_sessions > 0,
            !r.preemptible,
            r.last_bind_time.unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    });
    serving
        .into_iter()
        .take(count as usize)
        .map(|r| r.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(
        id: &str,
        sessions: u32,
        preemptible: bool,
        bound_secs_ago: i64,
    ) -> ReplicaView {
        ReplicaView {
            id: ReplicaId::from(id),
            node: Some(NodeId::from("n1")),
            state: ReplicaState::Serving,
            last_bind_time: Some(Utc::now() - chrono::Duration::seconds(bound_secs_ago)),
            active_sessions: sessions,
            preemptible,
        }
    }

    #[test]
    fn idle_replicas_drain_before_busy_ones() {
        let replicas = vec![
            view("busy", 4, false, 1000),
            view("idle", 0, false, 10),
        ];
        assert_eq!(
            select_scale_down_victims(&replicas, 1),
            vec![ReplicaId::from("idle")]
        );
    }

    #[test]
    fn preemptible_nodes_drain_before_durable_ones() {
        let replicas = vec![
            view("durable", 0, false, 1000),
            view("spot", 0, true, 10),
        ];
        assert_eq!(
            select_scale_down_victims(&replicas, 1),
            vec![ReplicaId::from("spot")]
        );
    }

    #[test]
    fn oldest_bind_time_breaks_remaining_ties() {
        let replicas = vec![
            view("young", 0, false, 10),
            view("old", 0, false, 5000),
        ];
        assert_eq!(
            select_scale_down_victims(&replicas, 1),
            vec![ReplicaId::from("old")]
        );
    }

    #[test]
    fn only_serving_replicas_are_victims() {
        let mut draining = view("draining", 0, true, 5000);
        draining.state = ReplicaState::Draining;
        let replicas = vec![draining, view("serving", 2, false, 10)];
        assert_eq!(
            select_scale_down_victims(&replicas, 2),
            vec![ReplicaId::from("serving")]
        );
    }

    #[test]
    fn warm_first_then_cold() {
        let warm = WarmPool::new();
        let pool = PoolId::from("p1");
        for i in 0..2 {
            warm.register(
                &pool,
                WarmReplica {
                    replica: ReplicaId::from(format!("w{i}").as_str()),
                    node: NodeId::from("n1"),
                },
            );
        }
        let plan = plan_scale_up(&warm, &pool, 5);
        assert_eq!(plan.activate.len(), 2);
        assert_eq!(plan.cold, 3);
    }
}
