//! Data-plane session router.
//!
//! Maps incoming requests to Serving replicas with session stickiness that
//! survives replica churn. New sessions land by weighted random over the
//! pool's Serving replicas (weight = remaining session capacity); bound
//! sessions stick to their replica while it stays routable. Draining
//! replicas keep their sessions until completion or TTL; gone replicas
//! trigger a rebind flagged `session-handoff: true`. Rebinds are monotonic:
//! a session never reverts to a replica it already left.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use neuronetes_types::{
    ControlError, PoolId, PoolSpec, ReplicaId, Result, SessionBinding, SessionKey, SharedClock,
};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::collections::HashMap;
use tracing::{debug, info};

/// Router-wide configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Header consulted for the session key when the pool does not name one.
    pub default_session_header: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_session_header: "x-session-id".to_string(),
        }
    }
}

/// An incoming request, reduced to what routing needs.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    /// Header map, keys lowercased.
    pub headers: BTreeMap<String, String>,
    /// Parsed request body, if routing should look for a body field.
    pub body: Option<serde_json::Value>,
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    /// Chosen replica.
    pub replica: ReplicaId,
    /// Its data-plane endpoint.
    pub endpoint: String,
    /// Session key the decision is bound to, when one was present.
    pub session_key: Option<SessionKey>,
    /// True when an existing session lost its replica and was rebound; the
    /// caller surfaces this as the `session-handoff` header.
    pub handoff: bool,
}

struct ReplicaEntry {
    endpoint: String,
    draining: bool,
}

struct PoolTable {
    replicas: HashMap<ReplicaId, ReplicaEntry>,
    ttl: chrono::Duration,
    max_sessions: u32,
    affinity_key: Option<String>,
}

/// The session router.
pub struct SessionRouter {
    config: RouterConfig,
    clock: SharedClock,
    pools: DashMap<PoolId, Mutex<PoolTable>>,
    sessions: DashMap<(PoolId, SessionKey), SessionBinding>,
    load: DashMap<ReplicaId, u32>,
}

impl SessionRouter {
    /// Create an empty router.
    pub fn new(config: RouterConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            pools: DashMap::new(),
            sessions: DashMap::new(),
            load: DashMap::new(),
        }
    }

    /// Register or update a pool's routing parameters.
    pub fn configure_pool(&self, spec: &PoolSpec) {
        let ttl = chrono::Duration::seconds(spec.session_ttl_secs as i64);
        match self.pools.get(&spec.id) {
            Some(entry) => {
                let mut table = entry.lock();
                table.ttl = ttl;
                table.max_sessions = spec.max_sessions_per_replica;
                table.affinity_key = spec.session_affinity_key.clone();
            }
            None => {
                self.pools.insert(
                    spec.id.clone(),
                    Mutex::new(PoolTable {
                        replicas: HashMap::new(),
                        ttl,
                        max_sessions: spec.max_sessions_per_replica,
                        affinity_key: spec.session_affinity_key.clone(),
                    }),
                );
            }
        }
    }

    /// Drop a pool and every session bound in it.
    pub fn remove_pool(&self, pool: &PoolId) {
        self.pools.remove(pool);
        self.sessions.retain(|(p, _), binding| {
            if p == pool {
                self.decrement_load(&binding.replica_ref);
                false
            } else {
                true
            }
        });
    }

    /// A replica became Serving at `endpoint`.
    pub fn upsert_replica(&self, pool: &PoolId, replica: &ReplicaId, endpoint: String) {
        if let Some(entry) = self.pools.get(pool) {
            entry.lock().replicas.insert(
                replica.clone(),
                ReplicaEntry {
                    endpoint,
                    draining: false,
                },
            );
        }
    }

    /// A replica started draining: existing sessions keep routing to it,
    /// new sessions do not.
    pub fn mark_draining(&self, pool: &PoolId, replica: &ReplicaId) {
        if let Some(entry) = self.pools.get(pool) {
            if let Some(r) = entry.lock().replicas.get_mut(replica) {
                r.draining = true;
            }
        }
        info!(pool = %pool, replica = %replica, "replica draining, sessions pinned until TTL");
    }

    /// A replica is gone. Its sessions rebind (with handoff) on their next
    /// request, or are retired by the sweep.
    pub fn remove_replica(&self, pool: &PoolId, replica: &ReplicaId) {
        if let Some(entry) = self.pools.get(pool) {
            entry.lock().replicas.remove(replica);
        }
        self.load.remove(replica);
    }

    /// Sessions currently bound to `replica`.
    pub fn session_count(&self, replica: &ReplicaId) -> u32 {
        self.load.get(replica).map(|v| *v).unwrap_or(0)
    }

    /// Serving (non-draining) replicas registered for `pool`.
    pub fn serving_count(&self, pool: &PoolId) -> usize {
        self.pools
            .get(pool)
            .map(|entry| entry.lock().replicas.values().filter(|r| !r.draining).count())
            .unwrap_or(0)
    }

    /// Route one request.
    pub fn route(&self, pool: &PoolId, request: &RouteRequest) -> Result<RouteDecision> {
        let table_entry = self
            .pools
            .get(pool)
            .ok_or_else(|| ControlError::NoReplicaAvailable(pool.clone()))?;
        let now = self.clock.now();
        let mut table = table_entry.lock();

        let session_key = self.extract_key(&table, request);
        let Some(key) = session_key else {
            // Session-less request: stateless weighted pick.
            let (replica, endpoint) = pick_weighted(&table, &self.load, &[])?
                .ok_or_else(|| ControlError::NoReplicaAvailable(pool.clone()))?;
            return Ok(RouteDecision {
                replica,
                endpoint,
                session_key: None,
                handoff: false,
            });
        };

        let map_key = (pool.clone(), key.clone());
        if let Some(mut binding) = self.sessions.get_mut(&map_key) {
            let bound = binding.replica_ref.clone();
            let entry_state = table
                .replicas
                .get(&bound)
                .map(|r| (r.endpoint.clone(), r.draining));
            match entry_state {
                Some((endpoint, _)) if !binding.expired(now) => {
                    // Sticky hit; draining replicas keep serving bound
                    // sessions until TTL.
                    binding.last_use = now;
                    binding.ttl_deadline = now + table.ttl;
                    return Ok(RouteDecision {
                        replica: bound,
                        endpoint,
                        session_key: Some(key),
                        handoff: false,
                    });
                }
                Some((endpoint, draining)) => {
                    // TTL expired. A still-Serving replica just renews; a
                    // draining one hands the session off.
                    if !draining {
                        binding.last_use = now;
                        binding.ttl_deadline = now + table.ttl;
                        return Ok(RouteDecision {
                            replica: bound,
                            endpoint,
                            session_key: Some(key),
                            handoff: false,
                        });
                    }
                }
                None => {}
            }

            // Rebind: the bound replica is draining-past-TTL or gone.
            let mut exclude = binding.previous.clone();
            exclude.push(bound.clone());
            drop(binding);
            let picked = pick_weighted(&table, &self.load, &exclude)?;
            let Some((replica, endpoint)) = picked else {
                return Err(ControlError::NoReplicaAvailable(pool.clone()));
            };
            self.decrement_load(&bound);
            self.increment_load(&replica);
            let mut previous = exclude;
            previous.dedup();
            self.sessions.insert(
                map_key,
                SessionBinding {
                    session_key: key.clone(),
                    replica_ref: replica.clone(),
                    pool_ref: pool.clone(),
                    last_use: now,
                    ttl_deadline: now + table.ttl,
                    previous,
                },
            );
            debug!(pool = %pool, session = %key, from = %bound, to = %replica, "session handoff");
            return Ok(RouteDecision {
                replica,
                endpoint,
                session_key: Some(key),
                handoff: true,
            });
        }

        // First request for this session.
        let picked = pick_weighted(&table, &self.load, &[])?;
        let Some((replica, endpoint)) = picked else {
            return Err(ControlError::NoReplicaAvailable(pool.clone()));
        };
        self.increment_load(&replica);
        self.sessions.insert(
            map_key,
            SessionBinding {
                session_key: key.clone(),
                replica_ref: replica.clone(),
                pool_ref: pool.clone(),
                last_use: now,
                ttl_deadline: now + table.ttl,
                previous: Vec::new(),
            },
        );
        Ok(RouteDecision {
            replica,
            endpoint,
            session_key: Some(key),
            handoff: false,
        })
    }

    /// Retire expired bindings and bindings whose replica left the routable
    /// set. Called once per reconcile tick. Returns how many were retired.
    ///
    /// Session entries and pool tables are never locked at the same time
    /// here; `route` nests them in the opposite order.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let snapshot: Vec<((PoolId, SessionKey), ReplicaId)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().replica_ref.clone()))
            .collect();

        let mut retired = 0;
        for ((pool, key), replica) in snapshot {
            let routable = self
                .pools
                .get(&pool)
                .map(|entry| entry.lock().replicas.contains_key(&replica))
                .unwrap_or(false);
            let removed = self
                .sessions
                .remove_if(&(pool.clone(), key.clone()), |_, binding| {
                    binding.replica_ref == replica && (binding.expired(now) || !routable)
                });
            if removed.is_some() {
                debug!(pool = %pool, session = %key, replica = %replica, "binding retired");
                self.decrement_load(&replica);
                retired += 1;
            }
        }
        retired
    }

    fn extract_key(&self, table: &PoolTable, request: &RouteRequest) -> Option<SessionKey> {
        let name = table
            .affinity_key
            .as_deref()
            .unwrap_or(&self.config.default_session_header);
        if let Some(value) = request.headers.get(&name.to_ascii_lowercase()) {
            if !value.is_empty() {
                return Some(SessionKey::from(value.as_str()));
            }
        }
        request
            .body
            .as_ref()
            .and_then(|body| body.get(name))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(SessionKey::from)
    }

    fn increment_load(&self, replica: &ReplicaId) {
        *self.load.entry(replica.clone()).or_insert(0) += 1;
    }

    fn decrement_load(&self, replica: &ReplicaId) {
        if let Some(mut count) = self.load.get_mut(replica) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Weighted random pick over Serving (non-draining) replicas, weight =
/// remaining session capacity. When every candidate is at capacity the
/// least-loaded one is chosen, so admission only fails with zero candidates.
fn pick_weighted(
    table: &PoolTable,
    load: &DashMap<ReplicaId, u32>,
    exclude: &[ReplicaId],
) -> Result<Option<(ReplicaId, String)>> {
    let candidates: Vec<(&ReplicaId, &ReplicaEntry, u32)> = table
        .replicas
        .iter()
        .filter(|(id, entry)| !entry.draining && !exclude.contains(id))
        .map(|(id, entry)| {
            let current = load.get(id).map(|v| *v).unwrap_or(0);
            (id, entry, table.max_sessions.saturating_sub(current))
        })
        .collect();
    if candidates.is_empty() {
        return Ok(None);
    }
    let total: u64 = candidates.iter().map(|(_, _, w)| *w as u64).sum();
    if total == 0 {
        let least = candidates
            .iter()
            .min_by_key(|(id, _, _)| load.get(*id).map(|v| *v).unwrap_or(0))
            .map(|(id, entry, _)| ((*id).clone(), entry.endpoint.clone()));
        return Ok(least);
    }
    let mut point = rand::thread_rng().gen_range(0..total);
    for (id, entry, weight) in &candidates {
        if point < *weight as u64 {
            return Ok(Some(((*id).clone(), entry.endpoint.clone())));
        }
        point -= *weight as u64;
    }
    Ok(candidates
        .last()
        .map(|(id, entry, _)| ((*id).clone(), entry.endpoint.clone())))
}
