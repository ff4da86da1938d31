//! Lease-based leader election.
//!
//! The leader drives authoritative reconciles; followers idle on watch and
//! warm caches. The lease lives on the injected clock so tests can expire
//! it deterministically.

use chrono::{DateTime, Utc};
use neuronetes_types::{ControlError, Result, SharedClock};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::info;

struct LeaseState {
    holder: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Leader election manager for one process instance.
pub struct LeaderElection {
    node_id: String,
    lease_duration: Duration,
    state: Mutex<LeaseState>,
    clock: SharedClock,
}

impl LeaderElection {
    /// Create an election handle for this instance.
    pub fn new(node_id: String, lease_duration: Duration, clock: SharedClock) -> Self {
        Self {
            node_id,
            lease_duration,
            state: Mutex::new(LeaseState {
                holder: None,
                expires_at: None,
            }),
            clock,
        }
    }

    /// Whether this instance currently holds an unexpired lease.
    pub fn is_leader(&self) -> bool {
        let state = self.state.lock();
        let now = self.clock.now();
        state.holder.as_deref() == Some(&self.node_id)
            && state.expires_at.map(|at| at > now).unwrap_or(false)
    }

    /// Current lease holder, if the lease is live.
    pub fn leader_id(&self) -> Option<String> {
        let state = self.state.lock();
        let now = self.clock.now();
        if state.expires_at.map(|at| at > now).unwrap_or(false) {
            state.holder.clone()
        } else {
            None
        }
    }

    /// Try to take the lease. Succeeds when it is free, expired, or already
    /// ours.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let live = state.expires_at.map(|at| at > now).unwrap_or(false);
        if live && state.holder.as_deref() != Some(&self.node_id) {
            return false;
        }
        if state.holder.as_deref() != Some(&self.node_id) {
            info!(node = %self.node_id, "acquired leadership");
        }
        state.holder = Some(self.node_id.clone());
        state.expires_at = Some(now + self.lease_chrono());
        true
    }

    /// Extend the lease. Fails when this instance is not the leader.
    pub fn renew(&self) -> Result<()> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let ours = state.holder.as_deref() == Some(&self.node_id)
            && state.expires_at.map(|at| at > now).unwrap_or(false);
        if !ours {
            return Err(ControlError::Conflict(format!(
                "{} does not hold the leader lease",
                self.node_id
            )));
        }
        state.expires_at = Some(now + self.lease_chrono());
        Ok(())
    }

    /// Give up the lease.
    pub fn step_down(&self) {
        let mut state = self.state.lock();
        if state.holder.as_deref() == Some(&self.node_id) {
            info!(node = %self.node_id, "stepped down from leadership");
            state.holder = None;
            state.expires_at = None;
        }
    }

    /// This instance's identity.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn lease_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lease_duration).unwrap_or_else(|_| chrono::Duration::seconds(15))
    }
}
