//! Model cache and warm-pool management.
//!
//! The residency map decides when a model's weights are loaded or evicted on
//! a node; the warm pool tracks pre-initialized, un-routed replicas per pool
//! so scale-up can bypass cold start. Both are in-memory and reconstructed
//! from the store plus node observations on leader takeover.

mod backoff;
mod manager;
mod residency;
mod warm;

pub use backoff::BackoffTracker;
pub use manager::{CacheManager, ResidencyOutcome};
pub use residency::{LoadRequest, LoadStart, ResidencyMap};
pub use warm::{desired_warm, replenish_quota, WarmPool, WarmReplica};
