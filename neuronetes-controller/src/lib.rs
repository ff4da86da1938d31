//! Controller harness.
//!
//! Owns the reconcile loop that wires the core components together: one
//! deduped, rate-limited work queue per record kind, a configurable number
//! of workers with key-level serialization, lease-based leader election so
//! only one instance mutates, and per-kind reconcilers that each read
//! desired and observed state, call one core component, and write status
//! back with the observed generation.

pub mod config;
pub mod context;
pub mod harness;
pub mod leader;
pub mod node_source;
pub mod reconcilers;
pub mod runtime_log;
pub mod telemetry;
pub mod tracker;
pub mod workqueue;

pub use config::ControllerConfig;
pub use context::ControlContext;
pub use harness::Controller;
pub use leader::LeaderElection;
pub use node_source::{NodeSource, StaticNodeSource};
pub use tracker::ReplicaTracker;
pub use workqueue::WorkQueue;
