//! Daemon configuration.
//!
//! Loading hierarchy: environment > file > defaults.

use neuronetes_types::{ControlError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for `neuronetesd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Path of the embedded record store.
    pub store_path: PathBuf,
    /// Reconcile workers per record kind.
    pub workers_per_kind: usize,
    /// Seconds between periodic reconcile ticks.
    pub tick_interval_secs: u64,
    /// Deadline for one reconcile.
    pub reconcile_budget_secs: u64,
    /// Leader lease duration.
    pub leader_lease_secs: u64,
    /// Listen address for /metrics and /healthz.
    pub metrics_listen: String,
    /// Concurrent upstream metric queries.
    pub metric_concurrency: usize,
    /// Scheduler candidate attempts before giving up.
    pub scheduler_max_attempts: usize,
    /// Whether the scheduler may emit preemption requests.
    pub enable_preemption: bool,
    /// Minutes of all-stale metrics before a pool degrades.
    pub metrics_grace_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("./neuronetes_db"),
            workers_per_kind: 5,
            tick_interval_secs: 15,
            reconcile_budget_secs: 30,
            leader_lease_secs: 15,
            metrics_listen: "0.0.0.0:9464".to_string(),
            metric_concurrency: 8,
            scheduler_max_attempts: 5,
            enable_preemption: false,
            metrics_grace_secs: 120,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `NEURONETES_*` environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ControlError::Validation(format!("cannot read config {path:?}: {e}"))
                })?;
                toml::from_str(&content)
                    .map_err(|e| ControlError::Validation(format!("invalid config: {e}")))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("NEURONETES_STORE_PATH") {
            self.store_path = PathBuf::from(path);
        }
        if let Ok(listen) = std::env::var("NEURONETES_METRICS_LISTEN") {
            self.metrics_listen = listen;
        }
        if let Ok(workers) = std::env::var("NEURONETES_WORKERS_PER_KIND") {
            if let Ok(workers) = workers.parse() {
                self.workers_per_kind = workers;
            }
        }
        if let Ok(tick) = std::env::var("NEURONETES_TICK_INTERVAL_SECS") {
            if let Ok(tick) = tick.parse() {
                self.tick_interval_secs = tick;
            }
        }
        if let Ok(flag) = std::env::var("NEURONETES_ENABLE_PREEMPTION") {
            self.enable_preemption = matches!(flag.as_str(), "1" | "true" | "yes");
        }
    }

    /// Validate field bounds.
    pub fn validate(&self) -> Result<()> {
        if self.workers_per_kind == 0 {
            return Err(ControlError::Validation(
                "workers_per_kind must be positive".into(),
            ));
        }
        if self.tick_interval_secs == 0 {
            return Err(ControlError::Validation(
                "tick_interval_secs must be positive".into(),
            ));
        }
        if self.reconcile_budget_secs == 0 {
            return Err(ControlError::Validation(
                "reconcile_budget_secs must be positive".into(),
            ));
        }
        if self.metric_concurrency == 0 {
            return Err(ControlError::Validation(
                "metric_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }
}
