//! Prometheus metrics and the observability listener.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use neuronetes_types::{ControlError, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::info;

/// Control-plane metrics.
pub struct Telemetry {
    registry: Registry,
    /// Reconciles by kind and outcome.
    pub reconciles: IntCounterVec,
    /// Reconcile wall time by kind.
    pub reconcile_seconds: HistogramVec,
    /// Replica counts by pool and state.
    pub pool_replicas: IntGaugeVec,
    /// Scaling decisions by pool and direction.
    pub scaling_decisions: IntCounterVec,
    /// Session bindings retired by the sweep.
    pub sessions_retired: IntCounterVec,
}

impl Telemetry {
    /// Build and register every metric.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let reconciles = IntCounterVec::new(
            Opts::new("neuronetes_reconciles_total", "Reconciles by kind and outcome"),
            &["kind", "outcome"],
        )
        .map_err(telemetry_err)?;
        let reconcile_seconds = HistogramVec::new(
            HistogramOpts::new("neuronetes_reconcile_seconds", "Reconcile duration"),
            &["kind"],
        )
        .map_err(telemetry_err)?;
        let pool_replicas = IntGaugeVec::new(
            Opts::new("neuronetes_pool_replicas", "Replica counts by pool and state"),
            &["pool", "state"],
        )
        .map_err(telemetry_err)?;
        let scaling_decisions = IntCounterVec::new(
            Opts::new(
                "neuronetes_scaling_decisions_total",
                "Scaling decisions by pool and direction",
            ),
            &["pool", "direction"],
        )
        .map_err(telemetry_err)?;
        let sessions_retired = IntCounterVec::new(
            Opts::new(
                "neuronetes_sessions_retired_total",
                "Session bindings retired by the sweep",
            ),
            &["pool"],
        )
        .map_err(telemetry_err)?;

        registry
            .register(Box::new(reconciles.clone()))
            .map_err(telemetry_err)?;
        registry
            .register(Box::new(reconcile_seconds.clone()))
            .map_err(telemetry_err)?;
        registry
            .register(Box::new(pool_replicas.clone()))
            .map_err(telemetry_err)?;
        registry
            .register(Box::new(scaling_decisions.clone()))
            .map_err(telemetry_err)?;
        registry
            .register(Box::new(sessions_retired.clone()))
            .map_err(telemetry_err)?;

        Ok(Self {
            registry,
            reconciles,
            reconcile_seconds,
            pool_replicas,
            scaling_decisions,
            sessions_retired,
        })
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(telemetry_err)?;
        String::from_utf8(buffer)
            .map_err(|e| ControlError::Internal(format!("metrics encoding: {e}")))
    }

    /// Serve `/metrics` and `/healthz` until the process exits.
    pub async fn serve(self: Arc<Self>, listen: &str) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(|| async { "ok" }))
            .with_state(self);
        let listener = tokio::net::TcpListener::bind(listen)
            .await
            .map_err(|e| ControlError::Transient(format!("cannot bind {listen}: {e}")))?;
        info!(%listen, "observability listener up");
        axum::serve(listener, app)
            .await
            .map_err(|e| ControlError::Transient(format!("observability listener: {e}")))
    }
}

async fn metrics_handler(State(telemetry): State<Arc<Telemetry>>) -> String {
    telemetry.render().unwrap_or_default()
}

fn telemetry_err<E: std::fmt::Display>(e: E) -> ControlError {
    ControlError::Internal(format!("telemetry: {e}"))
}
