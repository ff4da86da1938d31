//! NeuroNetes control-plane daemon.

use anyhow::Context;
use clap::Parser;
use neuronetes_controller::runtime_log::LoggingRuntime;
use neuronetes_controller::{
    ControlContext, Controller, ControllerConfig, LeaderElection, StaticNodeSource,
};
use neuronetes_metrics::MemorySource;
use neuronetes_store::Store;
use neuronetes_types::{SharedClock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "neuronetesd")]
#[command(about = "NeuroNetes control plane: scheduler, autoscaler, cache and router")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). NEURONETES_* environment variables
    /// override file values.
    #[arg(long, env = "NEURONETES_CONFIG")]
    config: Option<PathBuf>,

    /// Identity used for leader election; defaults to the hostname.
    #[arg(long, env = "NEURONETES_INSTANCE_ID")]
    instance_id: Option<String>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_env("NEURONETES_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info,neuronetes=debug"));
    fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ControllerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let instance_id = cli.instance_id.unwrap_or_else(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "neuronetesd".to_string())
    });
    info!(
        instance = %instance_id,
        store = %config.store_path.display(),
        workers = config.workers_per_kind,
        cores = num_cpus::get(),
        "starting"
    );

    let clock: SharedClock = Arc::new(SystemClock);
    let store = Arc::new(Store::open(&config.store_path).context("opening record store")?);

    // The runtime executor and metric collector are external systems; the
    // daemon ships logging/in-memory adapters so the control plane runs dry
    // until real adapters are wired in.
    let metric_source = Arc::new(MemorySource::new(clock.clone(), Duration::from_secs(600)));
    let runtime = Arc::new(LoggingRuntime);
    let nodes = Arc::new(StaticNodeSource::default());

    let lease = Duration::from_secs(config.leader_lease_secs);
    let metrics_listen = config.metrics_listen.clone();
    let ctx = Arc::new(ControlContext::build(
        config,
        store,
        metric_source,
        runtime,
        nodes,
        clock.clone(),
    )?);

    let telemetry = Arc::clone(&ctx.telemetry);
    tokio::spawn(async move {
        if let Err(e) = telemetry.serve(&metrics_listen).await {
            tracing::error!(error = %e, "observability listener failed");
        }
    });

    let leader = Arc::new(LeaderElection::new(instance_id, lease, clock));
    let controller = Arc::new(Controller::new(ctx, leader));
    controller.resync().await;
    controller.run().await.context("controller loop")?;
    Ok(())
}
