//! Pinot table size exporter.
//!
//! Discovers Pinot controllers (one configured controller, or Kubernetes
//! Services matching a label selector), keeps each controller's table
//! list current, and collects every table's size into a gauge served on
//! `/metrics` for Prometheus.
//!
//! Per controller:
//! - a poller lists tables every `poll_freq_seconds`
//! - a fan-out hands each list to a table cache and a collector pool
//! - the pool fetches table sizes with at most N requests in flight

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

mod cluster;
mod config;
mod directory;
mod discovery;
mod error;
mod metrics;
mod pipeline;
mod pool;
mod server;
mod types;

#[cfg(test)]
mod testing;

use cluster::ClusterManager;
use config::{Config, Mode};
use directory::controller::ControllerClient;
use discovery::kubernetes::KubernetesDiscovery;
use discovery::{EndpointDiscovery, StaticDiscovery};
use metrics::TableSizeGauges;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "pinot-exporter", version, about = "Export Pinot table sizes for Prometheus")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "pinotexporter.yaml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the scrape endpoint port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the controller URL (direct mode).
    #[arg(long)]
    controller_url: Option<String>,

    /// Override the table poll interval.
    #[arg(long)]
    poll_freq_seconds: Option<u64>,

    /// Override the per-endpoint collector limit.
    #[arg(long)]
    max_parallel_collectors: Option<usize>,
}

impl Args {
    /// Command-line values win over the config file.
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(url) = &self.controller_url {
            config = config.with_controller(url.as_str());
        }
        if let Some(seconds) = self.poll_freq_seconds {
            config = config.with_poll_frequency_seconds(seconds);
        }
        if let Some(workers) = self.max_parallel_collectors {
            config = config.with_max_parallel_collectors(workers);
        }
        config
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pinot_exporter=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("pinot-exporter v{}", env!("CARGO_PKG_VERSION"));

    let config = args.apply_overrides(Config::from_file(&args.config)?);
    config.validate().context("Invalid configuration")?;
    info!(
        mode = ?config.mode,
        port = config.port,
        poll_secs = config.poll_freq_seconds,
        workers = config.max_parallel_collectors,
        "configuration loaded"
    );

    // ── Controller Client ───────────────────────────────────────────
    let directory = Arc::new(
        ControllerClient::new(config.request_timeout()).context("Failed to build controller client")?,
    );

    // ── Endpoint Discovery ──────────────────────────────────────────
    let discovery: Arc<dyn EndpointDiscovery> = match config.mode {
        Mode::Direct => {
            let endpoint = config
                .controller_endpoint()
                .context("controller config missing")?;
            info!(endpoint = %endpoint, "monitoring a single controller");
            Arc::new(StaticDiscovery::single(endpoint))
        }
        Mode::Kubernetes => {
            let k8s = KubernetesDiscovery::from_config(&config.service_discovery, config.request_timeout())
                .context("Failed to set up Kubernetes discovery")?;
            info!(selector = %k8s.selector(), "discovering controllers from Kubernetes services");
            Arc::new(k8s)
        }
    };

    // ── Cluster Manager ─────────────────────────────────────────────
    let gauges = Arc::new(TableSizeGauges::new());
    let manager = ClusterManager::new(directory, gauges.clone(), config.pipeline_settings());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(manager.run(discovery, config.discovery_refresh(), shutdown_rx));

    // ── Metrics Server ──────────────────────────────────────────────
    let served = server::serve(config.port, gauges, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    })
    .await;

    // If the server failed, dropping its shutdown future dropped
    // `shutdown_tx`, which stops the driver as well.
    if let Err(e) = driver.await {
        error!(error = %e, "cluster manager ended abnormally");
    }

    info!("pinot-exporter stopped");
    served
}
