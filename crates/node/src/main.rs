use anyhow::{Context, Result};
use clap::Parser;
use mesh_core::{Config, HttpTransport, MockTransport, Node, NodeIdentity, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "node")]
#[command(about = "Mesh traffic simulator instance - answers echo requests and sends paced traffic to grid peers")]
struct Args {
    /// Path to configuration file (optional, defaults apply without one)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Transport mode: http or mock
    #[arg(long, default_value = "http")]
    mode: String,

    /// Instance name, e.g. gc-ns-1-rs-2-7c9f8 (overrides config, falls back to $HOSTNAME)
    #[arg(long)]
    name: Option<String>,

    /// Address the responder binds to (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Statistics logging interval in seconds
    #[arg(long)]
    stats_interval: Option<f64>,

    /// Number of connections to send per stats interval
    #[arg(long)]
    connections_per_interval: Option<u64>,

    /// Number of concurrent requests per batch
    #[arg(long)]
    batch_size: Option<u32>,

    /// Number of namespaces (gc-ns-1 to gc-ns-N)
    #[arg(long)]
    no_namespaces: Option<u32>,

    /// Number of deployments per namespace
    #[arg(long)]
    no_deployments: Option<u32>,

    /// Percentage of connections to same namespace, next deployment
    #[arg(long)]
    same_ns_ratio: Option<f64>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.name {
            config.node.name = Some(name.clone());
        }
        if let Some(bind) = &self.bind {
            config.node.bind = bind.clone();
        }
        if let Some(v) = self.stats_interval {
            config.rate.stats_interval_secs = v;
        }
        if let Some(v) = self.connections_per_interval {
            config.rate.connections_per_interval = Some(v);
        }
        if let Some(v) = self.batch_size {
            config.rate.batch_size = v;
        }
        if let Some(v) = self.no_namespaces {
            config.topology.namespaces = v;
        }
        if let Some(v) = self.no_deployments {
            config.topology.deployments = v;
        }
        if let Some(v) = self.same_ns_ratio {
            config.topology.same_ns_ratio = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let name = match config.node.name.clone() {
        Some(name) => name,
        None => std::env::var("HOSTNAME")
            .context("HOSTNAME environment variable required when no --name is given")?,
    };
    let identity = NodeIdentity::resolve(&name)
        .with_context(|| format!("Failed to parse pod name {name}"))?;

    let transport: Arc<dyn Transport> = match args.mode.as_str() {
        "mock" => Arc::new(MockTransport::new(5)),
        "http" => Arc::new(
            HttpTransport::new(config.target.clone()).context("Failed to create HTTP transport")?,
        ),
        _ => anyhow::bail!("Invalid mode: {}, must be 'http' or 'mock'", args.mode),
    };

    let rate = config.rate_config()?;
    info!(
        "Starting {} at {} in {} mode",
        identity,
        identity.coord(),
        transport.name()
    );
    info!(
        "Grid: {} namespaces x {} deployments, same-namespace ratio {}%",
        config.topology.namespaces, config.topology.deployments, config.topology.same_ns_ratio
    );
    info!(
        "Rate: {} connections per {:?}, batch size {}",
        rate.connections_per_interval, rate.stats_interval, rate.batch_size
    );

    let listener = TcpListener::bind(&config.node.bind)
        .await
        .with_context(|| format!("Failed to bind responder to {}", config.node.bind))?;

    let node = Node::from_config(identity, &config, transport)?;
    let report = node.run_until(listener, wait_for_shutdown_signal()).await?;

    info!(
        "Stopped: {} batches, {} requests ({} ok, {} rejected, {} failed)",
        report.dispatch.batches,
        report.dispatch.requests,
        report.dispatch.succeeded,
        report.dispatch.application_errors,
        report.dispatch.failed
    );

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
