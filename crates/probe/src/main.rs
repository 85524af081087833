use anyhow::{Context, Result};
use clap::Parser;
use mesh_core::{
    Config, HttpTransport, NodeIdentity, OutboundRequest, RequestCounter, RequestSender,
    RetryPolicy, SendOutcome, Topology,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "probe")]
#[command(about = "Send one echo request to each grid neighbour of an instance and report the outcome")]
struct Args {
    /// Path to configuration file (optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instance name to probe from, e.g. gc-ns-1-rs-2-probe
    #[arg(long)]
    name: String,

    /// Send every request to this host instead of the service name (e.g. 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Target service port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Request id to send
    #[arg(long, default_value_t = 1)]
    request_id: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(host) = &args.host {
        config.target.host_override = Some(host.clone());
    }
    if let Some(port) = args.port {
        config.target.service_port = port;
    }
    config.validate().context("Invalid configuration")?;

    let identity = NodeIdentity::resolve(&args.name)
        .with_context(|| format!("Failed to parse pod name {}", args.name))?;
    let topology = Topology::from_config(&config.topology);

    let transport = Arc::new(
        HttpTransport::new(config.target.clone()).context("Failed to create HTTP transport")?,
    );
    let sender = RequestSender::new(
        transport.clone(),
        RequestCounter::new(),
        RetryPolicy::from_config(&config.retry),
    );

    println!();
    println!("=== Probe from {} at {} ===", identity, identity.coord());

    let mut failures = 0u64;
    for (offset, target) in topology.neighbours(identity.coord()).into_iter().enumerate() {
        let request = OutboundRequest {
            target,
            caller: identity.display_name().to_string(),
            request_id: args.request_id + offset as u64,
        };
        let start = Instant::now();
        let outcome = sender.send(&request).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        println!(
            "POST {} -> {} ({}ms)",
            transport.url_for(&request),
            describe(outcome),
            latency_ms
        );
        if outcome != SendOutcome::Success {
            warn!("Neighbour {} did not acknowledge: {:?}", target, outcome);
            failures = failures.saturating_add(1);
        }
    }

    if failures > 0 {
        anyhow::bail!("Probe failed: {failures} neighbour(s) unreachable or rejecting");
    }

    println!();
    println!("Probe OK.");
    Ok(())
}

fn describe(outcome: SendOutcome) -> String {
    match outcome {
        SendOutcome::Success => "ok".to_string(),
        SendOutcome::ApplicationError(status) => format!("status {status}"),
        SendOutcome::Failure => "unreachable".to_string(),
    }
}
