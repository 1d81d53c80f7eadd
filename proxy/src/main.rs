//! CLI entry point: load configuration, bring up one listener task per
//! `listen` entry, and run until ctrl-c (spec.md §6, §9).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use naive_padding::PaddingRegistry;
use naive_proxy::config::Config;
use naive_proxy::listener::Listener;
use naive_proxy::redir::FakeIpTable;
use naive_protocol::UpstreamEndpoint;
use naive_upstream::HyperTunnelOpener;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "naive-proxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
    }

    let config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config from {}: {e}", args.config);
            return ExitCode::FAILURE;
        }
    };
    info!("loaded configuration from {}", args.config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Brings up every listener on a shared upstream tunnel opener and padding
/// registry (spec.md §4.H: "Multiple listen entries may coexist in one
/// process... sharing the same upstream HTTP session and padding-support
/// registry"), then waits for ctrl-c to shut them all down.
async fn run(config: Config) -> anyhow::Result<()> {
    let registry = Arc::new(PaddingRegistry::new());
    let tunnel_opener = Arc::new(HyperTunnelOpener::new(
        &config.proxy,
        config.concurrency,
        registry.clone(),
    )?);
    let fake_ip = Arc::new(match &config.host_resolver_rules {
        Some(rules) => FakeIpTable::from_resolver_rules(rules),
        None => FakeIpTable::new(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let upstream_endpoint = upstream_endpoint_from_url(&config.proxy)?;

    let mut handles = Vec::with_capacity(config.listen.len());
    for entry in &config.listen {
        let listener = Arc::new(Listener::new(
            entry,
            upstream_endpoint.clone(),
            config.extra_headers.clone(),
            tunnel_opener.clone(),
            registry.clone(),
            fake_ip.clone(),
        )?);
        handles.push(tokio::spawn(listener.serve(shutdown_rx.clone())));
    }

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, shutting down");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await? {
            error!("listener exited with error: {e}");
        }
    }
    Ok(())
}

fn upstream_endpoint_from_url(proxy_url: &str) -> anyhow::Result<UpstreamEndpoint> {
    let url = url::Url::parse(proxy_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("proxy url {proxy_url} has no host"))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);
    Ok(UpstreamEndpoint::new(url.scheme(), host, port))
}
