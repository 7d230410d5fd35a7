use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgegate::config::{GatewayConfig, StoreBackend};
use edgegate::gateway::{Gateway, GatewayServer};
use edgegate::ratelimit::build_store;

/// Edge request gatekeeper: rate limits and forwards API traffic
#[derive(Parser, Debug)]
#[command(name = "edgegate", version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "EDGEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Upstream origin host, without scheme (overrides config)
    #[arg(short, long)]
    upstream: Option<String>,

    /// Counter store: none, memory or redis (overrides config)
    #[arg(long, value_parser = parse_store)]
    store: Option<StoreBackend>,

    /// Redis URL for the redis store (overrides config)
    #[arg(long)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn parse_store(value: &str) -> Result<StoreBackend, String> {
    match value {
        "none" => Ok(StoreBackend::None),
        "memory" => Ok(StoreBackend::Memory),
        "redis" => Ok(StoreBackend::Redis),
        other => Err(format!("unknown store '{}', expected none, memory or redis", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Edgegate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.host = upstream;
    }
    if let Some(store) = args.store {
        config.rate_limiting.store = store;
    }
    if args.redis_url.is_some() {
        config.rate_limiting.redis_url = args.redis_url;
    }
    config.validate()?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream = %config.upstream.host,
        mount_prefix = %config.server.mount_prefix,
        store = ?config.rate_limiting.store,
        rules = config.rate_limiting.policies.rules.len(),
        "Configuration loaded"
    );

    let store = build_store(&config.rate_limiting).await?;
    let gateway = Arc::new(Gateway::from_config(&config, store)?);

    let server = GatewayServer::new(config.server.listen_addr, gateway);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Edgegate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
