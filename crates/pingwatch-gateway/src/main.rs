use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use pingwatch_blob::BlobGateway;
use pingwatch_core::PingWatchConfig;
use pingwatch_gateway::{build_router, AppState};
use pingwatch_queue::JobQueue;
use pingwatch_store::Store;

/// Ping Watch control-plane API.
#[derive(Parser, Debug)]
#[command(name = "pingwatch-gateway", about = "Ping Watch ingestion and control API")]
struct Args {
    /// Path to pingwatch.toml (defaults to PINGWATCH_CONFIG or
    /// ~/.pingwatch/pingwatch.toml).
    #[arg(long)]
    config: Option<String>,
    /// Override the bind address from config.
    #[arg(long)]
    bind: Option<String>,
    /// Override the port from config.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pingwatch_gateway=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = PingWatchConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    // Store::open applies migrations and runs the schema guardrail; an
    // incompatible database refuses to boot here.
    let store = Store::open(&config.database.path)?;
    let queue = JobQueue::open(&config.database.path, config.queue.name.clone())?;
    let blob = BlobGateway::new(&config.blob);

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(AppState::new(config, store, queue, blob));
    let router = build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("pingwatch gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
