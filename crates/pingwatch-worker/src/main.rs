use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use pingwatch_core::PingWatchConfig;
use pingwatch_queue::JobQueue;
use pingwatch_worker::api::{ControlApi, SummaryBody};
use pingwatch_worker::process::WorkerContext;

/// Ping Watch clip-processing worker.
#[derive(Parser, Debug)]
#[command(name = "pingwatch-worker", about = "Run the ping-watch worker")]
struct Args {
    /// Path to pingwatch.toml (defaults to PINGWATCH_CONFIG or
    /// ~/.pingwatch/pingwatch.toml).
    #[arg(long)]
    config: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the clip queue (the default).
    Run {
        /// Queue name to listen on.
        #[arg(long)]
        queue: Option<String>,
    },
    /// Post a summary for a specific event — operator escape hatch for
    /// events stuck in `processing`.
    ProcessEvent {
        /// Event id to update.
        event_id: String,
        #[arg(long, default_value = "Motion detected")]
        summary: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = PingWatchConfig::load(args.config.as_deref())?;

    let default_filter = format!("pingwatch_worker={0},pingwatch_queue={0}", config.worker.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match args.command {
        None | Some(Command::Run { queue: None }) => run_worker(config, None).await,
        Some(Command::Run { queue }) => run_worker(config, queue).await,
        Some(Command::ProcessEvent {
            event_id,
            summary,
            label,
            confidence,
        }) => {
            let api = ControlApi::new(&config.worker.api_base_url);
            let body = SummaryBody {
                summary,
                label,
                confidence,
                ..Default::default()
            };
            api.post_event_summary(&event_id, &body).await?;
            Ok(())
        }
    }
}

async fn run_worker(config: PingWatchConfig, queue_name: Option<String>) -> anyhow::Result<()> {
    let queue_name = queue_name.unwrap_or_else(|| config.queue.name.clone());
    let queue = JobQueue::open(&config.database.path, queue_name.clone())?;

    info!(
        queue = %queue_name,
        telegram_configured = config.telegram.token().is_some(),
        webhook_configured = config.notify.webhook_url.is_some(),
        test_mode = config.worker.test_mode,
        "worker startup"
    );

    let ctx = Arc::new(WorkerContext::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    pingwatch_worker::worker::run(ctx, queue, shutdown_rx).await;
    Ok(())
}
