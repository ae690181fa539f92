//! The queue-consumer loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use pingwatch_queue::JobQueue;

use crate::process::{process_clip, WorkerContext};

/// Consume jobs strictly in order until `shutdown` broadcasts `true`.
///
/// The queue hands each job to at most one worker, so several of these
/// loops (in separate processes) can share a queue safely.
pub async fn run(ctx: Arc<WorkerContext>, queue: JobQueue, mut shutdown: watch::Receiver<bool>) {
    let poll_interval = Duration::from_millis(ctx.config.worker.poll_interval_ms.max(50));
    info!(
        queue = queue.queue_name(),
        test_mode = ctx.config.worker.test_mode,
        "worker started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        let job = match queue.claim_next() {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "queue claim failed");
                None
            }
        };

        match job {
            Some(job) => {
                info!(job_id = %job.job_id, "job claimed");
                let result = process_clip(&ctx, &job.payload).await;
                let ok = result.get("status").and_then(|s| s.as_str()) == Some("done");
                if let Err(e) = queue.complete(&job.job_id, ok) {
                    error!(job_id = %job.job_id, error = %e, "job completion update failed");
                }
            }
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }
    }
    info!("worker stopped");
}
