//! `hypervisor worker run` command: run the scheduler worker pool until
//! interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use hypervisor_core::worker::{run_workers, RunResult, WorkerConfig};

/// Run the worker pool.
///
/// Installs a Ctrl+C handler: the first signal requests a graceful drain
/// of in-flight jobs, a second forces immediate exit.
pub async fn run_worker(pool: PgPool, max_concurrency: usize, poll_interval_ms: u64) -> Result<()> {
    println!("Starting worker pool (max_concurrency={max_concurrency})");

    let config = WorkerConfig {
        max_concurrency,
        poll_interval: Duration::from_millis(poll_interval_ms),
        ..WorkerConfig::default()
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    match run_workers(pool, config, cancel).await {
        RunResult::Cancelled => {
            println!("Worker pool stopped.");
        }
    }

    Ok(())
}
