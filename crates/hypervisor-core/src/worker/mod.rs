//! The worker pool: polls the durable job queue and runs
//! [`crate::scheduler::process_deployment`] for each claimed job, bounded
//! by a concurrency semaphore.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::queue;
use crate::scheduler::{self, Outcome};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of deployments processed concurrently.
    pub max_concurrency: usize,
    /// How long to sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Identifies this process in `scheduler_jobs.locked_by`.
    pub worker_id: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            poll_interval: Duration::from_millis(200),
            worker_id: format!("worker-{}", std::process::id()),
        }
    }
}

/// Outcome of running the worker pool until cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    /// `cancel` was triggered and every in-flight job drained cleanly.
    Cancelled,
}

/// Message sent from a spawned job task back to the poll loop.
struct JobDone {
    job_id: i64,
    deployment_id: i64,
    result: Result<Outcome, SchedulerError>,
}

/// Run the worker pool until `cancel` is triggered, then drain in-flight
/// jobs and return.
///
/// Each iteration claims at most one job (`FOR UPDATE SKIP LOCKED`
/// guarantees no two workers, in this process or another, claim the same
/// row), spawns it under the concurrency semaphore, and acks, retries, or
/// drops it based on the result. A job whose `process_deployment` call
/// returns an error is released for retry rather than dropped: a
/// transient store error should not discard real scheduling work.
pub async fn run_workers(
    pool: PgPool,
    config: WorkerConfig,
    cancel: CancellationToken,
) -> RunResult {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let (tx, mut rx) = mpsc::channel::<JobDone>(config.max_concurrency * 2);
    let mut in_flight: usize = 0;

    loop {
        if cancel.is_cancelled() {
            tracing::info!(worker_id = %config.worker_id, "worker pool cancelled, draining in-flight jobs");
            while in_flight > 0 {
                if let Some(done) = rx.recv().await {
                    in_flight -= 1;
                    handle_job_done(&pool, done).await;
                } else {
                    break;
                }
            }
            return RunResult::Cancelled;
        }

        while let Ok(done) = rx.try_recv() {
            in_flight -= 1;
            handle_job_done(&pool, done).await;
        }

        if in_flight >= config.max_concurrency {
            tokio::time::sleep(config.poll_interval).await;
            continue;
        }

        match queue::claim_next(&pool, &config.worker_id).await {
            Ok(Some(job)) => {
                in_flight += 1;
                let permit = Arc::clone(&semaphore);
                let pool = pool.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await;
                    let result = scheduler::process_deployment(&pool, job.deployment_id).await;
                    let _ = tx
                        .send(JobDone {
                            job_id: job.id,
                            deployment_id: job.deployment_id,
                            result,
                        })
                        .await;
                });
            }
            Ok(None) => {
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to claim scheduler job");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

async fn handle_job_done(pool: &PgPool, done: JobDone) {
    match done.result {
        Ok(Outcome::Waiting) => {
            // process_deployment already re-enqueued a fresh job with
            // backoff; the claimed job row itself is done.
            if let Err(err) = queue::ack(pool, done.job_id).await {
                tracing::error!(error = %err, job_id = done.job_id, "failed to ack waiting job");
            }
        }
        Ok(Outcome::Admitted { .. }) | Ok(Outcome::Failed) | Ok(Outcome::NoOp) => {
            if let Err(err) = queue::ack(pool, done.job_id).await {
                tracing::error!(error = %err, job_id = done.job_id, "failed to ack completed job");
            }
        }
        // Logical error: the deployment or cluster row is gone. Per
        // `spec.md` §7 this is dropped without retry, not treated as a
        // transient failure -- retrying it would spin forever on a row
        // that will never reappear.
        Err(SchedulerError::NotFound(reason)) => {
            tracing::warn!(
                reason = %reason,
                job_id = done.job_id,
                deployment_id = done.deployment_id,
                "process_deployment found nothing to process, dropping job"
            );
            if let Err(err) = queue::drop_job(pool, done.job_id).await {
                tracing::error!(error = %err, job_id = done.job_id, "failed to drop job");
            }
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                job_id = done.job_id,
                deployment_id = done.deployment_id,
                "process_deployment failed, releasing job for retry"
            );
            let backoff = queue::backoff_for_attempt(1);
            if let Err(err) = queue::release_for_retry(pool, done.job_id, backoff).await {
                tracing::error!(error = %err, job_id = done.job_id, "failed to release job for retry");
            }
        }
    }
}
