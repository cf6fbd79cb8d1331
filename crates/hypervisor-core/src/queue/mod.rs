//! A durable, at-least-once job queue for `process_deployment(id)` tasks,
//! backed by the `scheduler_jobs` table.
//!
//! Jobs are claimed with `FOR UPDATE SKIP LOCKED`, the standard Postgres
//! queue-claim pattern: multiple workers can poll concurrently without
//! blocking each other, and a claimed-but-never-acked job (e.g. the
//! holding connection died) becomes reclaimable as soon as its lock is
//! released, since `locked_at`/`locked_by` are cleared explicitly rather
//! than relying on the row lock itself to expire.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hypervisor_db::models::SchedulerJob;
use rand::Rng;
use sqlx::PgPool;

/// Insert a job to run `process_deployment(deployment_id)` at `run_at`
/// (or immediately, if `run_at` is `None`).
pub async fn enqueue(pool: &PgPool, deployment_id: i64, run_at: Option<DateTime<Utc>>) -> Result<SchedulerJob> {
    let run_at = run_at.unwrap_or_else(Utc::now);
    let job = sqlx::query_as::<_, SchedulerJob>(
        "INSERT INTO scheduler_jobs (deployment_id, run_at) VALUES ($1, $2) RETURNING *",
    )
    .bind(deployment_id)
    .bind(run_at)
    .fetch_one(pool)
    .await
    .context("failed to enqueue scheduler job")?;

    Ok(job)
}

/// Claim the oldest due, unlocked job for `worker_id`.
///
/// Returns `None` if no job is currently due.
pub async fn claim_next(pool: &PgPool, worker_id: &str) -> Result<Option<SchedulerJob>> {
    let job = sqlx::query_as::<_, SchedulerJob>(
        "UPDATE scheduler_jobs \
         SET locked_at = now(), locked_by = $1 \
         WHERE id = ( \
             SELECT id FROM scheduler_jobs \
             WHERE locked_at IS NULL AND run_at <= now() \
             ORDER BY run_at ASC, id ASC \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         RETURNING *",
    )
    .bind(worker_id)
    .fetch_optional(pool)
    .await
    .context("failed to claim scheduler job")?;

    Ok(job)
}

/// Acknowledge successful processing: delete the job row.
pub async fn ack(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM scheduler_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await
        .context("failed to ack scheduler job")?;

    Ok(())
}

/// Release a job for retry after `base_delay`, applying full jitter and
/// incrementing the attempt counter, so repeated "still waiting" outcomes
/// back off instead of spinning (spec's hot re-queue-loop fix).
pub async fn release_for_retry(pool: &PgPool, job_id: i64, base_delay: ChronoDuration) -> Result<()> {
    let jittered_millis = {
        let max = base_delay.num_milliseconds().max(1);
        rand::rng().random_range(0..=max)
    };
    let delay = ChronoDuration::milliseconds(jittered_millis);

    sqlx::query(
        "UPDATE scheduler_jobs \
         SET locked_at = NULL, locked_by = NULL, \
             attempts = attempts + 1, \
             run_at = now() + $1 \
         WHERE id = $2",
    )
    .bind(delay)
    .bind(job_id)
    .execute(pool)
    .await
    .context("failed to release scheduler job for retry")?;

    Ok(())
}

/// Drop a job without retry (a logical error such as a missing row).
pub async fn drop_job(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM scheduler_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await
        .context("failed to drop scheduler job")?;

    Ok(())
}

/// Exponential backoff base delay for the `attempt`'th retry (0-indexed),
/// capped at five minutes.
pub fn backoff_for_attempt(attempt: i32) -> ChronoDuration {
    let capped_attempt = attempt.clamp(0, 8);
    let seconds = 1i64.saturating_shl(capped_attempt as u32).min(300);
    ChronoDuration::seconds(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_for_attempt(0), ChronoDuration::seconds(1));
        assert_eq!(backoff_for_attempt(1), ChronoDuration::seconds(2));
        assert_eq!(backoff_for_attempt(3), ChronoDuration::seconds(8));
        assert_eq!(backoff_for_attempt(20), ChronoDuration::seconds(300));
    }
}
