//! The scheduler worker: the state machine and `process_deployment`
//! transaction body that decides, for one deployment, whether to admit
//! it, preempt for it, or leave it waiting.

pub mod dispatch;

use anyhow::Context;
use hypervisor_db::models::DeploymentStatus;
use hypervisor_db::queries::{clusters as clusters_db, deployments as deployments_db};
use sqlx::PgPool;

use crate::error::{as_transient, SchedulerError};
use crate::queue;
use crate::resource;

/// The deployment state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending   -> running     (admission)
/// running   -> pending     (preemption)
/// running   -> completed   (external completion signal)
/// pending   -> failed      (retry budget exhausted)
/// ```
///
/// `completed` and `failed` are both terminal: neither ever transitions
/// again.
pub struct DeploymentStateMachine;

impl DeploymentStateMachine {
    pub fn is_valid_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
        matches!(
            (from, to),
            (DeploymentStatus::Pending, DeploymentStatus::Running)
                | (DeploymentStatus::Running, DeploymentStatus::Pending)
                | (DeploymentStatus::Running, DeploymentStatus::Completed)
                | (DeploymentStatus::Pending, DeploymentStatus::Failed)
        )
    }
}

/// The result of one `process_deployment` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The deployment was admitted (now RUNNING). Carries the ids of any
    /// deployments preempted to make room for it -- these moved back to
    /// PENDING and need a fresh scheduling pass.
    Admitted { preempted: Vec<i64> },
    /// The deployment is still waiting; it was re-enqueued with backoff.
    Waiting,
    /// The deployment exhausted its retry budget and was moved to FAILED.
    Failed,
    /// The deployment was already in a terminal or stable state; nothing
    /// changed.
    NoOp,
}

/// Process one scheduling pass for `deployment_id`.
///
/// All reads and writes run inside a single transaction, with row locks
/// acquired in a fixed order -- cluster first, then the deployment, then
/// any preemption victims in ascending id order -- to prevent deadlock
/// between concurrent workers. A crash or error anywhere in this function
/// rolls back every mutation it made, including already-computed
/// preemption victims: the newcomer is never left un-admitted while its
/// victims are already released.
pub async fn process_deployment(
    pool: &PgPool,
    deployment_id: i64,
) -> Result<Outcome, SchedulerError> {
    // cluster_id never changes after creation, so reading it unlocked
    // before opening the transaction is safe and lets us lock the
    // cluster row first as the locking order requires.
    let preview = deployments_db::get_deployment(pool, deployment_id)
        .await
        .map_err(as_transient)?
        .ok_or_else(|| SchedulerError::NotFound(format!("deployment {deployment_id}")))?;

    let mut tx = pool.begin().await.map_err(SchedulerError::TransientStore)?;

    let mut cluster = clusters_db::get_cluster_for_update(&mut tx, preview.cluster_id)
        .await
        .map_err(as_transient)?
        .ok_or_else(|| SchedulerError::NotFound(format!("cluster {}", preview.cluster_id)))?;

    let deployment = deployments_db::get_deployment_for_update(&mut tx, deployment_id)
        .await
        .map_err(as_transient)?
        .ok_or_else(|| SchedulerError::NotFound(format!("deployment {deployment_id}")))?;

    let outcome = match deployment.status {
        DeploymentStatus::Running | DeploymentStatus::Completed | DeploymentStatus::Failed => {
            Outcome::NoOp
        }
        DeploymentStatus::Pending => {
            let satisfied = deployments_db::dependencies_satisfied_tx(&mut tx, deployment_id)
                .await
                .map_err(as_transient)?;

            if !satisfied {
                // Waiting on a dependency is not resource starvation: the
                // deployment has a real admission path, it's just not
                // reached yet. Re-enqueue without touching `attempt` so a
                // slow-completing parent chain can never drive this
                // deployment to FAILED.
                Outcome::Waiting
            } else if resource::can_fit(&cluster, &deployment) {
                admit(&mut tx, &mut cluster, &deployment).await?
            } else {
                let candidates = deployments_db::get_preemption_candidates_tx(
                    &mut tx,
                    cluster.id,
                    deployment.priority,
                )
                .await
                .map_err(as_transient)?;

                match crate::preemption::plan_preemption(&cluster, &deployment, &candidates) {
                    Some(victim_ids) => {
                        preempt_and_admit(&mut tx, &mut cluster, &deployment, &candidates, &victim_ids)
                            .await?
                    }
                    None => {
                        requeue_resource_starved(&mut tx, deployment_id, deployment.retry_max)
                            .await?
                    }
                }
            }
        }
    };

    tx.commit().await.map_err(SchedulerError::TransientStore)?;

    // Re-enqueue work after committing, not before: the worker is
    // idempotent, so a crash between the commit above and the enqueues
    // below just means the next poll finds nothing new to do rather than
    // losing a real state change.
    match &outcome {
        Outcome::Waiting => {
            let backoff = queue::backoff_for_attempt(deployment.attempt);
            queue::enqueue(pool, deployment_id, Some(chrono::Utc::now() + backoff))
                .await
                .context("failed to re-enqueue waiting deployment")
                .map_err(as_transient)?;
        }
        Outcome::Admitted { preempted } => {
            for victim_id in preempted {
                queue::enqueue(pool, *victim_id, None)
                    .await
                    .context("failed to re-enqueue preempted deployment")
                    .map_err(as_transient)?;
            }
        }
        Outcome::Failed | Outcome::NoOp => {}
    }

    Ok(outcome)
}

/// Admit a deployment directly: debit the cluster and transition to
/// RUNNING.
async fn admit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cluster: &mut hypervisor_db::models::Cluster,
    deployment: &hypervisor_db::models::Deployment,
) -> Result<Outcome, SchedulerError> {
    resource::debit(cluster, deployment).map_err(|e| SchedulerError::Validation(e.to_string()))?;

    clusters_db::debit_allocation(
        tx,
        cluster.id,
        deployment.required_ram,
        deployment.required_cpu,
        deployment.required_gpu,
    )
    .await
    .map_err(as_transient)?;

    let rows = deployments_db::transition_status(
        tx,
        deployment.id,
        DeploymentStatus::Pending,
        DeploymentStatus::Running,
    )
    .await
    .map_err(as_transient)?;

    if rows == 0 {
        return Err(SchedulerError::TransientStore(sqlx::Error::RowNotFound));
    }

    Ok(Outcome::Admitted {
        preempted: Vec::new(),
    })
}

/// Release the selected victims, then admit the newcomer. Runs entirely
/// inside the caller's transaction: a crash here rolls back both the
/// victim releases and the newcomer admission together.
async fn preempt_and_admit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cluster: &mut hypervisor_db::models::Cluster,
    newcomer: &hypervisor_db::models::Deployment,
    candidates: &[hypervisor_db::models::Deployment],
    victim_ids: &[i64],
) -> Result<Outcome, SchedulerError> {
    let mut ordered_victim_ids = victim_ids.to_vec();
    ordered_victim_ids.sort_unstable();

    for victim_id in &ordered_victim_ids {
        let victim = candidates
            .iter()
            .find(|d| d.id == *victim_id)
            .expect("victim id came from candidates");

        resource::credit(cluster, victim).map_err(|e| SchedulerError::Validation(e.to_string()))?;

        clusters_db::credit_allocation(
            tx,
            cluster.id,
            victim.required_ram,
            victim.required_cpu,
            victim.required_gpu,
        )
        .await
        .map_err(as_transient)?;

        deployments_db::transition_status(
            tx,
            victim.id,
            DeploymentStatus::Running,
            DeploymentStatus::Pending,
        )
        .await
        .map_err(as_transient)?;
    }

    admit(tx, cluster, newcomer).await?;

    // Victims moved back to PENDING and need a fresh scheduling pass;
    // process_deployment re-enqueues them once this transaction commits.
    Ok(Outcome::Admitted {
        preempted: ordered_victim_ids,
    })
}

/// Bump the attempt counter and either re-enqueue with backoff or fail
/// the deployment outright if its retry budget is exhausted.
///
/// Only called for resource starvation (dependencies were satisfied but
/// no preemption plan fit) -- a deployment gated solely by an unsatisfied
/// dependency re-enqueues as a plain `Outcome::Waiting` without going
/// through here, since it has a real admission path and must never be
/// pushed toward FAILED just because an upstream chain is slow.
async fn requeue_resource_starved(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    deployment_id: i64,
    retry_max: i32,
) -> Result<Outcome, SchedulerError> {
    let new_attempt = deployments_db::increment_attempt(tx, deployment_id)
        .await
        .map_err(as_transient)?;

    if new_attempt >= retry_max {
        let rows = deployments_db::transition_status(
            tx,
            deployment_id,
            DeploymentStatus::Pending,
            DeploymentStatus::Failed,
        )
        .await
        .map_err(as_transient)?;

        if rows == 0 {
            return Err(SchedulerError::TransientStore(sqlx::Error::RowNotFound));
        }

        return Ok(Outcome::Failed);
    }

    Ok(Outcome::Waiting)
}
