//! Convenience dispatch helpers that wrap [`super::process_deployment`]
//! and the raw status transitions with semantic names, for callers (the
//! HTTP surface, the CLI) that don't want to think in terms of the
//! scheduling transaction directly.

use std::str::FromStr;

use anyhow::Result;
use sqlx::PgPool;

use hypervisor_db::models::{Deployment, DeploymentStatus, Priority};
use hypervisor_db::queries::{clusters as clusters_db, deployments as deployments_db};

use crate::error::{as_transient, SchedulerError};
use crate::queue;

/// Submit a freshly created deployment for scheduling: enqueue it to run
/// immediately.
pub async fn submit(pool: &PgPool, deployment_id: i64) -> Result<()> {
    queue::enqueue(pool, deployment_id, None).await?;
    Ok(())
}

/// Validate and create a new deployment, then submit it for scheduling.
///
/// This is the single entry point the HTTP surface and the CLI both go
/// through, so the `spec.md` §7 `ValidationError` checks (positive RAM/CPU,
/// non-negative GPU, a known priority, an existing cluster) are applied
/// exactly once rather than duplicated -- and rejected before any row is
/// written, rather than surfacing as an opaque `CHECK` constraint violation
/// or foreign-key error from the database.
#[allow(clippy::too_many_arguments)]
pub async fn create_deployment(
    pool: &PgPool,
    docker_image_path: &str,
    required_ram: i32,
    required_cpu: i32,
    required_gpu: i32,
    priority: &str,
    cluster_id: i64,
    created_by: i64,
    retry_max: i32,
) -> Result<Deployment, SchedulerError> {
    if required_ram <= 0 {
        return Err(SchedulerError::Validation(format!(
            "required_ram must be positive, got {required_ram}"
        )));
    }
    if required_cpu <= 0 {
        return Err(SchedulerError::Validation(format!(
            "required_cpu must be positive, got {required_cpu}"
        )));
    }
    if required_gpu < 0 {
        return Err(SchedulerError::Validation(format!(
            "required_gpu must not be negative, got {required_gpu}"
        )));
    }

    let priority = Priority::from_str(priority)
        .map_err(|e| SchedulerError::Validation(format!("invalid priority: {}", e.0)))?;

    clusters_db::get_cluster(pool, cluster_id)
        .await
        .map_err(as_transient)?
        .ok_or_else(|| SchedulerError::Validation(format!("cluster {cluster_id} does not exist")))?;

    let deployment = deployments_db::insert_deployment(
        pool,
        docker_image_path,
        required_ram,
        required_cpu,
        required_gpu,
        priority,
        cluster_id,
        created_by,
        retry_max,
    )
    .await
    .map_err(as_transient)?;

    queue::enqueue(pool, deployment.id, None)
        .await
        .map_err(as_transient)?;

    Ok(deployment)
}

/// Mark a running deployment complete: transition `running -> completed`,
/// release its resources back to the cluster, and enqueue every direct
/// dependent so they're re-evaluated now that one of their dependencies
/// is satisfied.
pub async fn complete(pool: &PgPool, deployment_id: i64) -> Result<(), SchedulerError> {
    let mut tx = pool.begin().await.map_err(SchedulerError::TransientStore)?;

    let deployment = deployments_db::get_deployment_for_update(&mut tx, deployment_id)
        .await
        .map_err(as_transient)?
        .ok_or_else(|| SchedulerError::NotFound(format!("deployment {deployment_id}")))?;

    if deployment.status != DeploymentStatus::Running {
        return Err(SchedulerError::Validation(format!(
            "deployment {deployment_id} is {}, not running",
            deployment.status
        )));
    }

    clusters_db::credit_allocation(
        &mut tx,
        deployment.cluster_id,
        deployment.required_ram,
        deployment.required_cpu,
        deployment.required_gpu,
    )
    .await
    .map_err(as_transient)?;

    let rows = deployments_db::transition_status(
        &mut tx,
        deployment_id,
        DeploymentStatus::Running,
        DeploymentStatus::Completed,
    )
    .await
    .map_err(as_transient)?;

    if rows == 0 {
        return Err(SchedulerError::TransientStore(sqlx::Error::RowNotFound));
    }

    tx.commit().await.map_err(SchedulerError::TransientStore)?;

    let dependents = deployments_db::get_direct_dependents(pool, deployment_id)
        .await
        .map_err(as_transient)?;

    for dependent_id in dependents {
        queue::enqueue(pool, dependent_id, None)
            .await
            .map_err(as_transient)?;
    }

    Ok(())
}
