//! Database query functions for the `deployments` and `deployment_dependencies`
//! tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Deployment, DeploymentDependency, DeploymentStatus, Priority};

/// Insert a new deployment row. Returns the inserted deployment with
/// server-generated defaults (id, status=pending, attempt=0, timestamps).
#[allow(clippy::too_many_arguments)]
pub async fn insert_deployment(
    pool: &PgPool,
    docker_image_path: &str,
    required_ram: i32,
    required_cpu: i32,
    required_gpu: i32,
    priority: Priority,
    cluster_id: i64,
    created_by: i64,
    retry_max: i32,
) -> Result<Deployment> {
    let deployment = sqlx::query_as::<_, Deployment>(
        "INSERT INTO deployments \
            (docker_image_path, required_ram, required_cpu, required_gpu, \
             priority, cluster_id, created_by, retry_max) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(docker_image_path)
    .bind(required_ram)
    .bind(required_cpu)
    .bind(required_gpu)
    .bind(priority)
    .bind(cluster_id)
    .bind(created_by)
    .bind(retry_max)
    .fetch_one(pool)
    .await
    .context("failed to insert deployment")?;

    Ok(deployment)
}

/// Fetch a single deployment by ID.
pub async fn get_deployment(pool: &PgPool, id: i64) -> Result<Option<Deployment>> {
    let deployment = sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch deployment")?;

    Ok(deployment)
}

/// Fetch a deployment by ID, locking the row for the duration of the
/// enclosing transaction.
pub async fn get_deployment_for_update(
    tx: &mut sqlx::PgConnection,
    id: i64,
) -> Result<Option<Deployment>> {
    let deployment = sqlx::query_as::<_, Deployment>(
        "SELECT * FROM deployments WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to fetch deployment for update")?;

    Ok(deployment)
}

/// List deployments, optionally filtered by cluster and/or status.
pub async fn list_deployments(
    pool: &PgPool,
    cluster_id: Option<i64>,
    status: Option<DeploymentStatus>,
) -> Result<Vec<Deployment>> {
    let deployments = sqlx::query_as::<_, Deployment>(
        "SELECT * FROM deployments \
         WHERE ($1::BIGINT IS NULL OR cluster_id = $1) \
           AND ($2::TEXT IS NULL OR status = $2) \
         ORDER BY created_at DESC",
    )
    .bind(cluster_id)
    .bind(status)
    .fetch_all(pool)
    .await
    .context("failed to list deployments")?;

    Ok(deployments)
}

/// Insert a dependency edge: `dependent_id` depends on `dependency_id`,
/// within an existing transaction (the cycle-check-then-insert unit, which
/// holds an advisory lock across both).
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_dependency_edge_tx(
    tx: &mut sqlx::PgConnection,
    dependent_id: i64,
    dependency_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO deployment_dependencies (dependent_id, dependency_id) \
         VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(dependent_id)
    .bind(dependency_id)
    .execute(&mut *tx)
    .await
    .context("failed to insert dependency edge")?;

    Ok(())
}

/// Get the ids of all deployments that `dependent_id` depends on.
pub async fn get_dependencies_of(pool: &PgPool, dependent_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT dependency_id FROM deployment_dependencies WHERE dependent_id = $1",
    )
    .bind(dependent_id)
    .fetch_all(pool)
    .await
    .context("failed to get deployment dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Get the ids of all deployments that directly depend on `dependency_id`
/// (the direct dependents, used to fan out scheduling on completion).
pub async fn get_direct_dependents(pool: &PgPool, dependency_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT dependent_id FROM deployment_dependencies WHERE dependency_id = $1",
    )
    .bind(dependency_id)
    .fetch_all(pool)
    .await
    .context("failed to get direct dependents")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Fetch every dependency edge currently stored, within an existing
/// transaction so the snapshot is consistent with the advisory lock the
/// caller holds.
///
/// Used by the cycle checker, which walks the whole graph in memory rather
/// than issuing one query per visited node.
pub async fn list_all_dependency_edges_tx(
    tx: &mut sqlx::PgConnection,
) -> Result<Vec<DeploymentDependency>> {
    let edges = sqlx::query_as::<_, DeploymentDependency>(
        "SELECT * FROM deployment_dependencies",
    )
    .fetch_all(&mut *tx)
    .await
    .context("failed to list dependency edges")?;

    Ok(edges)
}

/// True iff every direct dependency of `dependent_id` has status `completed`.
/// A deployment with no dependencies is trivially satisfied.
pub async fn dependencies_satisfied(pool: &PgPool, dependent_id: i64) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT NOT EXISTS ( \
             SELECT 1 FROM deployment_dependencies dd \
             JOIN deployments dep ON dep.id = dd.dependency_id \
             WHERE dd.dependent_id = $1 AND dep.status != 'completed' \
         )",
    )
    .bind(dependent_id)
    .fetch_one(pool)
    .await
    .context("failed to check dependency satisfaction")?;

    Ok(row.0)
}

/// Same as [`dependencies_satisfied`], but reading through an existing
/// transaction so the check observes the same snapshot the scheduler's
/// locks protect.
pub async fn dependencies_satisfied_tx(
    tx: &mut sqlx::PgConnection,
    dependent_id: i64,
) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT NOT EXISTS ( \
             SELECT 1 FROM deployment_dependencies dd \
             JOIN deployments dep ON dep.id = dd.dependency_id \
             WHERE dd.dependent_id = $1 AND dep.status != 'completed' \
         )",
    )
    .bind(dependent_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to check dependency satisfaction")?;

    Ok(row.0)
}

const PRIORITY_RANK_CASE: &str =
    "CASE priority WHEN 'low' THEN 1 WHEN 'medium' THEN 2 WHEN 'high' THEN 3 END";

/// Running deployments on `cluster_id` with strictly lower priority rank
/// than `newcomer_priority`, ordered by `(priority rank ascending, id
/// ascending)` -- the deterministic preemption-candidate order. Reads
/// through an existing transaction so the candidate set is consistent
/// with the locks already held on the cluster and newcomer rows.
pub async fn get_preemption_candidates_tx(
    tx: &mut sqlx::PgConnection,
    cluster_id: i64,
    newcomer_priority: Priority,
) -> Result<Vec<Deployment>> {
    let query = format!(
        "SELECT * FROM deployments \
         WHERE cluster_id = $1 AND status = 'running' AND {rank} < $2 \
         ORDER BY {rank} ASC, id ASC",
        rank = PRIORITY_RANK_CASE
    );
    let candidates = sqlx::query_as::<_, Deployment>(&query)
        .bind(cluster_id)
        .bind(newcomer_priority.rank() as i32)
        .fetch_all(&mut *tx)
        .await
        .context("failed to fetch preemption candidates")?;

    Ok(candidates)
}

/// Atomically transition a deployment from one status to another, within
/// an existing transaction.
///
/// Uses optimistic locking: the UPDATE's WHERE clause includes
/// `status = $from`, so the row is only updated if the current status
/// matches the expected value. Returns the number of rows affected (0
/// means the status did not match, i.e. a concurrent writer already moved
/// it).
pub async fn transition_status(
    tx: &mut sqlx::PgConnection,
    deployment_id: i64,
    from: DeploymentStatus,
    to: DeploymentStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE deployments \
         SET status = $1, updated_at = now() \
         WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(deployment_id)
    .bind(from)
    .execute(&mut *tx)
    .await
    .context("failed to transition deployment status")?;

    Ok(result.rows_affected())
}

/// Increment the attempt counter on a deployment, within an existing
/// transaction. Returns the new attempt count.
pub async fn increment_attempt(
    tx: &mut sqlx::PgConnection,
    deployment_id: i64,
) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE deployments SET attempt = attempt + 1, updated_at = now() \
         WHERE id = $1 \
         RETURNING attempt",
    )
    .bind(deployment_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to increment deployment attempt")?;

    Ok(row.0)
}

/// Return `true` if `updated_at` for a deployment changed after the given
/// timestamp -- used by tests to assert idempotence of a no-op pass.
pub async fn updated_since(
    pool: &PgPool,
    deployment_id: i64,
    since: DateTime<Utc>,
) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT updated_at > $1 FROM deployments WHERE id = $2",
    )
    .bind(since)
    .bind(deployment_id)
    .fetch_one(pool)
    .await
    .context("failed to check deployment update timestamp")?;

    Ok(row.0)
}
