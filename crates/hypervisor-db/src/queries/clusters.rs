//! Database query functions for the `clusters` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Cluster;

/// Insert a new cluster row. Returns the inserted cluster with
/// server-generated defaults (id, created_at, zeroed allocation counters).
pub async fn insert_cluster(
    pool: &PgPool,
    name: &str,
    total_ram: i32,
    total_cpu: i32,
    total_gpu: i32,
    created_by: i64,
) -> Result<Cluster> {
    let cluster = sqlx::query_as::<_, Cluster>(
        "INSERT INTO clusters (name, total_ram, total_cpu, total_gpu, created_by) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(name)
    .bind(total_ram)
    .bind(total_cpu)
    .bind(total_gpu)
    .bind(created_by)
    .fetch_one(pool)
    .await
    .context("failed to insert cluster")?;

    Ok(cluster)
}

/// Fetch a cluster by its ID.
pub async fn get_cluster(pool: &PgPool, id: i64) -> Result<Option<Cluster>> {
    let cluster = sqlx::query_as::<_, Cluster>("SELECT * FROM clusters WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch cluster")?;

    Ok(cluster)
}

/// Fetch a cluster by ID, locking the row for the duration of the enclosing
/// transaction. The scheduler worker uses this to serialize concurrent
/// allocation decisions against a single cluster.
pub async fn get_cluster_for_update(
    tx: &mut sqlx::PgConnection,
    id: i64,
) -> Result<Option<Cluster>> {
    let cluster =
        sqlx::query_as::<_, Cluster>("SELECT * FROM clusters WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to fetch cluster for update")?;

    Ok(cluster)
}

/// List all clusters, ordered by creation time (newest first).
pub async fn list_clusters(pool: &PgPool) -> Result<Vec<Cluster>> {
    let clusters =
        sqlx::query_as::<_, Cluster>("SELECT * FROM clusters ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list clusters")?;

    Ok(clusters)
}

/// Credit (add back) resources to a cluster's allocation counters, within
/// an existing transaction. Used when a deployment completes, fails, or is
/// preempted back to `pending`.
pub async fn credit_allocation(
    tx: &mut sqlx::PgConnection,
    cluster_id: i64,
    ram: i32,
    cpu: i32,
    gpu: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE clusters \
         SET allocated_ram = allocated_ram - $1, \
             allocated_cpu = allocated_cpu - $2, \
             allocated_gpu = allocated_gpu - $3 \
         WHERE id = $4",
    )
    .bind(ram)
    .bind(cpu)
    .bind(gpu)
    .bind(cluster_id)
    .execute(&mut *tx)
    .await
    .context("failed to credit cluster allocation")?;

    Ok(())
}

/// Debit (commit) resources from a cluster's allocation counters, within
/// an existing transaction. Used when a deployment starts running.
pub async fn debit_allocation(
    tx: &mut sqlx::PgConnection,
    cluster_id: i64,
    ram: i32,
    cpu: i32,
    gpu: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE clusters \
         SET allocated_ram = allocated_ram + $1, \
             allocated_cpu = allocated_cpu + $2, \
             allocated_gpu = allocated_gpu + $3 \
         WHERE id = $4",
    )
    .bind(ram)
    .bind(cpu)
    .bind(gpu)
    .bind(cluster_id)
    .execute(&mut *tx)
    .await
    .context("failed to debit cluster allocation")?;

    Ok(())
}
