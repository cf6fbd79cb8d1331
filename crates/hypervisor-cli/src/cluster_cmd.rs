//! `hypervisor cluster` commands: create and inspect clusters.

use anyhow::Result;
use sqlx::PgPool;

use hypervisor_db::queries::clusters as cluster_db;

/// Create a new cluster and print its id.
pub async fn run_create(
    pool: &PgPool,
    name: &str,
    total_ram: i32,
    total_cpu: i32,
    total_gpu: i32,
    created_by: i64,
) -> Result<()> {
    let cluster =
        cluster_db::insert_cluster(pool, name, total_ram, total_cpu, total_gpu, created_by)
            .await?;

    println!("Cluster created: {} ({})", cluster.name, cluster.id);
    println!(
        "  capacity: ram={} cpu={} gpu={}",
        cluster.total_ram, cluster.total_cpu, cluster.total_gpu
    );

    Ok(())
}

/// List all clusters with their current allocation.
pub async fn run_list(pool: &PgPool) -> Result<()> {
    let clusters = cluster_db::list_clusters(pool).await?;

    if clusters.is_empty() {
        println!("No clusters found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:>18} {:>18} {:>14}",
        "ID", "NAME", "RAM (alloc/total)", "CPU (alloc/total)", "GPU"
    );
    println!("{}", "-".repeat(80));

    for cluster in &clusters {
        println!(
            "{:<6} {:<20} {:>8}/{:<9} {:>8}/{:<9} {:>6}/{:<6}",
            cluster.id,
            cluster.name,
            cluster.allocated_ram,
            cluster.total_ram,
            cluster.allocated_cpu,
            cluster.total_cpu,
            cluster.allocated_gpu,
            cluster.total_gpu,
        );
    }

    Ok(())
}

/// Show a single cluster's details.
pub async fn run_get(pool: &PgPool, id: i64) -> Result<()> {
    let cluster = cluster_db::get_cluster(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("cluster {id} not found"))?;

    println!("Cluster: {} ({})", cluster.name, cluster.id);
    println!(
        "  ram: {}/{} allocated",
        cluster.allocated_ram, cluster.total_ram
    );
    println!(
        "  cpu: {}/{} allocated",
        cluster.allocated_cpu, cluster.total_cpu
    );
    println!(
        "  gpu: {}/{} allocated",
        cluster.allocated_gpu, cluster.total_gpu
    );
    println!("  created_by: {}", cluster.created_by);
    println!(
        "  created_at: {}",
        cluster.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}
