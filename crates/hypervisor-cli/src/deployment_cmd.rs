//! `hypervisor deployment` commands: create, inspect, and complete
//! deployments, and manage dependency edges between them.

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::PgPool;

use hypervisor_core::dependency;
use hypervisor_core::scheduler::dispatch;
use hypervisor_db::models::DeploymentStatus;
use hypervisor_db::queries::deployments as deployment_db;

/// Create a deployment and submit it for scheduling.
#[allow(clippy::too_many_arguments)]
pub async fn run_create(
    pool: &PgPool,
    docker_image_path: &str,
    required_ram: i32,
    required_cpu: i32,
    required_gpu: i32,
    priority: &str,
    cluster_id: i64,
    created_by: i64,
    retry_max: i32,
) -> Result<()> {
    let deployment = dispatch::create_deployment(
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
    .await?;

    println!(
        "Deployment created: {} ({})",
        deployment.docker_image_path, deployment.id
    );
    println!("  submitted for scheduling on cluster {cluster_id}");

    Ok(())
}

/// Add a dependency edge: `dependent_id` depends on `dependency_id`.
pub async fn run_add_dependency(pool: &PgPool, dependent_id: i64, dependency_id: i64) -> Result<()> {
    dependency::validate_edge_addition(pool, dependent_id, dependency_id)
        .await
        .context("failed to add dependency edge")?;

    println!("Added dependency: {dependent_id} depends on {dependency_id}");
    Ok(())
}

/// List deployments, optionally filtered by cluster and/or status.
pub async fn run_list(
    pool: &PgPool,
    cluster_id: Option<i64>,
    status: Option<&str>,
) -> Result<()> {
    let status = status
        .map(DeploymentStatus::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid status {}", e.0))?;

    let deployments = deployment_db::list_deployments(pool, cluster_id, status).await?;

    if deployments.is_empty() {
        println!("No deployments found.");
        return Ok(());
    }

    println!(
        "{:<6} {:<30} {:<10} {:<10} {:>8} {:>14}",
        "ID", "IMAGE", "PRIORITY", "STATUS", "ATTEMPT", "CLUSTER"
    );
    println!("{}", "-".repeat(84));

    for deployment in &deployments {
        println!(
            "{:<6} {:<30} {:<10} {:<10} {:>7}/{:<6} {:>14}",
            deployment.id,
            deployment.docker_image_path,
            deployment.priority,
            deployment.status,
            deployment.attempt,
            deployment.retry_max,
            deployment.cluster_id,
        );
    }

    Ok(())
}

/// Show a single deployment's details.
pub async fn run_get(pool: &PgPool, id: i64) -> Result<()> {
    let deployment = deployment_db::get_deployment(pool, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("deployment {id} not found"))?;

    println!("Deployment: {} ({})", deployment.docker_image_path, deployment.id);
    println!("  priority: {}", deployment.priority);
    println!("  status: {}", deployment.status);
    println!(
        "  requires: ram={} cpu={} gpu={}",
        deployment.required_ram, deployment.required_cpu, deployment.required_gpu
    );
    println!("  cluster: {}", deployment.cluster_id);
    println!("  attempt: {}/{}", deployment.attempt, deployment.retry_max);

    let dependencies = deployment_db::get_dependencies_of(pool, id).await?;
    if !dependencies.is_empty() {
        println!("  depends on: {dependencies:?}");
    }

    Ok(())
}

/// Mark a running deployment complete.
pub async fn run_complete(pool: &PgPool, id: i64) -> Result<()> {
    dispatch::complete(pool, id).await?;
    println!("Deployment {id} marked complete.");
    Ok(())
}
