//! End-to-end scheduling scenarios, driven against a real Postgres
//! instance through the public `hypervisor-core` API (`process_deployment`,
//! `dispatch::complete`, `dependency::validate_edge_addition`).
//!
//! Each test creates a temporary database, runs one literal scenario, and
//! asserts the store state matches exactly.

use chrono::Utc;

use hypervisor_core::dependency;
use hypervisor_core::scheduler::dispatch;
use hypervisor_core::{process_deployment, Outcome, SchedulerError};
use hypervisor_db::models::{Cluster, Deployment, DeploymentStatus, Priority};
use hypervisor_db::queries::{clusters as clusters_db, deployments as deployments_db};
use sqlx::PgPool;

use hypervisor_test_utils::{create_test_db, drop_test_db};

async fn make_cluster(pool: &PgPool, total_ram: i32, total_cpu: i32, total_gpu: i32) -> Cluster {
    clusters_db::insert_cluster(pool, "c1", total_ram, total_cpu, total_gpu, 1)
        .await
        .expect("cluster insert should succeed")
}

#[allow(clippy::too_many_arguments)]
async fn make_deployment(
    pool: &PgPool,
    cluster_id: i64,
    ram: i32,
    cpu: i32,
    gpu: i32,
    priority: Priority,
) -> Deployment {
    deployments_db::insert_deployment(
        pool,
        "registry/example:latest",
        ram,
        cpu,
        gpu,
        priority,
        cluster_id,
        1,
        20,
    )
    .await
    .expect("deployment insert should succeed")
}

async fn cluster_after(pool: &PgPool, id: i64) -> Cluster {
    clusters_db::get_cluster(pool, id)
        .await
        .expect("cluster fetch should succeed")
        .expect("cluster should exist")
}

async fn status_of(pool: &PgPool, id: i64) -> DeploymentStatus {
    deployments_db::get_deployment(pool, id)
        .await
        .expect("deployment fetch should succeed")
        .expect("deployment should exist")
        .status
}

/// S1 -- Direct admission: an empty cluster admits a deployment that fits.
#[tokio::test]
async fn s1_direct_admission() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let d1 = make_deployment(&pool, cluster.id, 16, 4, 1, Priority::High).await;

    let outcome = process_deployment(&pool, d1.id).await.unwrap();
    assert_eq!(outcome, Outcome::Admitted { preempted: vec![] });

    assert_eq!(status_of(&pool, d1.id).await, DeploymentStatus::Running);
    let c = cluster_after(&pool, cluster.id).await;
    assert_eq!((c.allocated_ram, c.allocated_cpu, c.allocated_gpu), (16, 4, 1));

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S2 -- Preemption: a HIGH-priority newcomer preempts a RUNNING LOW victim
/// to fit, and the victim is re-enqueued back to PENDING.
#[tokio::test]
async fn s2_preemption() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let dl = make_deployment(&pool, cluster.id, 32, 8, 2, Priority::Low).await;

    // Admit DL directly first so it is genuinely RUNNING before DH arrives.
    let outcome = process_deployment(&pool, dl.id).await.unwrap();
    assert_eq!(outcome, Outcome::Admitted { preempted: vec![] });

    let dh = make_deployment(&pool, cluster.id, 48, 12, 3, Priority::High).await;
    let outcome = process_deployment(&pool, dh.id).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Admitted {
            preempted: vec![dl.id]
        }
    );

    assert_eq!(status_of(&pool, dl.id).await, DeploymentStatus::Pending);
    assert_eq!(status_of(&pool, dh.id).await, DeploymentStatus::Running);

    let c = cluster_after(&pool, cluster.id).await;
    assert_eq!((c.allocated_ram, c.allocated_cpu, c.allocated_gpu), (48, 12, 3));

    // DL was re-enqueued: a fresh scheduling pass should be a no-op fit
    // failure (cluster is now full) that leaves it PENDING, not an error.
    let outcome = process_deployment(&pool, dl.id).await.unwrap();
    assert_eq!(outcome, Outcome::Waiting);
    assert_eq!(status_of(&pool, dl.id).await, DeploymentStatus::Pending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S3 -- Dependency gate: a dependent stays PENDING until its parent
/// reaches COMPLETED, then is admitted on the next scheduling pass.
#[tokio::test]
async fn s3_dependency_gate() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let da = make_deployment(&pool, cluster.id, 16, 4, 1, Priority::Low).await;
    let db = make_deployment(&pool, cluster.id, 16, 4, 1, Priority::High).await;

    dependency::validate_edge_addition(&pool, db.id, da.id)
        .await
        .expect("edge insertion should succeed");

    let outcome = process_deployment(&pool, db.id).await.unwrap();
    assert_eq!(outcome, Outcome::Waiting);
    assert_eq!(status_of(&pool, db.id).await, DeploymentStatus::Pending);

    // Admit DA directly, then complete it externally.
    process_deployment(&pool, da.id).await.unwrap();
    dispatch::complete(&pool, da.id).await.unwrap();
    assert_eq!(status_of(&pool, da.id).await, DeploymentStatus::Completed);

    let outcome = process_deployment(&pool, db.id).await.unwrap();
    assert_eq!(outcome, Outcome::Admitted { preempted: vec![] });
    assert_eq!(status_of(&pool, db.id).await, DeploymentStatus::Running);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S4 -- Cycle rejection: closing a cycle is refused and leaves the graph
/// unchanged.
#[tokio::test]
async fn s4_cycle_rejection() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let d1 = make_deployment(&pool, cluster.id, 4, 2, 0, Priority::Medium).await;
    let d2 = make_deployment(&pool, cluster.id, 4, 2, 0, Priority::Medium).await;

    dependency::validate_edge_addition(&pool, d1.id, d2.id)
        .await
        .expect("d1 -> d2 should succeed");

    let result = dependency::validate_edge_addition(&pool, d2.id, d1.id).await;
    assert!(matches!(result, Err(SchedulerError::CyclicDependency)));

    // Store state is unchanged: d1 still depends only on d2.
    let deps_of_d2 = deployments_db::get_dependencies_of(&pool, d2.id).await.unwrap();
    assert!(deps_of_d2.is_empty());
    let deps_of_d1 = deployments_db::get_dependencies_of(&pool, d1.id).await.unwrap();
    assert_eq!(deps_of_d1, vec![d2.id]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S5 -- Multilevel pending: a transitively-blocked deployment stays
/// PENDING even though its immediate parent is itself only PENDING.
#[tokio::test]
async fn s5_multilevel_pending() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let d_gp = make_deployment(&pool, cluster.id, 4, 2, 1, Priority::Medium).await;
    let d_p = make_deployment(&pool, cluster.id, 4, 2, 1, Priority::Medium).await;
    let d_c = make_deployment(&pool, cluster.id, 4, 2, 1, Priority::Medium).await;

    dependency::validate_edge_addition(&pool, d_p.id, d_gp.id)
        .await
        .unwrap();
    dependency::validate_edge_addition(&pool, d_c.id, d_p.id)
        .await
        .unwrap();

    let outcome = process_deployment(&pool, d_c.id).await.unwrap();
    assert_eq!(outcome, Outcome::Waiting);
    assert_eq!(status_of(&pool, d_c.id).await, DeploymentStatus::Pending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S6 -- Insufficient capacity, no preemptable victims: a same-or-higher
/// priority occupant is never touched, and the newcomer stays PENDING.
#[tokio::test]
async fn s6_insufficient_capacity_no_victims() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let dh = make_deployment(&pool, cluster.id, 64, 16, 4, Priority::High).await;
    process_deployment(&pool, dh.id).await.unwrap();
    assert_eq!(status_of(&pool, dh.id).await, DeploymentStatus::Running);

    let dx = make_deployment(&pool, cluster.id, 16, 4, 1, Priority::High).await;
    let outcome = process_deployment(&pool, dx.id).await.unwrap();
    assert_eq!(outcome, Outcome::Waiting);

    assert_eq!(status_of(&pool, dx.id).await, DeploymentStatus::Pending);
    assert_eq!(status_of(&pool, dh.id).await, DeploymentStatus::Running);

    let c = cluster_after(&pool, cluster.id).await;
    assert_eq!((c.allocated_ram, c.allocated_cpu, c.allocated_gpu), (64, 16, 4));

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// A deployment blocked solely on an unsatisfied dependency never gets
/// driven to FAILED, no matter how many scheduling passes it takes for
/// its parent to complete -- only resource starvation counts against the
/// retry budget.
#[tokio::test]
async fn dependency_wait_never_exhausts_retry_budget() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let parent = make_deployment(&pool, cluster.id, 4, 2, 0, Priority::Medium).await;

    // retry_max of 1: a single resource-starvation pass would normally be
    // enough to fail this deployment, but every pass here is gated on the
    // dependency, not on resources.
    let child = deployments_db::insert_deployment(
        &pool,
        "registry/example:latest",
        4,
        2,
        0,
        Priority::Medium,
        cluster.id,
        1,
        1,
    )
    .await
    .expect("deployment insert should succeed");
    dependency::validate_edge_addition(&pool, child.id, parent.id)
        .await
        .unwrap();

    for _ in 0..5 {
        let outcome = process_deployment(&pool, child.id).await.unwrap();
        assert_eq!(outcome, Outcome::Waiting);
    }
    assert_eq!(status_of(&pool, child.id).await, DeploymentStatus::Pending);

    process_deployment(&pool, parent.id).await.unwrap();
    dispatch::complete(&pool, parent.id).await.unwrap();

    let outcome = process_deployment(&pool, child.id).await.unwrap();
    assert_eq!(outcome, Outcome::Admitted { preempted: vec![] });
    assert_eq!(status_of(&pool, child.id).await, DeploymentStatus::Running);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// `process_deployment` is idempotent on a RUNNING input: a second pass
/// changes nothing.
#[tokio::test]
async fn process_deployment_is_idempotent_on_running() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let d1 = make_deployment(&pool, cluster.id, 16, 4, 1, Priority::Medium).await;

    process_deployment(&pool, d1.id).await.unwrap();
    let before = cluster_after(&pool, cluster.id).await;
    let since = Utc::now();

    let outcome = process_deployment(&pool, d1.id).await.unwrap();
    assert_eq!(outcome, Outcome::NoOp);

    let after = cluster_after(&pool, cluster.id).await;
    assert_eq!(
        (before.allocated_ram, before.allocated_cpu, before.allocated_gpu),
        (after.allocated_ram, after.allocated_cpu, after.allocated_gpu)
    );
    assert!(!deployments_db::updated_since(&pool, d1.id, since).await.unwrap());

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// A deployment can never be admitted while an unsatisfied dependency
/// exists, and once admitted, `allocated_*` exactly equals the sum of
/// RUNNING deployments' requirements on that cluster.
#[tokio::test]
async fn allocated_matches_sum_of_running_after_mixed_activity() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 100, 100, 100).await;
    let a = make_deployment(&pool, cluster.id, 10, 10, 1, Priority::Low).await;
    let b = make_deployment(&pool, cluster.id, 20, 20, 2, Priority::Medium).await;
    let c = make_deployment(&pool, cluster.id, 30, 30, 3, Priority::High).await;

    for dep in [&a, &b, &c] {
        process_deployment(&pool, dep.id).await.unwrap();
    }

    dispatch::complete(&pool, b.id).await.unwrap();

    let cluster_row = cluster_after(&pool, cluster.id).await;
    let running = deployments_db::list_deployments(&pool, Some(cluster.id), Some(DeploymentStatus::Running))
        .await
        .unwrap();
    let expected_ram: i32 = running.iter().map(|d| d.required_ram).sum();
    let expected_cpu: i32 = running.iter().map(|d| d.required_cpu).sum();
    let expected_gpu: i32 = running.iter().map(|d| d.required_gpu).sum();

    assert_eq!(cluster_row.allocated_ram, expected_ram);
    assert_eq!(cluster_row.allocated_cpu, expected_cpu);
    assert_eq!(cluster_row.allocated_gpu, expected_gpu);
    assert!(cluster_row.allocated_ram <= cluster_row.total_ram);
    assert!(cluster_row.allocated_cpu <= cluster_row.total_cpu);
    assert!(cluster_row.allocated_gpu <= cluster_row.total_gpu);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// Completing a deployment fans out scheduling to its direct dependents
/// without requiring them to be independently re-polled.
#[tokio::test]
async fn completion_enqueues_direct_dependents() {
    let (pool, db_name) = create_test_db().await;

    let cluster = make_cluster(&pool, 64, 16, 4).await;
    let parent = make_deployment(&pool, cluster.id, 8, 2, 0, Priority::Medium).await;
    let child = make_deployment(&pool, cluster.id, 8, 2, 0, Priority::Medium).await;
    dependency::validate_edge_addition(&pool, child.id, parent.id)
        .await
        .unwrap();

    process_deployment(&pool, parent.id).await.unwrap();
    process_deployment(&pool, child.id).await.unwrap();
    assert_eq!(status_of(&pool, child.id).await, DeploymentStatus::Pending);

    dispatch::complete(&pool, parent.id).await.unwrap();

    // dispatch::complete enqueued process_deployment for `child`; draining
    // the queue should admit it now that its only dependency is complete.
    let job = hypervisor_core::queue::claim_next(&pool, "test-worker")
        .await
        .unwrap()
        .expect("completion should have enqueued a job for the child");
    assert_eq!(job.deployment_id, child.id);

    process_deployment(&pool, child.id).await.unwrap();
    assert_eq!(status_of(&pool, child.id).await, DeploymentStatus::Running);

    pool.close().await;
    drop_test_db(&db_name).await;
}
