//! The dependency resolver: checks whether a deployment's immediate
//! parents have all completed, and guards the dependency graph against
//! cycles on edge insertion.
//!
//! The graph itself is never materialized as an in-memory pointer
//! structure outside of [`validate_edge_addition`]'s one-shot cycle
//! check -- every other read goes straight to the `deployment_dependencies`
//! edge table.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use sqlx::PgPool;

use hypervisor_db::queries::deployments as db;

use crate::error::{as_transient, SchedulerError};

/// True iff every direct dependency of `dependent_id` has status
/// `completed`. A deployment with no dependencies is trivially satisfied.
pub async fn dependencies_satisfied(pool: &PgPool, dependent_id: i64) -> Result<bool> {
    db::dependencies_satisfied(pool, dependent_id).await
}

/// A fixed `pg_advisory_xact_lock` key guarding the cycle-check-then-insert
/// unit below. Dependency edges are not scoped to one cluster, so there is
/// no natural per-resource key to lock on; one constant key serializes all
/// edge insertions against each other cluster-wide, which is the "coarse
/// lock" `spec.md` §4.2/§5 calls for.
const DEPENDENCY_GRAPH_LOCK_KEY: i64 = 0x4859_5045_5256_0001;

/// Validate that adding the edge `from` depends-on `to` would not close a
/// cycle, and insert it if not.
///
/// Fetches the whole edge table and walks it with a depth-first search
/// starting at `to`: if that search reaches `from`, `to` already
/// (transitively) depends on `from`, so the new edge would close a loop.
/// The check and the insert run inside one transaction holding
/// `pg_advisory_xact_lock(DEPENDENCY_GRAPH_LOCK_KEY)` for its duration, so
/// two concurrent insertions can never jointly introduce a cycle that
/// neither insertion alone would create -- the lock is released
/// automatically when the transaction commits or rolls back.
pub async fn validate_edge_addition(
    pool: &PgPool,
    from: i64,
    to: i64,
) -> Result<(), SchedulerError> {
    if from == to {
        return Err(SchedulerError::CyclicDependency);
    }

    let mut tx = pool.begin().await.map_err(SchedulerError::TransientStore)?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(DEPENDENCY_GRAPH_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(SchedulerError::TransientStore)?;

    let edges = db::list_all_dependency_edges_tx(&mut tx)
        .await
        .map_err(as_transient)?;

    let mut adjacency: HashMap<i64, Vec<i64>> = HashMap::new();
    for edge in &edges {
        adjacency
            .entry(edge.dependent_id)
            .or_default()
            .push(edge.dependency_id);
    }

    if reaches(&adjacency, to, from) {
        return Err(SchedulerError::CyclicDependency);
    }

    db::insert_dependency_edge_tx(&mut tx, from, to)
        .await
        .map_err(as_transient)?;

    tx.commit().await.map_err(SchedulerError::TransientStore)?;

    Ok(())
}

/// Depth-first search over the depends-on adjacency starting at `start`,
/// looking for `target`.
fn reaches(adjacency: &HashMap<i64, Vec<i64>>, start: i64, target: i64) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(&node) {
            stack.extend(next.iter().copied());
        }
    }

    false
}
