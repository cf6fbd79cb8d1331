//! The resource accountant: pure functions over an in-memory [`Cluster`]
//! that decide whether a deployment fits, and mutate the cluster's
//! `allocated_*` counters. Kept free of I/O so they're unit-testable
//! without a database; the scheduler persists the result inside its own
//! transaction via `hypervisor_db::queries::clusters::{debit,credit}_allocation`.

use anyhow::{bail, Result};
use hypervisor_db::models::{Cluster, Deployment};

/// True iff `cluster` has enough available RAM, CPU, and GPU to admit
/// `deployment`.
pub fn can_fit(cluster: &Cluster, deployment: &Deployment) -> bool {
    cluster.available_ram() >= deployment.required_ram
        && cluster.available_cpu() >= deployment.required_cpu
        && cluster.available_gpu() >= deployment.required_gpu
}

/// Commit `deployment`'s resources against `cluster`.
///
/// Precondition: `can_fit(cluster, deployment)` holds. Callers that skip
/// the check (e.g. after a preemption plan already verified it) still get
/// a checked add, since an unexpected overcommit is always a bug worth
/// surfacing rather than silently allowing.
pub fn debit(cluster: &mut Cluster, deployment: &Deployment) -> Result<()> {
    if !can_fit(cluster, deployment) {
        bail!(
            "cannot debit cluster {}: deployment {} does not fit (available ram={} cpu={} gpu={}, required ram={} cpu={} gpu={})",
            cluster.id,
            deployment.id,
            cluster.available_ram(),
            cluster.available_cpu(),
            cluster.available_gpu(),
            deployment.required_ram,
            deployment.required_cpu,
            deployment.required_gpu,
        );
    }

    cluster.allocated_ram += deployment.required_ram;
    cluster.allocated_cpu += deployment.required_cpu;
    cluster.allocated_gpu += deployment.required_gpu;
    Ok(())
}

/// Release `deployment`'s resources from `cluster`.
///
/// Must be called exactly once per RUNNING -> PENDING or RUNNING ->
/// COMPLETED transition. `allocated_X` must not underflow; an underflow
/// here means a deployment was credited twice, which is always a bug.
pub fn credit(cluster: &mut Cluster, deployment: &Deployment) -> Result<()> {
    if cluster.allocated_ram < deployment.required_ram
        || cluster.allocated_cpu < deployment.required_cpu
        || cluster.allocated_gpu < deployment.required_gpu
    {
        bail!(
            "cannot credit cluster {}: deployment {} would underflow allocation (allocated ram={} cpu={} gpu={}, required ram={} cpu={} gpu={})",
            cluster.id,
            deployment.id,
            cluster.allocated_ram,
            cluster.allocated_cpu,
            cluster.allocated_gpu,
            deployment.required_ram,
            deployment.required_cpu,
            deployment.required_gpu,
        );
    }

    cluster.allocated_ram -= deployment.required_ram;
    cluster.allocated_cpu -= deployment.required_cpu;
    cluster.allocated_gpu -= deployment.required_gpu;
    Ok(())
}
