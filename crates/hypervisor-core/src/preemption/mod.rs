//! The preemption planner: given a newcomer that does not fit directly,
//! picks the smallest prefix of lower-priority running deployments (in
//! deterministic order) whose combined release would make it fit.
//!
//! A pure decision function over already-fetched rows — mutation is the
//! scheduler's job, not this module's.

use hypervisor_db::models::{Cluster, Deployment};

use crate::resource::can_fit;

/// Plan a preemption for `newcomer` against `cluster`.
///
/// `candidates` must already be filtered to `RUNNING` deployments on
/// `cluster` with priority rank strictly lower than `newcomer`'s; this
/// function only orders and greedily selects among them.
///
/// Returns the ids of deployments to preempt, in the order they should be
/// released, or `None` if releasing every candidate still would not make
/// `newcomer` fit (no partial plan is ever returned).
pub fn plan_preemption(
    cluster: &Cluster,
    newcomer: &Deployment,
    candidates: &[Deployment],
) -> Option<Vec<i64>> {
    let mut ordered: Vec<&Deployment> = candidates.iter().collect();
    ordered.sort_by_key(|d| (d.priority.rank(), d.id));

    let mut sim = cluster.clone();
    let mut victims = Vec::new();

    for victim in ordered {
        sim.allocated_ram -= victim.required_ram;
        sim.allocated_cpu -= victim.required_cpu;
        sim.allocated_gpu -= victim.required_gpu;
        victims.push(victim.id);

        if can_fit(&sim, newcomer) {
            return Some(victims);
        }
    }

    None
}
