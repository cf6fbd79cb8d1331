//! Role-based authorization.
//!
//! Deliberately a single decision function rather than a policy engine:
//! the role set and action set are both small and closed, so a match
//! expression is more auditable than a rule table that has to be loaded
//! and validated at startup.

use serde::{Deserialize, Serialize};

/// A caller's role, carried on each request via the `X-Hypervisor-Role`
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access: can create clusters, deployments, and dependency
    /// edges, and can mark deployments complete.
    Admin,
    /// Can create and inspect deployments and dependency edges on
    /// existing clusters, and mark their own deployments complete.
    /// Cannot create or modify clusters.
    Developer,
    /// Read-only.
    Viewer,
}

/// An action a caller may attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Read,
    Complete,
}

/// The kind of resource an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Cluster,
    Deployment,
    DependencyEdge,
}

/// Decide whether `role` may perform `action` on `resource`.
pub fn authorize(role: Role, action: Action, resource: Resource) -> bool {
    match role {
        Role::Admin => true,
        Role::Developer => match (action, resource) {
            (Action::Read, _) => true,
            (Action::Create, Resource::Cluster) => false,
            (Action::Create, Resource::Deployment | Resource::DependencyEdge) => true,
            (Action::Complete, Resource::Deployment) => true,
            (Action::Complete, Resource::Cluster | Resource::DependencyEdge) => false,
        },
        Role::Viewer => matches!(action, Action::Read),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_can_do_everything() {
        for action in [Action::Create, Action::Read, Action::Complete] {
            for resource in [Resource::Cluster, Resource::Deployment, Resource::DependencyEdge] {
                assert!(authorize(Role::Admin, action, resource));
            }
        }
    }

    #[test]
    fn viewer_is_read_only() {
        assert!(authorize(Role::Viewer, Action::Read, Resource::Deployment));
        assert!(!authorize(Role::Viewer, Action::Create, Resource::Deployment));
        assert!(!authorize(Role::Viewer, Action::Complete, Resource::Deployment));
    }

    #[test]
    fn developer_cannot_create_clusters() {
        assert!(!authorize(Role::Developer, Action::Create, Resource::Cluster));
    }

    #[test]
    fn developer_can_create_and_complete_deployments() {
        assert!(authorize(Role::Developer, Action::Create, Resource::Deployment));
        assert!(authorize(Role::Developer, Action::Complete, Resource::Deployment));
    }

    #[test]
    fn developer_can_read_clusters() {
        assert!(authorize(Role::Developer, Action::Read, Resource::Cluster));
    }
}
