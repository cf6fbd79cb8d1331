use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Priority of a deployment. Determines preemption rank: `High` can preempt
/// `Medium` and `Low`, `Medium` can preempt `Low` only, `Low` can preempt
/// nothing. Equal-priority deployments never preempt each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Numeric rank used by the preemption planner: higher outranks lower.
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(PriorityParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid priority: {:?}", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a deployment.
///
/// `Pending <-> Running` is bidirectional: preemption moves a running
/// deployment back to `Pending`. `Completed` and `Failed` are both
/// terminal -- a deployment never leaves either state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for DeploymentStatus {
    type Err = DeploymentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DeploymentStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`DeploymentStatus`] string.
#[derive(Debug, Clone)]
pub struct DeploymentStatusParseError(pub String);

impl fmt::Display for DeploymentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid deployment status: {:?}", self.0)
    }
}

impl std::error::Error for DeploymentStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A finite-capacity compute cluster. `allocated_*` tracks resources
/// currently committed to `Running` deployments; `total_* - allocated_*`
/// is what the resource accountant offers to new or requeued deployments.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cluster {
    pub id: i64,
    pub name: String,
    pub total_ram: i32,
    pub total_cpu: i32,
    pub total_gpu: i32,
    pub allocated_ram: i32,
    pub allocated_cpu: i32,
    pub allocated_gpu: i32,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    pub fn available_ram(&self) -> i32 {
        self.total_ram - self.allocated_ram
    }

    pub fn available_cpu(&self) -> i32 {
        self.total_cpu - self.allocated_cpu
    }

    pub fn available_gpu(&self) -> i32 {
        self.total_gpu - self.allocated_gpu
    }
}

/// A containerized workload targeted at a cluster.
///
/// `attempt` counts scheduling passes through `process_deployment`;
/// once it reaches `retry_max` without reaching `Completed`, the
/// scheduler moves the deployment to `Failed` instead of requeuing it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deployment {
    pub id: i64,
    pub docker_image_path: String,
    pub required_ram: i32,
    pub required_cpu: i32,
    pub required_gpu: i32,
    pub priority: Priority,
    pub status: DeploymentStatus,
    pub cluster_id: i64,
    pub created_by: i64,
    pub attempt: i32,
    pub retry_max: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An edge in the deployment dependency DAG: `dependent_id` depends on
/// `dependency_id`, which must reach `Completed` before the dependent
/// can be scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeploymentDependency {
    pub dependent_id: i64,
    pub dependency_id: i64,
}

/// A durable job queue row driving one scheduling pass over a
/// deployment. Claimed with `FOR UPDATE SKIP LOCKED`, released on
/// success, bumped forward with backoff on transient failure.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchedulerJob {
    pub id: i64,
    pub deployment_id: i64,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_display_roundtrip() {
        let variants = [Priority::Low, Priority::Medium, Priority::High];
        for v in &variants {
            let s = v.to_string();
            let parsed: Priority = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn priority_rank_order() {
        assert!(Priority::Low.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::High.rank());
    }

    #[test]
    fn priority_invalid() {
        let result = "urgent".parse::<Priority>();
        assert!(result.is_err());
    }

    #[test]
    fn deployment_status_display_roundtrip() {
        let variants = [
            DeploymentStatus::Pending,
            DeploymentStatus::Running,
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: DeploymentStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn deployment_status_invalid() {
        let result = "zombie".parse::<DeploymentStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn cluster_available_resources() {
        let cluster = Cluster {
            id: 1,
            name: "c1".into(),
            total_ram: 64,
            total_cpu: 16,
            total_gpu: 4,
            allocated_ram: 32,
            allocated_cpu: 8,
            allocated_gpu: 2,
            created_by: 1,
            created_at: Utc::now(),
        };
        assert_eq!(cluster.available_ram(), 32);
        assert_eq!(cluster.available_cpu(), 8);
        assert_eq!(cluster.available_gpu(), 2);
    }
}
