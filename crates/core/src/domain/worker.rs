// Worker health model

use serde::{Deserialize, Serialize};

/// Worker identity, unique per process instance (e.g. hostname + uuid)
pub type WorkerId = String;

/// Per-worker health as seen by the fault tolerance monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Recovering,
    Failed,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Recovering => write!(f, "recovering"),
            HealthStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: WorkerId,
    pub status: HealthStatus,
    pub failure_count: u32,
    pub recovery_count: u32,
    /// Epoch ms of the last heartbeat received
    pub last_heartbeat: i64,
}

/// Cluster-level verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Degraded,
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemStatus::Healthy => write!(f, "healthy"),
            SystemStatus::Degraded => write!(f, "degraded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: SystemStatus,
    pub total_workers: usize,
    pub healthy_workers: usize,
    pub failed_workers: usize,
    pub recovering_workers: usize,
    /// Monotonic count of failure declarations since startup
    pub failed_workers_total: u64,
}

impl SystemHealth {
    /// Degraded iff no registered worker is outside the failed set
    /// (an empty pool is degraded: nothing can process jobs).
    pub fn from_counts(
        total_workers: usize,
        failed_workers: usize,
        recovering_workers: usize,
        failed_workers_total: u64,
    ) -> Self {
        let status = if failed_workers < total_workers {
            SystemStatus::Healthy
        } else {
            SystemStatus::Degraded
        };
        Self {
            status,
            total_workers,
            healthy_workers: total_workers - failed_workers - recovering_workers,
            failed_workers,
            recovering_workers,
            failed_workers_total,
        }
    }
}
