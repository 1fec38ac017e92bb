// System Health Aggregator
// Read-only view over registry + monitor state; recomputed on every query.

use crate::application::distributor::{DistributorStatsSnapshot, JobDistributor};
use crate::application::monitor::FaultToleranceMonitor;
use crate::domain::{HealthStatus, JobId, SystemHealth, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One worker as seen by both the monitor and the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: WorkerId,
    pub status: HealthStatus,
    pub failure_count: u32,
    pub recovery_count: u32,
    pub last_heartbeat: i64,
    /// False while failed: the registry forgets failed workers
    pub registered: bool,
    pub held_jobs: Vec<JobId>,
    pub load_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    #[serde(flatten)]
    pub system: SystemHealth,
    pub workers: Vec<WorkerReport>,
    pub stats: DistributorStatsSnapshot,
    pub version: String,
}

pub struct SystemHealthAggregator {
    distributor: Arc<JobDistributor>,
    monitor: Arc<FaultToleranceMonitor>,
}

impl SystemHealthAggregator {
    pub fn new(distributor: Arc<JobDistributor>, monitor: Arc<FaultToleranceMonitor>) -> Self {
        Self {
            distributor,
            monitor,
        }
    }

    pub async fn system_health(&self) -> SystemHealth {
        self.monitor.get_system_health().await
    }

    pub async fn report(&self) -> HealthReport {
        let system = self.monitor.get_system_health().await;
        let healths = self.monitor.worker_healths().await;
        let registry = self.distributor.registry();

        let mut workers = Vec::with_capacity(healths.len());
        for health in healths {
            let load = registry.load(&health.worker_id).await;
            workers.push(WorkerReport {
                registered: load.is_some(),
                held_jobs: load.as_ref().map(|l| l.held_jobs.clone()).unwrap_or_default(),
                load_percent: load.as_ref().map_or(0.0, |l| l.load_percent),
                worker_id: health.worker_id,
                status: health.status,
                failure_count: health.failure_count,
                recovery_count: health.recovery_count,
                last_heartbeat: health.last_heartbeat,
            });
        }

        HealthReport {
            system,
            workers,
            stats: self.distributor.stats(),
            version: crate::VERSION.to_string(),
        }
    }
}
