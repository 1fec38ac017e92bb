// Dispatch Coordinator - single entry point for workers and tooling
//
// Wires registry, distributor, monitor and health aggregator together once at
// startup. Everything above the core (RPC, in-process workers) talks to this.

use crate::application::config::DistributionConfig;
use crate::application::distributor::{CompletionStatus, JobCounts, JobDistributor};
use crate::application::health::{HealthReport, SystemHealthAggregator};
use crate::application::monitor::FaultToleranceMonitor;
use crate::application::registry::WorkerRegistry;
use crate::application::submission::SubmitJobRequest;
use crate::domain::{HealthStatus, Job, SystemHealth, WorkerHealth, WorkerId};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_WORKER_ID_LEN: usize = 256;

pub struct DispatchCoordinator {
    distributor: Arc<JobDistributor>,
    monitor: Arc<FaultToleranceMonitor>,
    health: SystemHealthAggregator,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: &DistributionConfig,
    ) -> Self {
        let registry = Arc::new(WorkerRegistry::new(config.max_jobs_per_worker));
        let distributor = Arc::new(JobDistributor::new(
            store,
            registry,
            time_provider.clone(),
            id_provider,
            config,
        ));
        let monitor = Arc::new(FaultToleranceMonitor::new(
            distributor.clone(),
            time_provider,
            config,
        ));
        let health = SystemHealthAggregator::new(distributor.clone(), monitor.clone());

        Self {
            distributor,
            monitor,
            health,
        }
    }

    pub fn distributor(&self) -> &Arc<JobDistributor> {
        &self.distributor
    }

    pub fn monitor(&self) -> &Arc<FaultToleranceMonitor> {
        &self.monitor
    }

    /// Register with the monitor and, unless the worker is serving a failure
    /// cooldown, with the registry. Idempotent.
    pub async fn register_worker(&self, worker_id: &str) -> Result<HealthStatus> {
        validate_worker_id(worker_id)?;

        let status = self.monitor.register_worker(worker_id).await;
        if status == HealthStatus::Failed {
            warn!(
                worker_id = %worker_id,
                "Failed worker re-registered, claims blocked until recovery"
            );
        } else {
            self.distributor.register_worker(worker_id).await;
        }
        Ok(status)
    }

    /// Release the worker's leases, then forget it. Returns leases released.
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<usize> {
        validate_worker_id(worker_id)?;

        let released = self.distributor.unregister_worker(worker_id).await?;
        self.monitor.unregister_worker(worker_id).await;
        info!(worker_id = %worker_id, released = released, "Worker unregistered");
        Ok(released)
    }

    pub async fn claim_job(&self, worker_id: &str) -> Result<Option<Job>> {
        self.distributor.claim_job(worker_id).await
    }

    pub async fn complete_job(
        &self,
        job_id: &str,
        worker_id: &str,
        status: CompletionStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.distributor
            .complete_job(job_id, worker_id, status, error)
            .await
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<HealthStatus> {
        self.monitor.heartbeat(worker_id).await
    }

    pub async fn get_worker_health(&self, worker_id: &str) -> Result<WorkerHealth> {
        self.monitor
            .get_worker_health(worker_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Worker {} is not registered", worker_id)))
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        self.health.system_health().await
    }

    pub async fn health_report(&self) -> HealthReport {
        self.health.report().await
    }

    pub async fn submit_job(&self, req: SubmitJobRequest) -> Result<Job> {
        self.distributor.submit_job(req).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.distributor.get_job(job_id).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        self.distributor.cancel_job(job_id).await
    }

    pub async fn job_counts(&self) -> Result<JobCounts> {
        self.distributor.job_counts().await
    }

    pub async fn reclaim_stale_jobs(&self) -> Result<usize> {
        self.distributor.reclaim_stale_jobs().await
    }

    pub async fn check_health(&self) -> Result<Vec<WorkerId>> {
        self.monitor.check_health().await
    }

    pub async fn check_recovery(&self) -> Vec<WorkerId> {
        self.monitor.check_recovery().await
    }
}

fn validate_worker_id(worker_id: &str) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(AppError::Validation("worker_id cannot be empty".to_string()));
    }
    if worker_id.len() > MAX_WORKER_ID_LEN {
        return Err(AppError::Validation(format!(
            "worker_id too long (max {} bytes)",
            MAX_WORKER_ID_LEN
        )));
    }
    Ok(())
}
