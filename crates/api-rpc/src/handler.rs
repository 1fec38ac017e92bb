//! RPC Method Handlers
//!
//! Thin translation between wire types and the dispatch coordinator.

use crate::error::to_rpc_error;
use crate::types::{
    ClaimResponse, CompleteRequest, CompleteResponse, HeartbeatResponse, JobCountsResponse,
    JobRequest, RegisterResponse, SubmitRequest, SystemHealthRequest, UnregisterResponse,
    WorkerRequest,
};
use jsonrpsee::types::ErrorObjectOwned;
use scribe_core::application::{DispatchCoordinator, SubmitJobRequest};
use scribe_core::domain::{Job, WorkerHealth};
use std::sync::Arc;
use tracing::debug;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    coordinator: Arc<DispatchCoordinator>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(coordinator: Arc<DispatchCoordinator>) -> Self {
        Self {
            coordinator,
            start_time: std::time::Instant::now(),
        }
    }

    /// worker.register.v1
    pub async fn register_worker(&self, params: WorkerRequest) -> RpcResult<RegisterResponse> {
        let status = self
            .coordinator
            .register_worker(&params.worker_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(RegisterResponse {
            worker_id: params.worker_id,
            status,
        })
    }

    /// worker.unregister.v1
    pub async fn unregister_worker(
        &self,
        params: WorkerRequest,
    ) -> RpcResult<UnregisterResponse> {
        let released_jobs = self
            .coordinator
            .unregister_worker(&params.worker_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(UnregisterResponse {
            worker_id: params.worker_id,
            released_jobs,
        })
    }

    /// worker.heartbeat.v1
    pub async fn heartbeat(&self, params: WorkerRequest) -> RpcResult<HeartbeatResponse> {
        let status = self
            .coordinator
            .heartbeat(&params.worker_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(HeartbeatResponse {
            worker_id: params.worker_id,
            status,
        })
    }

    /// worker.health.v1
    pub async fn worker_health(&self, params: WorkerRequest) -> RpcResult<WorkerHealth> {
        self.coordinator
            .get_worker_health(&params.worker_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.claim.v1
    pub async fn claim_job(&self, params: WorkerRequest) -> RpcResult<ClaimResponse> {
        let job = self
            .coordinator
            .claim_job(&params.worker_id)
            .await
            .map_err(to_rpc_error)?;
        debug!(worker_id = %params.worker_id, claimed = job.is_some(), "job.claim.v1");
        Ok(ClaimResponse { job })
    }

    /// job.complete.v1
    pub async fn complete_job(&self, params: CompleteRequest) -> RpcResult<CompleteResponse> {
        self.coordinator
            .complete_job(&params.job_id, &params.worker_id, params.status, params.error)
            .await
            .map_err(to_rpc_error)?;
        Ok(CompleteResponse {
            job_id: params.job_id,
            acknowledged: true,
        })
    }

    /// job.submit.v1
    pub async fn submit_job(&self, params: SubmitRequest) -> RpcResult<Job> {
        let req = SubmitJobRequest {
            owner_id: params.owner_id,
            file_name: params.file_name,
            file_size: params.file_size,
            priority: params.priority,
            max_retries: params.max_retries,
            options: params.options,
        };
        self.coordinator.submit_job(req).await.map_err(to_rpc_error)
    }

    /// job.get.v1
    pub async fn get_job(&self, params: JobRequest) -> RpcResult<Job> {
        self.coordinator
            .get_job(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// job.cancel.v1
    pub async fn cancel_job(&self, params: JobRequest) -> RpcResult<Job> {
        self.coordinator
            .cancel_job(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// system.health.v1
    ///
    /// Plain summary by default; `detailed` adds per-worker rows and counters.
    pub async fn system_health(&self, params: SystemHealthRequest) -> RpcResult<serde_json::Value> {
        let value = if params.detailed {
            serde_json::to_value(self.coordinator.health_report().await)
        } else {
            serde_json::to_value(self.coordinator.get_system_health().await)
        };
        value.map_err(|e| to_rpc_error(e.into()))
    }

    /// system.jobs.v1
    pub async fn job_counts(&self) -> RpcResult<JobCountsResponse> {
        let counts = self.coordinator.job_counts().await.map_err(to_rpc_error)?;
        Ok(JobCountsResponse {
            counts,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }
}
