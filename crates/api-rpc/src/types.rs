//! RPC Request/Response Types
//!
//! Parameters and results of the JSON-RPC methods. Job, health and report
//! payloads reuse the core types directly.

use scribe_core::application::{CompletionStatus, JobCounts};
use scribe_core::domain::{HealthStatus, Job, JobOptions, Priority};
use serde::{Deserialize, Serialize};

/// worker.register.v1 / worker.unregister.v1 / worker.heartbeat.v1 /
/// worker.health.v1 / job.claim.v1
#[derive(Debug, Deserialize)]
pub struct WorkerRequest {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterResponse {
    pub worker_id: String,
    /// Leases handed back to the pool
    pub released_jobs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub worker_id: String,
    pub status: HealthStatus,
}

/// job.claim.v1 - `job` is null when nothing is claimable or the worker is full
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<Job>,
}

/// job.complete.v1
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub job_id: String,
    pub worker_id: String,
    pub status: CompletionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub job_id: String,
    pub acknowledged: bool,
}

/// job.submit.v1
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub file_name: String,
    pub file_size: i64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub max_retries: Option<i32>,
    #[serde(default)]
    pub options: JobOptions,
}

/// job.get.v1 / job.cancel.v1
#[derive(Debug, Deserialize)]
pub struct JobRequest {
    pub job_id: String,
}

/// system.health.v1
#[derive(Debug, Default, Deserialize)]
pub struct SystemHealthRequest {
    /// Include per-worker detail and distributor counters
    #[serde(default)]
    pub detailed: bool,
}

/// system.jobs.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCountsResponse {
    #[serde(flatten)]
    pub counts: JobCounts,
    pub uptime_seconds: i64,
}
