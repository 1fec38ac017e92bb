//! SDK Request/Response Types
//!
//! Mirrors the wire types of the dispatch daemon.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Recovering,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Outcome a worker reports for a claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub language: Option<String>,
    pub vocabulary: Vec<String>,
    pub diarize: bool,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub status: JobStatus,
    pub priority: Priority,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub locked_by: Option<String>,
    pub locked_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WorkerRequest<'a> {
    pub worker_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobRequest<'a> {
    pub job_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CompleteRequest<'a> {
    pub job_id: &'a str,
    pub worker_id: &'a str,
    pub status: CompletionStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct HealthRequest {
    pub detailed: bool,
}

/// Job submission parameters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitRequest {
    pub owner_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i32>,
    pub options: JobOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnregisterResponse {
    pub worker_id: String,
    pub released_jobs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponse {
    pub worker_id: String,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClaimResponse {
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CompleteResponse {
    #[allow(dead_code)]
    pub job_id: String,
    #[allow(dead_code)]
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub status: HealthStatus,
    pub failure_count: u32,
    pub recovery_count: u32,
    pub last_heartbeat: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemHealth {
    /// "healthy" or "degraded"
    pub status: String,
    pub total_workers: usize,
    pub healthy_workers: usize,
    pub failed_workers: usize,
    pub recovering_workers: usize,
    pub failed_workers_total: u64,
}

impl SystemHealth {
    pub fn is_degraded(&self) -> bool {
        self.status == "degraded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_deserializes_from_daemon_payload() {
        let payload = serde_json::json!({
            "id": "job-1",
            "owner_id": "u1",
            "file_name": "talk.wav",
            "file_size": 1024,
            "status": "PROCESSING",
            "priority": "high",
            "retry_count": 1,
            "max_retries": 3,
            "created_at": 1,
            "updated_at": 2,
            "locked_by": "w1",
            "locked_at": 2,
            "next_retry_at": null,
            "completed_at": null,
            "error": null,
            "options": { "language": "en", "vocabulary": [], "diarize": false, "model": null }
        });
        let job: Job = serde_json::from_value(payload).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.priority, Priority::High);
        assert_eq!(job.locked_by.as_deref(), Some("w1"));
    }
}
