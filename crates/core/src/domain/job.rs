// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::worker::WorkerId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal jobs are never claimed or released again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Processing => write!(f, "PROCESSING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(DomainError::InvalidStatus(other.to_string())),
        }
    }
}

/// Priority (ordered: Low < Normal < High < Urgent)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Storage rank (higher number = claimed first)
    pub fn as_i32(&self) -> i32 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

impl TryFrom<i32> for Priority {
    type Error = DomainError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Urgent),
            other => Err(DomainError::InvalidPriority(other)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

/// Transcription options, opaque to the distributor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub language: Option<String>,
    pub vocabulary: Vec<String>,
    pub diarize: bool,
    pub model: Option<String>,
}

/// Transcription job
///
/// `locked_by` / `locked_at` form the lease and are only set while the job is
/// `Processing`. All timestamps are epoch ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: String,
    pub file_name: String,
    pub file_size: i64,

    pub status: JobStatus,
    pub priority: Priority,

    pub retry_count: i32,
    pub max_retries: i32,

    pub created_at: i64,
    pub updated_at: i64,

    // Lease
    pub locked_by: Option<WorkerId>,
    pub locked_at: Option<i64>,

    /// Earliest time a retried job may be claimed again
    pub next_retry_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Last failure reason reported by a worker (or the sweep)
    pub error: Option<String>,

    pub options: JobOptions,

    /// Row version, bumped by the store on every write. Conditional updates
    /// compare against the version that was read.
    #[serde(default)]
    pub version: i64,
}

/// Default number of retries before a job fails permanently
pub const DEFAULT_MAX_RETRIES: i32 = 3;

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `owner_id` - Uploading user
    /// * `file_name` - Media file name in object storage
    /// * `file_size` - Media size in bytes
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        file_size: i64,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            file_size,
            status: JobStatus::Pending,
            priority: Priority::Normal,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at,
            updated_at: created_at,
            locked_by: None,
            locked_at: None,
            next_retry_at: None,
            completed_at: None,
            error: None,
            options: JobOptions::default(),
            version: 0,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// IDs are `test-1`, `test-2`, ...; `created_at` grows by 1000 per job so
    /// creation order is preserved. Only for tests.
    pub fn new_test(file_name: impl Into<String>, priority: Priority) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut job = Self::new(
            format!("test-{}", counter),
            "test-owner",
            file_name,
            1024,
            (counter * 1000) as i64,
        );
        job.priority = priority;
        job
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Pending and past its retry backoff
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Pending
            && self.next_retry_at.map_or(true, |at| at <= now_millis)
    }

    pub fn is_leased_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.locked_by.as_deref() == Some(worker_id)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Pending -> Processing, taking the lease for `worker_id`
    pub fn lease(&mut self, worker_id: &str, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: JobStatus::Processing.to_string(),
            });
        }
        self.status = JobStatus::Processing;
        self.locked_by = Some(worker_id.to_string());
        self.locked_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Mark Completed. Accepted from any non-terminal state: a late success
    /// report wins over a lease that was already released.
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: JobStatus::Completed.to_string(),
            });
        }
        self.status = JobStatus::Completed;
        self.clear_lease();
        self.next_retry_at = None;
        self.completed_at = Some(now_millis);
        self.error = None;
        self.updated_at = now_millis;
        Ok(())
    }

    /// Give a lease back without counting it as a failure
    pub fn return_to_pool(&mut self, now_millis: i64) {
        self.status = JobStatus::Pending;
        self.clear_lease();
        self.updated_at = now_millis;
    }

    /// Back to Pending with one more retry consumed
    pub fn schedule_retry(&mut self, now_millis: i64, delay_ms: i64, error: Option<String>) {
        self.retry_count += 1;
        self.status = JobStatus::Pending;
        self.clear_lease();
        self.next_retry_at = Some(now_millis + delay_ms);
        self.error = error;
        self.updated_at = now_millis;
    }

    /// Terminal failure, retries exhausted
    pub fn fail_permanently(&mut self, now_millis: i64, error: Option<String>) {
        self.status = JobStatus::Failed;
        self.clear_lease();
        self.next_retry_at = None;
        self.completed_at = Some(now_millis);
        self.error = error;
        self.updated_at = now_millis;
    }

    /// Cancel a non-terminal job (user action)
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: JobStatus::Cancelled.to_string(),
            });
        }
        self.status = JobStatus::Cancelled;
        self.clear_lease();
        self.next_retry_at = None;
        self.completed_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Verify the lease/retry invariants hold
    pub fn validate(&self) -> Result<()> {
        if self.retry_count > self.max_retries {
            return Err(DomainError::ValidationError(format!(
                "retry_count {} exceeds max_retries {}",
                self.retry_count, self.max_retries
            )));
        }
        let leased = self.locked_by.is_some();
        if leased != (self.status == JobStatus::Processing) {
            return Err(DomainError::ValidationError(format!(
                "locked_by must be set iff PROCESSING (status {}, locked_by {:?})",
                self.status, self.locked_by
            )));
        }
        Ok(())
    }

    fn clear_lease(&mut self) {
        self.locked_by = None;
        self.locked_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::try_from(2).unwrap(), Priority::High);
        assert!(Priority::try_from(7).is_err());
    }

    #[test]
    fn test_status_round_trip_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_lease_and_complete() {
        let mut job = Job::new("job-1", "owner", "talk.mp3", 10, 1000);
        assert!(job.validate().is_ok());

        job.lease("w1", 2000).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.is_leased_by("w1"));
        assert!(!job.is_leased_by("w2"));
        assert!(job.validate().is_ok());

        // Cannot lease twice
        assert!(job.lease("w2", 2100).is_err());

        job.complete(3000).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.locked_by.is_none());
        assert_eq!(job.completed_at, Some(3000));
        assert!(job.validate().is_ok());
        assert!(job.complete(3100).is_err());
    }

    #[test]
    fn test_schedule_retry_clears_lease() {
        let mut job = Job::new("job-2", "owner", "talk.mp3", 10, 1000);
        job.lease("w1", 2000).unwrap();
        job.schedule_retry(3000, 500, Some("model crashed".into()));

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.next_retry_at, Some(3500));
        assert!(!job.is_claimable(3499));
        assert!(job.is_claimable(3500));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_cancel_terminal_rejected() {
        let mut job = Job::new("job-3", "owner", "talk.mp3", 10, 1000);
        job.fail_permanently(2000, Some("boom".into()));
        assert!(job.cancel(2100).is_err());

        let mut pending = Job::new("job-4", "owner", "talk.mp3", 10, 1000);
        pending.cancel(2000).unwrap();
        assert_eq!(pending.status, JobStatus::Cancelled);
    }
}
