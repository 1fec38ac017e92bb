// Job Store Port (Interface)

use crate::domain::{Job, JobId, JobStatus, WorkerId};
use crate::error::Result;
use async_trait::async_trait;

/// Parameters for an atomic claim
#[derive(Debug, Clone)]
pub struct ClaimCriteria {
    pub worker_id: WorkerId,
    pub now_millis: i64,
}

/// Durable job table. Source of truth for job state; arbitrates concurrent claims.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job
    async fn insert_job(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically pick the next eligible PENDING job and lease it to
    /// `criteria.worker_id`.
    ///
    /// Eligible: `next_retry_at` is null or `<= now`. Order: priority desc,
    /// created_at asc. Two concurrent callers never receive the same job.
    async fn find_and_lock_next_job(&self, criteria: &ClaimCriteria) -> Result<Option<Job>>;

    /// Persist the mutable fields of `job` only if the stored row is still at
    /// `job.version`, bumping the version on success.
    ///
    /// Returns false (and writes nothing) when another writer got there first:
    /// a re-claim, a report, a sweep or a cancel. Missing jobs are `NotFound`.
    async fn update_job(&self, job: &Job) -> Result<bool>;

    /// PROCESSING jobs whose `locked_at` is older than `cutoff_millis`
    async fn find_stale_processing_jobs(&self, cutoff_millis: i64) -> Result<Vec<Job>>;

    /// PROCESSING jobs currently leased to `worker_id`
    async fn find_processing_by_worker(&self, worker_id: &str) -> Result<Vec<Job>>;

    /// Count jobs by status
    async fn count_by_status(&self, status: JobStatus) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// In-memory store with the same claim semantics as the SQLite adapter.
    ///
    /// The whole map sits behind one mutex, so `find_and_lock_next_job` is
    /// atomic with respect to other callers.
    #[derive(Default)]
    pub struct InMemoryJobStore {
        jobs: Mutex<HashMap<JobId, Job>>,
        unavailable: AtomicBool,
        claim_queries: AtomicUsize,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail with `StoreUnavailable` until reset
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        /// Number of `find_and_lock_next_job` calls that reached the store
        pub fn claim_queries(&self) -> usize {
            self.claim_queries.load(Ordering::SeqCst)
        }

        fn check_available(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::StoreUnavailable(
                    "in-memory store marked unavailable".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert_job(&self, job: &Job) -> Result<()> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().await;
            if jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            self.check_available()?;
            Ok(self.jobs.lock().await.get(id).cloned())
        }

        async fn find_and_lock_next_job(&self, criteria: &ClaimCriteria) -> Result<Option<Job>> {
            self.check_available()?;
            self.claim_queries.fetch_add(1, Ordering::SeqCst);

            let mut jobs = self.jobs.lock().await;
            let next_id = jobs
                .values()
                .filter(|j| j.is_claimable(criteria.now_millis))
                .min_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then(a.created_at.cmp(&b.created_at))
                        .then(a.id.cmp(&b.id))
                })
                .map(|j| j.id.clone());

            let Some(id) = next_id else {
                return Ok(None);
            };
            let Some(job) = jobs.get_mut(&id) else {
                return Ok(None);
            };
            job.lease(&criteria.worker_id, criteria.now_millis)?;
            job.version += 1;
            Ok(Some(job.clone()))
        }

        async fn update_job(&self, job: &Job) -> Result<bool> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(&job.id) {
                Some(stored) if stored.version == job.version => {
                    *stored = job.clone();
                    stored.version += 1;
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Err(AppError::NotFound(format!("Job {} not found", job.id))),
            }
        }

        async fn find_stale_processing_jobs(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
            self.check_available()?;
            let jobs = self.jobs.lock().await;
            let mut stale: Vec<Job> = jobs
                .values()
                .filter(|j| {
                    j.status == JobStatus::Processing
                        && j.locked_at.map_or(false, |at| at < cutoff_millis)
                })
                .cloned()
                .collect();
            stale.sort_by_key(|j| j.locked_at);
            Ok(stale)
        }

        async fn find_processing_by_worker(&self, worker_id: &str) -> Result<Vec<Job>> {
            self.check_available()?;
            let jobs = self.jobs.lock().await;
            let mut held: Vec<Job> = jobs
                .values()
                .filter(|j| j.is_leased_by(worker_id))
                .cloned()
                .collect();
            held.sort_by_key(|j| j.locked_at);
            Ok(held)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            self.check_available()?;
            let jobs = self.jobs.lock().await;
            Ok(jobs.values().filter(|j| j.status == status).count() as i64)
        }
    }
}
