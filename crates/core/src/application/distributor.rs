// Job Distributor
//
// Sole authority for moving jobs into and out of PROCESSING: claims, completion
// and failure reports, stale-lock reclamation and failover release.

use crate::application::config::{millis, DistributionConfig};
use crate::application::registry::{SlotReservation, WorkerRegistry};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::submission::{self, SubmitJobRequest};
use crate::domain::{Job, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{ClaimCriteria, IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Re-reads allowed when a report races with a sweep or another report
const MAX_REPORT_ATTEMPTS: usize = 3;

/// Status a worker reports for a leased job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

/// What happened to a lease given back to the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Requeued { retry_count: i32, next_retry_at: i64 },
    FailedPermanently,
    /// Someone else (report, sweep, failover) got there first; nothing written
    AlreadyReleased,
}

/// Job counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Debug, Default)]
struct DistributorStats {
    claims: AtomicU64,
    completions: AtomicU64,
    failure_reports: AtomicU64,
    retries_scheduled: AtomicU64,
    permanent_failures: AtomicU64,
    stale_reclaimed: AtomicU64,
    failover_released: AtomicU64,
    cancelled: AtomicU64,
}

/// Counters since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorStatsSnapshot {
    pub claims: u64,
    pub completions: u64,
    pub failure_reports: u64,
    pub retries_scheduled: u64,
    pub permanent_failures: u64,
    pub stale_reclaimed: u64,
    pub failover_released: u64,
    pub cancelled: u64,
}

pub struct JobDistributor {
    store: Arc<dyn JobStore>,
    registry: Arc<WorkerRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    retry_policy: RetryPolicy,
    stale_job_timeout_ms: i64,
    default_max_retries: i32,
    stats: DistributorStats,
}

impl JobDistributor {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<WorkerRegistry>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: &DistributionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            time_provider,
            id_provider,
            retry_policy: RetryPolicy::from_config(config),
            stale_job_timeout_ms: millis(config.stale_job_timeout),
            default_max_retries: config.max_retries,
            stats: DistributorStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Idempotent. Returns true if the worker is new to the registry.
    pub async fn register_worker(&self, worker_id: &str) -> bool {
        self.registry.register(worker_id).await
    }

    /// Release every lease held by the worker, then forget it
    pub async fn unregister_worker(&self, worker_id: &str) -> Result<usize> {
        self.release_worker(worker_id, "worker unregistered").await
    }

    /// Claim the next eligible job for `worker_id`
    ///
    /// Returns `Ok(None)` when the worker is at capacity (no store query) or
    /// nothing is eligible. Unknown workers get `NotFound`.
    pub async fn claim_job(&self, worker_id: &str) -> Result<Option<Job>> {
        match self.registry.reserve_slot(worker_id).await {
            SlotReservation::Reserved => {}
            SlotReservation::AtCapacity => return Ok(None),
            SlotReservation::NotRegistered => {
                return Err(AppError::NotFound(format!(
                    "Worker {} is not registered",
                    worker_id
                )))
            }
        }

        let criteria = ClaimCriteria {
            worker_id: worker_id.to_string(),
            now_millis: self.time_provider.now_millis(),
        };

        let claimed = match self.store.find_and_lock_next_job(&criteria).await {
            Ok(claimed) => claimed,
            Err(e) => {
                self.registry.cancel_slot(worker_id).await;
                return Err(e);
            }
        };

        let Some(job) = claimed else {
            self.registry.cancel_slot(worker_id).await;
            return Ok(None);
        };

        if !self.registry.confirm_slot(worker_id, &job.id).await {
            // Worker was unregistered (failover) while the claim was in flight
            warn!(
                job_id = %job.id,
                worker_id = %worker_id,
                "Worker unregistered during claim, returning job to pool"
            );
            let mut returned = job.clone();
            returned.return_to_pool(self.time_provider.now_millis());
            self.store.update_job(&returned).await?;
            return Err(AppError::NotFound(format!(
                "Worker {} is not registered",
                worker_id
            )));
        }

        self.stats.claims.fetch_add(1, Ordering::Relaxed);
        let load_percent = self
            .registry
            .load(worker_id)
            .await
            .map_or(0.0, |load| load.load_percent);

        info!(
            job_id = %job.id,
            worker_id = %worker_id,
            priority = %job.priority,
            retry_count = job.retry_count,
            load_percent = load_percent,
            "Job claimed"
        );
        Ok(Some(job))
    }

    /// Apply a worker's completion or failure report
    ///
    /// - Terminal jobs: report ignored.
    /// - Completed: applied from any non-terminal status, even from a worker
    ///   that no longer holds the lease; the work is done.
    /// - Failed: retry policy applied while the job is PROCESSING. A failure for
    ///   a job already back in PENDING was accounted for when it was released
    ///   (sweep, failover) and is a no-op.
    ///
    /// The job leaves the reporter's held list in every case.
    pub async fn complete_job(
        &self,
        job_id: &str,
        worker_id: &str,
        status: CompletionStatus,
        error: Option<String>,
    ) -> Result<()> {
        for _ in 0..MAX_REPORT_ATTEMPTS {
            let job = self.get_job(job_id).await?;
            let now = self.time_provider.now_millis();

            if job.status.is_terminal() {
                warn!(
                    job_id = %job_id,
                    worker_id = %worker_id,
                    job_status = %job.status,
                    reported = ?status,
                    "Report for finished job ignored"
                );
                self.registry.release_job(worker_id, job_id).await;
                return Ok(());
            }

            let mut updated = job.clone();
            let decision = match status {
                CompletionStatus::Completed => {
                    if !job.is_leased_by(worker_id) {
                        warn!(
                            job_id = %job_id,
                            worker_id = %worker_id,
                            locked_by = ?job.locked_by,
                            job_status = %job.status,
                            "Completion from worker not holding the lease, applying anyway"
                        );
                    }
                    updated.complete(now)?;
                    None
                }
                CompletionStatus::Failed => {
                    if job.status != JobStatus::Processing {
                        // Lease already released and accounted for
                        warn!(
                            job_id = %job_id,
                            worker_id = %worker_id,
                            job_status = %job.status,
                            "Failure report for a released lease, ignoring"
                        );
                        self.registry.release_job(worker_id, job_id).await;
                        return Ok(());
                    }
                    if !job.is_leased_by(worker_id) {
                        warn!(
                            job_id = %job_id,
                            worker_id = %worker_id,
                            locked_by = ?job.locked_by,
                            "Failure report from worker not holding the lease, applying anyway"
                        );
                    }
                    warn!(
                        job_id = %job_id,
                        worker_id = %worker_id,
                        error = ?error,
                        "Worker reported job failure"
                    );
                    Some(self.retry_policy.apply(&mut updated, now, error.clone()))
                }
            };

            if !self.store.update_job(&updated).await? {
                debug!(job_id = %job_id, "Job changed concurrently, re-reading");
                continue;
            }

            self.registry.release_job(worker_id, job_id).await;
            if let Some(holder) = job.locked_by.as_deref().filter(|h| *h != worker_id) {
                self.registry.release_job(holder, job_id).await;
            }

            match status {
                CompletionStatus::Completed => {
                    self.stats.completions.fetch_add(1, Ordering::Relaxed);
                    info!(job_id = %job_id, worker_id = %worker_id, "Job completed");
                }
                CompletionStatus::Failed => {
                    self.stats.failure_reports.fetch_add(1, Ordering::Relaxed);
                }
            }
            if let Some(decision) = decision {
                self.record_decision(&decision, &updated);
            }
            return Ok(());
        }

        Err(AppError::Conflict(format!(
            "Job {} kept changing while applying report from {}",
            job_id, worker_id
        )))
    }

    /// Requeue (or permanently fail) every PROCESSING job whose lease is older
    /// than the stale timeout. Returns the number of leases reclaimed.
    pub async fn reclaim_stale_jobs(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.stale_job_timeout_ms;

        let stale = self.store.find_stale_processing_jobs(cutoff).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut reclaimed = 0;
        for job in stale {
            warn!(
                job_id = %job.id,
                worker_id = ?job.locked_by,
                lease_age_ms = ?job.locked_at.map(|at| now - at),
                "Reclaiming stale lease"
            );
            match self.release_lease(job, "lease expired without report").await {
                Ok(ReleaseOutcome::AlreadyReleased) => {}
                Ok(_) => {
                    reclaimed += 1;
                    self.stats.stale_reclaimed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => error!(error = %e, "Failed to reclaim stale lease"),
            }
        }

        info!(reclaimed = reclaimed, "Stale lock sweep complete");
        Ok(reclaimed)
    }

    /// Unregister `worker_id` and release all of its leases immediately.
    ///
    /// The store is asked for the worker's leases as well as the local held
    /// list, since the registry may have been rebuilt after a restart.
    pub async fn release_worker(&self, worker_id: &str, reason: &str) -> Result<usize> {
        let held = self.registry.unregister(worker_id).await.unwrap_or_default();
        let leased = self.store.find_processing_by_worker(worker_id).await?;

        if leased.len() != held.len() {
            debug!(
                worker_id = %worker_id,
                held_locally = held.len(),
                leased_in_store = leased.len(),
                "Registry and store disagree on held jobs"
            );
        }

        let mut released = 0;
        for job in leased {
            match self.release_lease(job, reason).await {
                Ok(ReleaseOutcome::AlreadyReleased) => {}
                Ok(_) => {
                    released += 1;
                    self.stats.failover_released.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => error!(worker_id = %worker_id, error = %e, "Failed to release lease"),
            }
        }

        info!(
            worker_id = %worker_id,
            released = released,
            reason = %reason,
            "Worker leases released"
        );
        Ok(released)
    }

    /// Treat the lease as failed and apply the retry policy.
    ///
    /// Idempotent: the write only lands while the row is unchanged since `job`
    /// was read, so a lease already released, or released and claimed again,
    /// is left alone.
    pub async fn release_lease(&self, job: Job, reason: &str) -> Result<ReleaseOutcome> {
        let holder = match job.locked_by.clone() {
            Some(holder) if job.status == JobStatus::Processing => holder,
            _ => return Ok(ReleaseOutcome::AlreadyReleased),
        };

        let now = self.time_provider.now_millis();
        let mut updated = job.clone();
        let decision = self
            .retry_policy
            .apply(&mut updated, now, Some(reason.to_string()));

        if !self.store.update_job(&updated).await? {
            debug!(job_id = %job.id, worker_id = %holder, "Lease already released");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }

        self.registry.release_job(&holder, &job.id).await;
        self.record_decision(&decision, &updated);

        Ok(match decision {
            RetryDecision::Retry(_) => ReleaseOutcome::Requeued {
                retry_count: updated.retry_count,
                next_retry_at: updated.next_retry_at.unwrap_or(now),
            },
            RetryDecision::Failed => ReleaseOutcome::FailedPermanently,
        })
    }

    /// Submit a new PENDING job
    pub async fn submit_job(&self, req: SubmitJobRequest) -> Result<Job> {
        submission::execute(
            self.store.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            self.default_max_retries,
            req,
        )
        .await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .find_by_id(&job_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    /// Cancel a job that has not finished yet, dropping any lease
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job> {
        for _ in 0..MAX_REPORT_ATTEMPTS {
            let job = self.get_job(job_id).await?;
            if job.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "Job {} is already {}",
                    job_id, job.status
                )));
            }

            let mut updated = job.clone();
            updated.cancel(self.time_provider.now_millis())?;
            if !self.store.update_job(&updated).await? {
                debug!(job_id = %job_id, "Job changed concurrently, re-reading");
                continue;
            }

            if let Some(holder) = job.locked_by.as_deref() {
                self.registry.release_job(holder, job_id).await;
            }
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            info!(job_id = %job_id, previous_status = %job.status, "Job cancelled");
            return Ok(updated);
        }

        Err(AppError::Conflict(format!(
            "Job {} kept changing while cancelling",
            job_id
        )))
    }

    pub async fn job_counts(&self) -> Result<JobCounts> {
        Ok(JobCounts {
            pending: self.store.count_by_status(JobStatus::Pending).await?,
            processing: self.store.count_by_status(JobStatus::Processing).await?,
            completed: self.store.count_by_status(JobStatus::Completed).await?,
            failed: self.store.count_by_status(JobStatus::Failed).await?,
            cancelled: self.store.count_by_status(JobStatus::Cancelled).await?,
        })
    }

    pub fn stats(&self) -> DistributorStatsSnapshot {
        DistributorStatsSnapshot {
            claims: self.stats.claims.load(Ordering::Relaxed),
            completions: self.stats.completions.load(Ordering::Relaxed),
            failure_reports: self.stats.failure_reports.load(Ordering::Relaxed),
            retries_scheduled: self.stats.retries_scheduled.load(Ordering::Relaxed),
            permanent_failures: self.stats.permanent_failures.load(Ordering::Relaxed),
            stale_reclaimed: self.stats.stale_reclaimed.load(Ordering::Relaxed),
            failover_released: self.stats.failover_released.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Count and log a retry decision once its write has landed
    fn record_decision(&self, decision: &RetryDecision, job: &Job) {
        match decision {
            RetryDecision::Retry(delay_ms) => {
                self.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
                info!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    max_retries = job.max_retries,
                    delay_ms = delay_ms,
                    "Job scheduled for retry"
                );
            }
            RetryDecision::Failed => {
                self.stats.permanent_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    error = ?job.error,
                    "Job failed permanently"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, Priority};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        clock: Arc<MockTimeProvider>,
        distributor: JobDistributor,
    }

    fn fixture(max_jobs: usize) -> Fixture {
        let config = DistributionConfig {
            max_jobs_per_worker: max_jobs,
            retry_delay: Duration::from_secs(10),
            retry_jitter: false,
            stale_job_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(MockTimeProvider::new(1_000_000));
        let distributor = JobDistributor::new(
            store.clone(),
            Arc::new(WorkerRegistry::new(config.max_jobs_per_worker)),
            clock.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            &config,
        );
        Fixture {
            store,
            clock,
            distributor,
        }
    }

    async fn insert(store: &InMemoryJobStore, id: &str, priority: Priority, created_at: i64) {
        let job = Job::new(id, "owner", format!("{}.wav", id), 100, created_at)
            .with_priority(priority);
        store.insert_job(&job).await.unwrap();
    }

    #[tokio::test]
    async fn test_priority_then_age_ordering() {
        let f = fixture(5);
        insert(&f.store, "A", Priority::Low, 1).await;
        insert(&f.store, "B", Priority::High, 2).await;
        insert(&f.store, "C", Priority::Normal, 3).await;
        f.distributor.register_worker("w1").await;

        let mut order = vec![];
        while let Some(job) = f.distributor.claim_job("w1").await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[tokio::test]
    async fn test_capacity_short_circuits_store() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        insert(&f.store, "B", Priority::Normal, 2).await;
        f.distributor.register_worker("w1").await;

        let first = f.distributor.claim_job("w1").await.unwrap().unwrap();
        let queries = f.store.claim_queries();
        assert!(f.distributor.claim_job("w1").await.unwrap().is_none());
        assert_eq!(f.store.claim_queries(), queries, "capacity check must not query");

        f.distributor
            .complete_job(&first.id, "w1", CompletionStatus::Completed, None)
            .await
            .unwrap();
        assert!(f.distributor.claim_job("w1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unregistered_worker_cannot_claim() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        let err = f.distributor.claim_job("ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_store_error_releases_reservation() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        f.distributor.register_worker("w1").await;

        f.store.set_unavailable(true);
        let err = f.distributor.claim_job("w1").await.unwrap_err();
        assert!(err.is_transient());

        f.store.set_unavailable(false);
        assert!(f.distributor.claim_job("w1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failure_report_backs_off() {
        let f = fixture(2);
        insert(&f.store, "A", Priority::Urgent, 1).await;
        insert(&f.store, "B", Priority::Low, 2).await;
        f.distributor.register_worker("w1").await;

        let job = f.distributor.claim_job("w1").await.unwrap().unwrap();
        assert_eq!(job.id, "A");
        f.distributor
            .complete_job("A", "w1", CompletionStatus::Failed, Some("gpu oom".into()))
            .await
            .unwrap();

        let stored = f.distributor.get_job("A").await.unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error.as_deref(), Some("gpu oom"));
        assert_eq!(stored.next_retry_at, Some(1_000_000 + 10_000));

        // A is in backoff: the low priority job is handed out instead
        let next = f.distributor.claim_job("w1").await.unwrap().unwrap();
        assert_eq!(next.id, "B");

        f.clock.advance_secs(10);
        let retried = f.distributor.claim_job("w1").await.unwrap().unwrap();
        assert_eq!(retried.id, "A");
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_terminal() {
        let f = fixture(1);
        let job = Job::new("A", "owner", "a.wav", 1, 1).with_max_retries(3);
        f.store.insert_job(&job).await.unwrap();
        f.distributor.register_worker("w1").await;

        for _ in 0..4 {
            let claimed = f.distributor.claim_job("w1").await.unwrap().unwrap();
            f.distributor
                .complete_job(&claimed.id, "w1", CompletionStatus::Failed, None)
                .await
                .unwrap();
            f.clock.advance_secs(3600);
        }

        let stored = f.distributor.get_job("A").await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert!(f.distributor.claim_job("w1").await.unwrap().is_none());
        assert_eq!(f.distributor.stats().permanent_failures, 1);
    }

    #[tokio::test]
    async fn test_stale_lease_reclaimed_for_other_worker() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        f.distributor.register_worker("w1").await;
        f.distributor.register_worker("w2").await;

        f.distributor.claim_job("w1").await.unwrap().unwrap();
        f.clock.advance_secs(30);
        assert_eq!(f.distributor.reclaim_stale_jobs().await.unwrap(), 0);

        f.clock.advance_secs(31);
        assert_eq!(f.distributor.reclaim_stale_jobs().await.unwrap(), 1);

        let stored = f.distributor.get_job("A").await.unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(f.distributor.registry().has_capacity("w1").await);

        f.clock.advance_secs(10);
        let claimed = f.distributor.claim_job("w2").await.unwrap().unwrap();
        assert_eq!(claimed.id, "A");
        assert!(claimed.is_leased_by("w2"));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let f = fixture(2);
        insert(&f.store, "A", Priority::Normal, 1).await;
        f.distributor.register_worker("w1").await;
        let claimed = f.distributor.claim_job("w1").await.unwrap().unwrap();

        let first = f
            .distributor
            .release_lease(claimed.clone(), "test")
            .await
            .unwrap();
        assert!(matches!(first, ReleaseOutcome::Requeued { retry_count: 1, .. }));

        // Same stale snapshot again (sweep racing failover)
        let second = f.distributor.release_lease(claimed, "test").await.unwrap();
        assert_eq!(second, ReleaseOutcome::AlreadyReleased);
        assert_eq!(f.distributor.get_job("A").await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_release_worker_frees_all_leases() {
        let f = fixture(2);
        insert(&f.store, "A", Priority::Normal, 1).await;
        insert(&f.store, "B", Priority::Normal, 2).await;
        f.distributor.register_worker("w1").await;
        f.distributor.claim_job("w1").await.unwrap().unwrap();
        f.distributor.claim_job("w1").await.unwrap().unwrap();

        let released = f
            .distributor
            .release_worker("w1", "declared failed")
            .await
            .unwrap();
        assert_eq!(released, 2);
        assert!(!f.distributor.registry().is_registered("w1").await);
        assert_eq!(f.store.count_by_status(JobStatus::Pending).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_late_reports_after_release() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        f.distributor.register_worker("w1").await;
        let claimed = f.distributor.claim_job("w1").await.unwrap().unwrap();
        f.distributor.release_lease(claimed, "test").await.unwrap();

        // Late failure: already accounted for
        f.distributor
            .complete_job("A", "w1", CompletionStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(f.distributor.get_job("A").await.unwrap().retry_count, 1);

        // Late success: the report wins
        f.distributor
            .complete_job("A", "w1", CompletionStatus::Completed, None)
            .await
            .unwrap();
        let stored = f.distributor.get_job("A").await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.validate().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_drops_lease() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        f.distributor.register_worker("w1").await;
        f.distributor.claim_job("w1").await.unwrap().unwrap();

        let cancelled = f.distributor.cancel_job("A").await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(f.distributor.registry().has_capacity("w1").await);
        assert!(matches!(
            f.distributor.cancel_job("A").await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_read_spares_fresh_lease() {
        let f = fixture(1);
        insert(&f.store, "A", Priority::Normal, 1).await;
        f.distributor.register_worker("w1").await;
        f.distributor.claim_job("w1").await.unwrap().unwrap();

        // Sweep takes its snapshot, then the holder reports and claims A again
        f.clock.advance_secs(61);
        let stale = f
            .store
            .find_stale_processing_jobs(f.clock.now_millis() - 60_000)
            .await
            .unwrap()
            .remove(0);
        f.distributor
            .complete_job("A", "w1", CompletionStatus::Failed, Some("crash".into()))
            .await
            .unwrap();
        f.clock.advance_secs(10);
        let reclaimed = f.distributor.claim_job("w1").await.unwrap().unwrap();
        assert_eq!(reclaimed.retry_count, 1);

        let outcome = f.distributor.release_lease(stale, "lease expired").await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::AlreadyReleased);

        let stored = f.distributor.get_job("A").await.unwrap();
        assert!(stored.is_leased_by("w1"));
        assert_eq!(stored.locked_at, reclaimed.locked_at);
        assert!(!f.distributor.registry().has_capacity("w1").await);

        // The second failure is charged on top of the first
        f.distributor
            .complete_job("A", "w1", CompletionStatus::Failed, None)
            .await
            .unwrap();
        assert_eq!(f.distributor.get_job("A").await.unwrap().retry_count, 2);
        assert_eq!(f.distributor.stats().retries_scheduled, 2);
    }

    /// Lets `worker` claim through the store right after the first read
    struct ClaimAfterFirstRead {
        inner: Arc<InMemoryJobStore>,
        registry: Arc<WorkerRegistry>,
        worker: &'static str,
        armed: AtomicBool,
    }

    #[async_trait]
    impl JobStore for ClaimAfterFirstRead {
        async fn insert_job(&self, job: &Job) -> Result<()> {
            self.inner.insert_job(job).await
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            let found = self.inner.find_by_id(id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.registry.reserve_slot(self.worker).await;
                let criteria = ClaimCriteria {
                    worker_id: self.worker.to_string(),
                    now_millis: 1_000_000,
                };
                if let Some(job) = self.inner.find_and_lock_next_job(&criteria).await? {
                    self.registry.confirm_slot(self.worker, &job.id).await;
                }
            }
            Ok(found)
        }

        async fn find_and_lock_next_job(&self, criteria: &ClaimCriteria) -> Result<Option<Job>> {
            self.inner.find_and_lock_next_job(criteria).await
        }

        async fn update_job(&self, job: &Job) -> Result<bool> {
            self.inner.update_job(job).await
        }

        async fn find_stale_processing_jobs(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
            self.inner.find_stale_processing_jobs(cutoff_millis).await
        }

        async fn find_processing_by_worker(&self, worker_id: &str) -> Result<Vec<Job>> {
            self.inner.find_processing_by_worker(worker_id).await
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            self.inner.count_by_status(status).await
        }
    }

    #[tokio::test]
    async fn test_cancel_rereads_after_concurrent_claim() {
        let config = DistributionConfig {
            max_jobs_per_worker: 1,
            ..Default::default()
        };
        let inner = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(WorkerRegistry::new(1));
        let store = Arc::new(ClaimAfterFirstRead {
            inner: inner.clone(),
            registry: registry.clone(),
            worker: "w2",
            armed: AtomicBool::new(false),
        });
        let distributor = JobDistributor::new(
            store.clone(),
            registry.clone(),
            Arc::new(MockTimeProvider::new(1_000_000)),
            Arc::new(SequentialIdProvider::new("job")),
            &config,
        );
        insert(&inner, "A", Priority::Normal, 1).await;
        distributor.register_worker("w2").await;

        store.armed.store(true, Ordering::SeqCst);
        let cancelled = distributor.cancel_job("A").await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // The claim landed first, so the cancel applied to w2's lease and
        // gave its slot back
        let stored = inner.find_by_id(&"A".to_string()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.version, 2);
        assert!(registry.has_capacity("w2").await);
    }
}
