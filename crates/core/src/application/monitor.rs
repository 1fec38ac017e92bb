// Fault Tolerance Monitor
//
// Heartbeat-driven failure detection with a failed -> recovering -> healthy
// state machine per worker. Absence from both sets means healthy.

use crate::application::config::{millis, DistributionConfig};
use crate::application::distributor::JobDistributor;
use crate::domain::{HealthStatus, SystemHealth, WorkerHealth, WorkerId};
use crate::error::{AppError, Result};
use crate::port::TimeProvider;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Health check timeouts a failed worker may stay silent, on top of the
/// failover delay, before it is forgotten
const FAILED_RETENTION_TIMEOUTS: i64 = 3;

#[derive(Debug, Clone)]
struct WorkerState {
    last_heartbeat: i64,
    failure_count: u32,
    recovery_count: u32,
    /// When the current failure was declared
    failed_at: Option<i64>,
}

impl WorkerState {
    fn new(now_millis: i64) -> Self {
        Self {
            last_heartbeat: now_millis,
            failure_count: 0,
            recovery_count: 0,
            failed_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    workers: HashMap<WorkerId, WorkerState>,
    failed: HashSet<WorkerId>,
    recovering: HashSet<WorkerId>,
    /// Failure declaration time of failed workers that unregistered before
    /// serving their cooldown
    cooldowns: HashMap<WorkerId, i64>,
}

impl MonitorState {
    fn status_of(&self, worker_id: &str) -> HealthStatus {
        if self.failed.contains(worker_id) {
            HealthStatus::Failed
        } else if self.recovering.contains(worker_id) {
            HealthStatus::Recovering
        } else {
            HealthStatus::Healthy
        }
    }

    fn health_of(&self, worker_id: &str) -> Option<WorkerHealth> {
        self.workers.get(worker_id).map(|state| WorkerHealth {
            worker_id: worker_id.to_string(),
            status: self.status_of(worker_id),
            failure_count: state.failure_count,
            recovery_count: state.recovery_count,
            last_heartbeat: state.last_heartbeat,
        })
    }
}

pub struct FaultToleranceMonitor {
    distributor: Arc<JobDistributor>,
    time_provider: Arc<dyn TimeProvider>,
    health_check_timeout_ms: i64,
    failure_threshold: u32,
    recovery_threshold: u32,
    failover_delay_ms: i64,
    state: Mutex<MonitorState>,
    failed_workers_total: AtomicU64,
}

impl FaultToleranceMonitor {
    pub fn new(
        distributor: Arc<JobDistributor>,
        time_provider: Arc<dyn TimeProvider>,
        config: &DistributionConfig,
    ) -> Self {
        Self {
            distributor,
            time_provider,
            health_check_timeout_ms: millis(config.health_check_timeout),
            failure_threshold: config.failure_threshold,
            recovery_threshold: config.recovery_threshold,
            failover_delay_ms: millis(config.failover_delay),
            state: Mutex::new(MonitorState::default()),
            failed_workers_total: AtomicU64::new(0),
        }
    }

    /// Start tracking `worker_id`. Idempotent: a known worker keeps its state
    /// (a failed worker stays failed until its cooldown is served) and only
    /// gets its heartbeat refreshed. A failed worker that unregistered and
    /// comes back inside its cooldown is tracked as failed again.
    pub async fn register_worker(&self, worker_id: &str) -> HealthStatus {
        let now = self.time_provider.now_millis();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match state.workers.get_mut(worker_id) {
            Some(existing) => existing.last_heartbeat = now,
            None => {
                let mut worker = WorkerState::new(now);
                let cooldown = state
                    .cooldowns
                    .remove(worker_id)
                    .filter(|failed_at| now - failed_at < self.failover_delay_ms);
                if let Some(failed_at) = cooldown {
                    worker.failed_at = Some(failed_at);
                    state.failed.insert(worker_id.to_string());
                    warn!(
                        worker_id = %worker_id,
                        failed_at = failed_at,
                        "Worker re-registered during failure cooldown"
                    );
                } else {
                    info!(worker_id = %worker_id, "Worker registered with monitor");
                }
                state.workers.insert(worker_id.to_string(), worker);
            }
        }
        state.status_of(worker_id)
    }

    /// Stop tracking `worker_id`. Returns false if it was unknown.
    ///
    /// A failed worker still inside its cooldown leaves the failure time
    /// behind, so registering again does not clear it.
    pub async fn unregister_worker(&self, worker_id: &str) -> bool {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().await;
        let was_failed = state.failed.remove(worker_id);
        state.recovering.remove(worker_id);
        let Some(worker) = state.workers.remove(worker_id) else {
            return false;
        };
        if let Some(failed_at) = worker.failed_at.filter(|_| was_failed) {
            if now - failed_at < self.failover_delay_ms {
                state.cooldowns.insert(worker_id.to_string(), failed_at);
            }
        }
        info!(worker_id = %worker_id, "Worker removed from monitor");
        true
    }

    /// Record a heartbeat and advance the recovery state machine.
    ///
    /// Unknown workers get `NotFound` so they can re-register.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<HealthStatus> {
        let now = self.time_provider.now_millis();
        let (status, reenlist) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let worker = state.workers.get_mut(worker_id).ok_or_else(|| {
                AppError::NotFound(format!("Worker {} is not registered", worker_id))
            })?;
            worker.last_heartbeat = now;

            let mut reenlist = false;
            if state.failed.contains(worker_id) {
                worker.recovery_count += 1;
                if Self::cooldown_served(
                    worker,
                    now,
                    self.recovery_threshold,
                    self.failover_delay_ms,
                ) {
                    state.failed.remove(worker_id);
                    state.recovering.insert(worker_id.to_string());
                    worker.failure_count = 0;
                    worker.recovery_count = 0;
                    worker.failed_at = None;
                    reenlist = true;
                    info!(worker_id = %worker_id, "Worker moved from failed to recovering");
                } else {
                    debug!(
                        worker_id = %worker_id,
                        recovery_count = worker.recovery_count,
                        "Heartbeat from failed worker"
                    );
                }
            } else if state.recovering.contains(worker_id) {
                worker.recovery_count += 1;
                if worker.recovery_count >= self.recovery_threshold {
                    state.recovering.remove(worker_id);
                    worker.recovery_count = 0;
                    info!(worker_id = %worker_id, "Worker recovered");
                }
            } else {
                worker.failure_count = 0;
            }

            (state.status_of(worker_id), reenlist)
        };

        if reenlist {
            self.distributor.register_worker(worker_id).await;
        }
        Ok(status)
    }

    /// One pass of the health-check loop.
    ///
    /// Each non-failed worker silent for longer than the health check timeout
    /// accrues one failure; at the threshold it is declared failed and its
    /// leases are released. Returns the workers declared failed in this pass.
    pub async fn check_health(&self) -> Result<Vec<WorkerId>> {
        let now = self.time_provider.now_millis();
        let mut newly_failed = Vec::new();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            for (worker_id, worker) in state.workers.iter_mut() {
                if state.failed.contains(worker_id) {
                    continue;
                }
                let silence_ms = now - worker.last_heartbeat;
                if silence_ms <= self.health_check_timeout_ms {
                    worker.failure_count = 0;
                    continue;
                }

                worker.failure_count += 1;
                warn!(
                    worker_id = %worker_id,
                    silence_ms = silence_ms,
                    failure_count = worker.failure_count,
                    threshold = self.failure_threshold,
                    "Worker missed health check"
                );
                if worker.failure_count >= self.failure_threshold {
                    worker.failed_at = Some(now);
                    worker.recovery_count = 0;
                    newly_failed.push(worker_id.clone());
                }
            }
            for worker_id in &newly_failed {
                state.recovering.remove(worker_id);
                state.failed.insert(worker_id.clone());
            }
            self.evict_silent_failed(state, now);
        }

        for worker_id in &newly_failed {
            let total = self.failed_workers_total.fetch_add(1, Ordering::Relaxed) + 1;
            error!(
                worker_id = %worker_id,
                failed_workers_total = total,
                "Worker declared failed"
            );
            // Stale-lock sweep remains the backstop if this release fails
            if let Err(e) = self
                .distributor
                .release_worker(worker_id, "worker declared failed")
                .await
            {
                error!(worker_id = %worker_id, error = %e, "Failed to release leases of failed worker");
            }
        }

        Ok(newly_failed)
    }

    /// One pass of the recovery loop: promote failed workers that served the
    /// cooldown and are heartbeating again. Returns the promoted workers.
    pub async fn check_recovery(&self) -> Vec<WorkerId> {
        let now = self.time_provider.now_millis();
        let mut promoted = Vec::new();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            for worker_id in state.failed.iter() {
                let Some(worker) = state.workers.get_mut(worker_id) else {
                    continue;
                };
                let fresh = now - worker.last_heartbeat <= self.health_check_timeout_ms;
                if fresh
                    && Self::cooldown_served(
                        worker,
                        now,
                        self.recovery_threshold,
                        self.failover_delay_ms,
                    )
                {
                    worker.failure_count = 0;
                    worker.recovery_count = 0;
                    worker.failed_at = None;
                    promoted.push(worker_id.clone());
                }
            }
            for worker_id in &promoted {
                state.failed.remove(worker_id);
                state.recovering.insert(worker_id.clone());
            }
        }

        for worker_id in &promoted {
            info!(worker_id = %worker_id, "Worker moved from failed to recovering");
            self.distributor.register_worker(worker_id).await;
        }
        promoted
    }

    pub async fn get_worker_health(&self, worker_id: &str) -> Option<WorkerHealth> {
        self.state.lock().await.health_of(worker_id)
    }

    /// All tracked workers, sorted by id
    pub async fn worker_healths(&self) -> Vec<WorkerHealth> {
        let state = self.state.lock().await;
        let mut healths: Vec<WorkerHealth> = state
            .workers
            .keys()
            .filter_map(|id| state.health_of(id))
            .collect();
        healths.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        healths
    }

    pub async fn get_system_health(&self) -> SystemHealth {
        let state = self.state.lock().await;
        SystemHealth::from_counts(
            state.workers.len(),
            state.failed.len(),
            state.recovering.len(),
            self.failed_workers_total(),
        )
    }

    pub async fn is_failed(&self, worker_id: &str) -> bool {
        self.state.lock().await.failed.contains(worker_id)
    }

    pub fn failed_workers_total(&self) -> u64 {
        self.failed_workers_total.load(Ordering::Relaxed)
    }

    /// Forget failed workers that served their cooldown and stayed silent well
    /// past it. A later heartbeat from one of them gets `NotFound`.
    fn evict_silent_failed(&self, state: &mut MonitorState, now_millis: i64) {
        let retention_ms =
            self.failover_delay_ms + FAILED_RETENTION_TIMEOUTS * self.health_check_timeout_ms;
        let evicted: Vec<WorkerId> = state
            .failed
            .iter()
            .filter(|id| {
                state.workers.get(*id).map_or(true, |worker| {
                    let cooled = worker
                        .failed_at
                        .map_or(true, |at| now_millis - at >= self.failover_delay_ms);
                    cooled && now_millis - worker.last_heartbeat > retention_ms
                })
            })
            .cloned()
            .collect();

        for worker_id in evicted {
            state.failed.remove(&worker_id);
            state.workers.remove(&worker_id);
            info!(worker_id = %worker_id, "Silent failed worker forgotten");
        }

        let failover_delay_ms = self.failover_delay_ms;
        state
            .cooldowns
            .retain(|_, failed_at| now_millis - *failed_at < failover_delay_ms);
    }

    fn cooldown_served(
        worker: &WorkerState,
        now_millis: i64,
        recovery_threshold: u32,
        failover_delay_ms: i64,
    ) -> bool {
        let dwell_ok = worker
            .failed_at
            .map_or(true, |at| now_millis - at >= failover_delay_ms);
        worker.recovery_count >= recovery_threshold && dwell_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::distributor::CompletionStatus;
    use crate::application::registry::WorkerRegistry;
    use crate::domain::{Job, JobStatus, SystemStatus};
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::JobStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        clock: Arc<MockTimeProvider>,
        distributor: Arc<JobDistributor>,
        monitor: FaultToleranceMonitor,
    }

    fn fixture() -> Fixture {
        let config = DistributionConfig {
            max_jobs_per_worker: 2,
            retry_delay: Duration::from_secs(1),
            retry_jitter: false,
            health_check_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(30),
            failure_threshold: 3,
            recovery_threshold: 3,
            failover_delay: Duration::from_secs(60),
            ..Default::default()
        };
        let store = Arc::new(InMemoryJobStore::new());
        let clock = Arc::new(MockTimeProvider::new(1_000_000));
        let distributor = Arc::new(JobDistributor::new(
            store.clone(),
            Arc::new(WorkerRegistry::new(config.max_jobs_per_worker)),
            clock.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            &config,
        ));
        let monitor = FaultToleranceMonitor::new(distributor.clone(), clock.clone(), &config);
        Fixture {
            store,
            clock,
            distributor,
            monitor,
        }
    }

    async fn register(f: &Fixture, worker_id: &str) {
        f.monitor.register_worker(worker_id).await;
        f.distributor.register_worker(worker_id).await;
    }

    /// Advance past the timeout and run checks until `worker_id` is failed
    async fn drive_to_failure(f: &Fixture, worker_id: &str) -> usize {
        let mut checks = 0;
        while !f.monitor.is_failed(worker_id).await {
            f.clock.advance_secs(10);
            f.monitor.check_health().await.unwrap();
            checks += 1;
            assert!(checks < 20, "worker never declared failed");
        }
        checks
    }

    #[tokio::test]
    async fn test_failure_needs_consecutive_misses() {
        let f = fixture();
        register(&f, "w1").await;

        f.clock.advance_secs(31);
        f.monitor.check_health().await.unwrap();
        f.monitor.check_health().await.unwrap();
        assert_eq!(f.monitor.get_worker_health("w1").await.unwrap().failure_count, 2);

        // A heartbeat clears the suspicion
        f.monitor.heartbeat("w1").await.unwrap();
        f.monitor.check_health().await.unwrap();
        let health = f.monitor.get_worker_health("w1").await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.failure_count, 0);
    }

    #[tokio::test]
    async fn test_failure_declared_exactly_once() {
        let f = fixture();
        register(&f, "w1").await;
        f.clock.advance_secs(31);

        let mut declared = vec![];
        for _ in 0..6 {
            declared.extend(f.monitor.check_health().await.unwrap());
        }
        assert_eq!(declared, vec!["w1".to_string()]);
        assert_eq!(f.monitor.failed_workers_total(), 1);
        assert!(!f.distributor.registry().is_registered("w1").await);
    }

    #[tokio::test]
    async fn test_failed_worker_jobs_released_to_survivor() {
        let f = fixture();
        for id in ["a", "b"] {
            f.store
                .insert_job(&Job::new(id, "owner", "m.wav", 1, 1))
                .await
                .unwrap();
        }
        register(&f, "w1").await;
        register(&f, "w2").await;
        f.distributor.claim_job("w1").await.unwrap().unwrap();
        f.distributor.claim_job("w1").await.unwrap().unwrap();
        assert!(f.distributor.claim_job("w1").await.unwrap().is_none());

        // w2 keeps heartbeating, w1 goes silent
        let mut checks = 0;
        while !f.monitor.is_failed("w1").await {
            f.clock.advance_secs(10);
            f.monitor.heartbeat("w2").await.unwrap();
            f.monitor.check_health().await.unwrap();
            checks += 1;
        }
        assert_eq!(checks, 6);
        assert!(!f.monitor.is_failed("w2").await);

        f.clock.advance_secs(5);
        let first = f.distributor.claim_job("w2").await.unwrap().unwrap();
        let second = f.distributor.claim_job("w2").await.unwrap().unwrap();
        assert_eq!(first.retry_count, 1);
        assert_eq!(second.retry_count, 1);

        // Failed worker cannot claim
        assert!(matches!(
            f.distributor.claim_job("w1").await,
            Err(AppError::NotFound(_))
        ));

        // w1's late success report still wins
        f.distributor
            .complete_job(&first.id, "w1", CompletionStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(
            f.distributor.get_job(&first.id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_recovery_respects_failover_delay() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;

        // Plenty of heartbeats right after failure: still failed
        for _ in 0..5 {
            f.clock.advance_secs(5);
            assert_eq!(f.monitor.heartbeat("w1").await.unwrap(), HealthStatus::Failed);
        }

        f.clock.advance_secs(35);
        assert_eq!(
            f.monitor.heartbeat("w1").await.unwrap(),
            HealthStatus::Recovering
        );
        assert!(f.distributor.registry().is_registered("w1").await);

        f.monitor.heartbeat("w1").await.unwrap();
        f.monitor.heartbeat("w1").await.unwrap();
        assert_eq!(
            f.monitor.heartbeat("w1").await.unwrap(),
            HealthStatus::Healthy
        );
        let health = f.monitor.get_worker_health("w1").await.unwrap();
        assert_eq!(health.recovery_count, 0);
        assert_eq!(health.failure_count, 0);
    }

    #[tokio::test]
    async fn test_recovery_loop_promotes_after_delay() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;

        for _ in 0..3 {
            f.monitor.heartbeat("w1").await.unwrap();
        }
        assert!(f.monitor.check_recovery().await.is_empty());

        f.clock.advance_secs(60);
        f.monitor.heartbeat("w1").await.unwrap();
        // Heartbeat already promoted it
        assert!(f.monitor.check_recovery().await.is_empty());
        assert_eq!(
            f.monitor.get_worker_health("w1").await.unwrap().status,
            HealthStatus::Recovering
        );
    }

    #[tokio::test]
    async fn test_recovery_loop_needs_fresh_heartbeat() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;
        for _ in 0..3 {
            f.monitor.heartbeat("w1").await.unwrap();
        }

        // Threshold met and cooldown served, but silent since
        f.clock.advance_secs(61);
        assert!(f.monitor.check_recovery().await.is_empty());
        assert!(f.monitor.is_failed("w1").await);
    }

    #[tokio::test]
    async fn test_recovery_loop_finishes_cooldown() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;

        f.clock.advance_secs(35);
        for _ in 0..3 {
            assert_eq!(f.monitor.heartbeat("w1").await.unwrap(), HealthStatus::Failed);
        }

        // No further heartbeat needed once the cooldown elapses
        f.clock.advance_secs(25);
        assert_eq!(f.monitor.check_recovery().await, vec!["w1".to_string()]);
        assert!(f.distributor.registry().is_registered("w1").await);
    }

    #[tokio::test]
    async fn test_reregister_keeps_failed_state() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;
        assert_eq!(f.monitor.register_worker("w1").await, HealthStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_worker_heartbeat() {
        let f = fixture();
        assert!(matches!(
            f.monitor.heartbeat("ghost").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_system_health_degraded_iff_all_failed() {
        let f = fixture();
        assert_eq!(f.monitor.get_system_health().await.status, SystemStatus::Degraded);

        register(&f, "w1").await;
        register(&f, "w2").await;
        assert_eq!(f.monitor.get_system_health().await.status, SystemStatus::Healthy);

        let mut checks = 0;
        while !f.monitor.is_failed("w1").await {
            f.clock.advance_secs(10);
            f.monitor.heartbeat("w2").await.unwrap();
            f.monitor.check_health().await.unwrap();
            checks += 1;
            assert!(checks < 20);
        }
        let health = f.monitor.get_system_health().await;
        assert_eq!(health.status, SystemStatus::Healthy);
        assert_eq!(health.failed_workers, 1);
        assert_eq!(health.healthy_workers, 1);

        drive_to_failure(&f, "w2").await;
        let health = f.monitor.get_system_health().await;
        assert_eq!(health.status, SystemStatus::Degraded);
        assert_eq!(health.total_workers, 2);
        assert_eq!(health.failed_workers_total, 2);
    }

    #[tokio::test]
    async fn test_silent_failed_worker_forgotten() {
        let f = fixture();
        register(&f, "w1").await;
        register(&f, "w2").await;

        // w2 stays alive while w1 fails and then keeps quiet
        for _ in 0..20 {
            f.clock.advance_secs(10);
            f.monitor.heartbeat("w2").await.unwrap();
            f.monitor.check_health().await.unwrap();
        }

        let health = f.monitor.get_system_health().await;
        assert_eq!(health.total_workers, 1);
        assert_eq!(health.failed_workers, 0);
        assert_eq!(health.failed_workers_total, 1);
        assert!(f.monitor.get_worker_health("w1").await.is_none());
        assert!(matches!(
            f.monitor.heartbeat("w1").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_worker_retained_until_long_silence() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;

        // Cooldown served but not yet silent past the retention window
        f.clock.advance_secs(70);
        f.monitor.check_health().await.unwrap();
        assert!(f.monitor.is_failed("w1").await);

        f.clock.advance_secs(60);
        f.monitor.check_health().await.unwrap();
        assert!(f.monitor.get_worker_health("w1").await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_keeps_failure_cooldown() {
        let f = fixture();
        register(&f, "w1").await;
        drive_to_failure(&f, "w1").await;

        assert!(f.monitor.unregister_worker("w1").await);
        assert_eq!(f.monitor.register_worker("w1").await, HealthStatus::Failed);
        for _ in 0..3 {
            assert_eq!(f.monitor.heartbeat("w1").await.unwrap(), HealthStatus::Failed);
        }

        // Once the original cooldown has elapsed a fresh registration is healthy
        f.monitor.unregister_worker("w1").await;
        f.clock.advance_secs(60);
        assert_eq!(f.monitor.register_worker("w1").await, HealthStatus::Healthy);
    }
}
