// Worker - transcription job loop
//
// Registers, heartbeats on its own timer, claims up to capacity and runs each
// transcription in a spawned task so a panic fails the job, not the worker.

pub mod constants;
mod shutdown;

use constants::*;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::coordinator::DispatchCoordinator;
use crate::application::distributor::CompletionStatus;
use crate::application::guard::{with_retry, GuardPolicy};
use crate::domain::{Job, WorkerId};
use crate::error::{AppError, Result};
use crate::port::Transcriber;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Everything a spawned job task needs
#[derive(Clone)]
struct WorkerContext {
    worker_id: WorkerId,
    coordinator: Arc<DispatchCoordinator>,
    transcriber: Arc<dyn Transcriber>,
    guard: GuardPolicy,
}

impl WorkerContext {
    /// Transcribe `job` and report the outcome. Reports survive transient
    /// store errors through the guard.
    async fn process(self, job: Job) -> Result<CompletionStatus> {
        let job_id = job.id.clone();
        info!(
            job_id = %job_id,
            worker_id = %self.worker_id,
            file_name = %job.file_name,
            retry_count = job.retry_count,
            "Processing job"
        );

        let started = Instant::now();
        let transcriber = Arc::clone(&self.transcriber);
        let handle = tokio::spawn(async move { transcriber.transcribe(&job).await });

        let (status, error) = match handle.await {
            Ok(Ok(transcript)) => {
                info!(
                    job_id = %job_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    media_ms = transcript.duration_ms,
                    chars = transcript.text.len(),
                    "Transcription finished"
                );
                (CompletionStatus::Completed, None)
            }
            Ok(Err(e)) => {
                warn!(job_id = %job_id, error = %e, "Transcription failed");
                (CompletionStatus::Failed, Some(e.to_string()))
            }
            Err(join_err) => {
                error!(job_id = %job_id, error = %join_err, "Transcription task aborted");
                (CompletionStatus::Failed, Some(PANIC_ERROR_MESSAGE.to_string()))
            }
        };

        with_retry("complete_job", &self.guard, || {
            self.coordinator
                .complete_job(&job_id, &self.worker_id, status, error.clone())
        })
        .await?;
        Ok(status)
    }
}

pub struct TranscriptionWorker {
    ctx: WorkerContext,
    heartbeat_interval: Duration,
    idle_sleep: Duration,
}

impl TranscriptionWorker {
    pub fn new(
        worker_id: impl Into<WorkerId>,
        coordinator: Arc<DispatchCoordinator>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            ctx: WorkerContext {
                worker_id: worker_id.into(),
                coordinator,
                transcriber,
                guard: GuardPolicy::default(),
            },
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_sleep: IDLE_SLEEP_DURATION,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Run until `shutdown` fires. In-flight jobs finish and get reported
    /// before the worker unregisters.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let worker_id = self.ctx.worker_id.clone();
        let status = with_retry("register_worker", &self.ctx.guard, || {
            self.ctx.coordinator.register_worker(&worker_id)
        })
        .await?;
        info!(worker_id = %worker_id, health = %status, "Worker started");

        // Heartbeats continue while in-flight jobs drain
        let (heartbeat_stop, heartbeat_token) = shutdown_channel();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.ctx.clone(),
            self.heartbeat_interval,
            heartbeat_token,
        ));

        let mut in_flight = JoinSet::new();
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            while let Some(finished) = in_flight.try_join_next() {
                log_finished(&worker_id, finished);
            }

            let pause = match self.ctx.coordinator.claim_job(&worker_id).await {
                Ok(Some(job)) => {
                    in_flight.spawn(self.ctx.clone().process(job));
                    continue;
                }
                Ok(None) => self.idle_sleep,
                Err(AppError::NotFound(_)) => {
                    // Forgotten after a failure declaration or a restart
                    debug!(worker_id = %worker_id, "Not registered for claims, re-registering");
                    if let Err(e) = self.ctx.coordinator.register_worker(&worker_id).await {
                        error!(worker_id = %worker_id, error = %e, "Re-registration failed");
                    }
                    ERROR_RECOVERY_SLEEP_DURATION
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Claim failed");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };

            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => {
                    info!(worker_id = %worker_id, "Worker interrupted while idle");
                    break;
                }
            }
        }

        info!(
            worker_id = %worker_id,
            in_flight = in_flight.len(),
            "Worker draining in-flight jobs"
        );
        while let Some(finished) = in_flight.join_next().await {
            log_finished(&worker_id, finished);
        }

        heartbeat_stop.shutdown();
        if let Err(e) = heartbeat.await {
            warn!(worker_id = %worker_id, error = %e, "Heartbeat task ended abnormally");
        }

        match self.ctx.coordinator.unregister_worker(&worker_id).await {
            Ok(released) => info!(worker_id = %worker_id, released = released, "Worker stopped"),
            Err(e) => warn!(worker_id = %worker_id, error = %e, "Unregister on shutdown failed"),
        }
        Ok(())
    }

    /// Claim and fully process one job inline.
    /// Returns the reported status, or None if nothing was claimed.
    pub async fn process_next_job(&self) -> Result<Option<CompletionStatus>> {
        match self.ctx.coordinator.claim_job(&self.ctx.worker_id).await? {
            Some(job) => Ok(Some(self.ctx.clone().process(job).await?)),
            None => Ok(None),
        }
    }
}

async fn heartbeat_loop(ctx: WorkerContext, period: Duration, mut stop: ShutdownToken) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = stop.wait() => break,
        }
        match ctx.coordinator.heartbeat(&ctx.worker_id).await {
            Ok(status) => debug!(worker_id = %ctx.worker_id, health = %status, "Heartbeat"),
            Err(AppError::NotFound(_)) => {
                warn!(worker_id = %ctx.worker_id, "Monitor lost track of worker, re-registering");
                if let Err(e) = ctx.coordinator.register_worker(&ctx.worker_id).await {
                    error!(worker_id = %ctx.worker_id, error = %e, "Re-registration failed");
                }
            }
            Err(e) => warn!(worker_id = %ctx.worker_id, error = %e, "Heartbeat failed"),
        }
    }
}

fn log_finished(
    worker_id: &str,
    finished: std::result::Result<Result<CompletionStatus>, JoinError>,
) {
    match finished {
        Ok(Ok(status)) => debug!(worker_id = %worker_id, status = ?status, "Job reported"),
        Ok(Err(e)) => error!(worker_id = %worker_id, error = %e, "Job report failed"),
        Err(e) => error!(worker_id = %worker_id, error = %e, "Job task aborted"),
    }
}
