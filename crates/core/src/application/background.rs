// Background loops: stale-lock sweep, health check, recovery check
//
// Each loop ticks on a fixed interval. Every iteration runs in its own task so
// an error or panic is logged and the loop carries on after a short backoff.

use crate::application::config::DistributionConfig;
use crate::application::coordinator::DispatchCoordinator;
use crate::application::worker::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{error, info, warn};

pub struct BackgroundTasks {
    shutdown: ShutdownSender,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    grace: Duration,
}

impl BackgroundTasks {
    /// Spawn the three loops. Must be called inside a tokio runtime.
    pub fn start(coordinator: Arc<DispatchCoordinator>, config: &DistributionConfig) -> Self {
        let (shutdown, token) = shutdown_channel();
        let backoff = config.loop_error_backoff;

        let sweep = {
            let c = coordinator.clone();
            tokio::spawn(run_periodic(
                "stale_sweep",
                config.stale_sweep_interval,
                backoff,
                token.clone(),
                move || {
                    let c = c.clone();
                    async move { c.reclaim_stale_jobs().await.map(|_| ()) }
                },
            ))
        };

        let health = {
            let c = coordinator.clone();
            tokio::spawn(run_periodic(
                "health_check",
                config.health_check_interval,
                backoff,
                token.clone(),
                move || {
                    let c = c.clone();
                    async move { c.check_health().await.map(|_| ()) }
                },
            ))
        };

        let recovery = {
            let c = coordinator;
            tokio::spawn(run_periodic(
                "recovery_check",
                config.recovery_check_interval,
                backoff,
                token,
                move || {
                    let c = c.clone();
                    async move {
                        c.check_recovery().await;
                        Ok(())
                    }
                },
            ))
        };

        info!("Background loops started");
        Self {
            shutdown,
            handles: vec![
                ("stale_sweep", sweep),
                ("health_check", health),
                ("recovery_check", recovery),
            ],
            grace: config.shutdown_grace,
        }
    }

    /// Signal every loop, then wait up to the shutdown grace for them to
    /// finish. Stragglers are aborted.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        let deadline = tokio::time::Instant::now() + self.grace;

        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(loop_name = name, error = %e, "Background loop ended abnormally"),
                Err(_) => {
                    warn!(loop_name = name, "Background loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        info!("Background loops stopped");
    }
}

/// Run `tick` every `period` until `shutdown` fires
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    error_backoff: Duration,
    mut shutdown: ShutdownToken,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    info!(loop_name = name, period_ms = period.as_millis() as u64, "Background loop started");
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = shutdown.wait() => break,
        }

        let failed = match tokio::spawn(tick()).await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!(loop_name = name, error = %e, "Background iteration failed");
                true
            }
            Err(e) => {
                error!(loop_name = name, error = %e, "Background iteration panicked");
                true
            }
        };

        if failed {
            tokio::select! {
                _ = sleep(error_backoff) => {},
                _ = shutdown.wait() => break,
            }
        }
    }
    info!(loop_name = name, "Background loop stopped");
}
