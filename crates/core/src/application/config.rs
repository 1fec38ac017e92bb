// Distribution configuration
// One struct carries every tunable of the distributor, monitor and sweeps.

use crate::error::{AppError, Result};
use std::time::Duration;

pub const DEFAULT_MAX_JOBS_PER_WORKER: usize = 2;
pub const DEFAULT_MAX_RETRIES: i32 = crate::domain::job::DEFAULT_MAX_RETRIES;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);
pub const DEFAULT_STALE_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_THRESHOLD: u32 = 3;
pub const DEFAULT_FAILOVER_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_RECOVERY_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_LOOP_ERROR_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Tunables for job distribution and failure detection
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionConfig {
    /// Leases a single worker may hold at once
    pub max_jobs_per_worker: usize,
    /// Retries granted to newly submitted jobs
    pub max_retries: i32,
    /// Base delay for exponential retry backoff
    pub retry_delay: Duration,
    /// Upper bound on a single backoff delay
    pub max_retry_delay: Duration,
    /// Spread retry delays by +/-10% (deterministic per job)
    pub retry_jitter: bool,

    /// Lease age after which a PROCESSING job is presumed abandoned
    pub stale_job_timeout: Duration,
    pub stale_sweep_interval: Duration,

    pub health_check_interval: Duration,
    /// Heartbeat silence that counts as one missed check
    pub health_check_timeout: Duration,
    /// Consecutive missed checks before a worker is declared failed
    pub failure_threshold: u32,
    /// Consecutive heartbeats needed to leave failed, then recovering
    pub recovery_threshold: u32,
    /// Minimum dwell time in the failed state
    pub failover_delay: Duration,
    pub recovery_check_interval: Duration,

    /// Sleep after a background iteration fails
    pub loop_error_backoff: Duration,
    /// Bounded wait for background loops on shutdown
    pub shutdown_grace: Duration,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            max_jobs_per_worker: DEFAULT_MAX_JOBS_PER_WORKER,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            retry_jitter: true,
            stale_job_timeout: DEFAULT_STALE_JOB_TIMEOUT,
            stale_sweep_interval: DEFAULT_STALE_SWEEP_INTERVAL,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_threshold: DEFAULT_RECOVERY_THRESHOLD,
            failover_delay: DEFAULT_FAILOVER_DELAY,
            recovery_check_interval: DEFAULT_RECOVERY_CHECK_INTERVAL,
            loop_error_backoff: DEFAULT_LOOP_ERROR_BACKOFF,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl DistributionConfig {
    /// Load from `SCRIBE_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (environment, file, test map)
    ///
    /// Durations are given in whole seconds (`*_SECS` keys).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            max_jobs_per_worker: parse_or(
                &lookup,
                "SCRIBE_MAX_JOBS_PER_WORKER",
                defaults.max_jobs_per_worker,
            )?,
            max_retries: parse_or(&lookup, "SCRIBE_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: secs_or(&lookup, "SCRIBE_RETRY_DELAY_SECS", defaults.retry_delay)?,
            max_retry_delay: secs_or(
                &lookup,
                "SCRIBE_MAX_RETRY_DELAY_SECS",
                defaults.max_retry_delay,
            )?,
            retry_jitter: parse_or(&lookup, "SCRIBE_RETRY_JITTER", defaults.retry_jitter)?,
            stale_job_timeout: secs_or(
                &lookup,
                "SCRIBE_STALE_JOB_TIMEOUT_SECS",
                defaults.stale_job_timeout,
            )?,
            stale_sweep_interval: secs_or(
                &lookup,
                "SCRIBE_STALE_SWEEP_INTERVAL_SECS",
                defaults.stale_sweep_interval,
            )?,
            health_check_interval: secs_or(
                &lookup,
                "SCRIBE_HEALTH_CHECK_INTERVAL_SECS",
                defaults.health_check_interval,
            )?,
            health_check_timeout: secs_or(
                &lookup,
                "SCRIBE_HEALTH_CHECK_TIMEOUT_SECS",
                defaults.health_check_timeout,
            )?,
            failure_threshold: parse_or(
                &lookup,
                "SCRIBE_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            )?,
            recovery_threshold: parse_or(
                &lookup,
                "SCRIBE_RECOVERY_THRESHOLD",
                defaults.recovery_threshold,
            )?,
            failover_delay: secs_or(
                &lookup,
                "SCRIBE_FAILOVER_DELAY_SECS",
                defaults.failover_delay,
            )?,
            recovery_check_interval: secs_or(
                &lookup,
                "SCRIBE_RECOVERY_CHECK_INTERVAL_SECS",
                defaults.recovery_check_interval,
            )?,
            loop_error_backoff: defaults.loop_error_backoff,
            shutdown_grace: secs_or(
                &lookup,
                "SCRIBE_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the distributor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_jobs_per_worker == 0 {
            return Err(AppError::Config(
                "max_jobs_per_worker must be at least 1".to_string(),
            ));
        }
        if self.max_retries < 0 {
            return Err(AppError::Config("max_retries must not be negative".to_string()));
        }
        if self.failure_threshold == 0 || self.recovery_threshold == 0 {
            return Err(AppError::Config(
                "failure_threshold and recovery_threshold must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("stale_sweep_interval", self.stale_sweep_interval),
            ("health_check_interval", self.health_check_interval),
            ("recovery_check_interval", self.recovery_check_interval),
        ] {
            if value.is_zero() {
                return Err(AppError::Config(format!("{} must be non-zero", name)));
            }
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(AppError::Config(
                "max_retry_delay must be >= retry_delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Duration as epoch-ms delta
pub(crate) fn millis(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid value for {}: {:?}", key, raw))),
        None => Ok(default),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(lookup, key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
