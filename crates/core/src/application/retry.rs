// Retry policy for failed and abandoned leases
use crate::application::config::{millis, DistributionConfig};
use crate::domain::Job;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job (with backoff delay in ms)
    Retry(i64),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Exponential backoff retry policy
///
/// delay = retry_delay * 2^retry_count, capped at `max_delay_ms`, optionally
/// spread by +/-10% jitter so a burst of failures does not come back as a
/// burst of claims.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay_ms: i64,
    max_delay_ms: i64,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `base_delay_ms` - Delay before the first retry
    /// * `max_delay_ms` - Cap on any single delay
    /// * `jitter` - Apply deterministic per-job jitter
    pub fn new(base_delay_ms: i64, max_delay_ms: i64, jitter: bool) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter,
        }
    }

    pub fn from_config(config: &DistributionConfig) -> Self {
        Self::new(
            millis(config.retry_delay),
            millis(config.max_retry_delay),
            config.retry_jitter,
        )
    }

    /// Backoff for the next retry of `job`, based on retries already consumed
    pub fn backoff_delay_ms(&self, job: &Job) -> i64 {
        let exponent = job.retry_count.clamp(0, 62);
        let raw = (self.base_delay_ms as f64) * 2f64.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);

        let delayed = if self.jitter {
            // Use job.id as seed for deterministic jitter per job
            let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
            let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1
            capped * jitter_factor
        } else {
            capped
        };

        (delayed as i64).min(self.max_delay_ms)
    }

    /// Determine if a job should be retried
    ///
    /// Returns:
    /// - `RetryDecision::Retry(delay_ms)` while `retry_count < max_retries`
    /// - `RetryDecision::Failed` once retries are exhausted
    pub fn should_retry(&self, job: &Job) -> RetryDecision {
        if !job.can_retry() {
            return RetryDecision::Failed;
        }
        RetryDecision::Retry(self.backoff_delay_ms(job))
    }

    /// Apply the decision to `job`: requeue with backoff or fail permanently.
    pub fn apply(&self, job: &mut Job, now_millis: i64, error: Option<String>) -> RetryDecision {
        let decision = self.should_retry(job);
        match decision {
            RetryDecision::Retry(delay_ms) => {
                job.schedule_retry(now_millis, delay_ms, error);
            }
            RetryDecision::Failed => {
                job.fail_permanently(now_millis, error);
            }
        }
        decision
    }
}
