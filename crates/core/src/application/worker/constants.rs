// Worker constants
use std::time::Duration;

/// Sleep when no job is available or the worker is at capacity
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(500);

/// Sleep after a loop error before polling again
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Heartbeat period; well under the default health check timeout (30s)
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Error text recorded when the transcription task panics
pub const PANIC_ERROR_MESSAGE: &str = "transcription task panicked";
