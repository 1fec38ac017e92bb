// Application Layer - Use Cases and Business Logic

pub mod background;
pub mod config;
pub mod coordinator;
pub mod distributor;
pub mod guard;
pub mod health;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod submission;
pub mod worker;

// Re-exports
pub use background::BackgroundTasks;
pub use config::DistributionConfig;
pub use coordinator::DispatchCoordinator;
pub use distributor::{CompletionStatus, JobCounts, JobDistributor, ReleaseOutcome};
pub use guard::{with_retry, GuardPolicy};
pub use health::{HealthReport, SystemHealthAggregator, WorkerReport};
pub use monitor::FaultToleranceMonitor;
pub use registry::{WorkerLoad, WorkerRegistry};
pub use submission::SubmitJobRequest;
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, TranscriptionWorker};
