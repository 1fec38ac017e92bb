// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod worker;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobOptions, JobStatus, Priority};
pub use worker::{HealthStatus, SystemHealth, SystemStatus, WorkerHealth, WorkerId};
