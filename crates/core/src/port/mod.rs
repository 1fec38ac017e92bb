// Port Layer - Interfaces for external collaborators

pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod time_provider;
pub mod transcriber;

// Re-exports
pub use id_provider::IdProvider;
pub use job_store::{ClaimCriteria, JobStore};
pub use time_provider::TimeProvider;
pub use transcriber::{Transcriber, Transcript, TranscriptionError};
