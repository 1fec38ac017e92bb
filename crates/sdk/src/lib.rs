//! Scribe SDK - Rust client for the dispatch daemon
//!
//! # Example
//!
//! ```no_run
//! use scribe_sdk::{Priority, ScribeClient, SubmitRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ScribeClient::connect("http://127.0.0.1:9640")?;
//!
//!     let job = client
//!         .submit_job(SubmitRequest {
//!             owner_id: "user-42".to_string(),
//!             file_name: "interview.wav".to_string(),
//!             file_size: 48_000_000,
//!             priority: Priority::High,
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     println!("Job submitted: {}", job.id);
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::ScribeClient;
pub use error::{code, Result, SdkError};
pub use types::{
    CompletionStatus, HealthStatus, HeartbeatResponse, Job, JobOptions, JobStatus, Priority,
    RegisterResponse, SubmitRequest, SystemHealth, UnregisterResponse, WorkerHealth,
};
