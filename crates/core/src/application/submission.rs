// Job submission use case
// Called by the upload flow once media is stored; creates a PENDING job.

use crate::domain::{DomainError, Job, JobOptions, Priority};
use crate::error::Result;
use crate::port::{IdProvider, JobStore, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::info;

const MAX_FILE_NAME_LEN: usize = 512;

/// Submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub owner_id: String,
    pub file_name: String,
    pub file_size: i64,

    #[serde(default)]
    pub priority: Priority,

    /// Overrides the configured default when set
    #[serde(default)]
    pub max_retries: Option<i32>,

    #[serde(default)]
    pub options: JobOptions,
}

/// Validate request fields before touching the store
pub fn validate_request(req: &SubmitJobRequest) -> std::result::Result<(), DomainError> {
    if req.owner_id.trim().is_empty() {
        return Err(DomainError::ValidationError(
            "owner_id cannot be empty".to_string(),
        ));
    }
    if req.file_name.trim().is_empty() {
        return Err(DomainError::ValidationError(
            "file_name cannot be empty".to_string(),
        ));
    }
    if req.file_name.len() > MAX_FILE_NAME_LEN {
        return Err(DomainError::ValidationError(format!(
            "file_name too long (max {} bytes)",
            MAX_FILE_NAME_LEN
        )));
    }
    if req.file_size < 0 {
        return Err(DomainError::ValidationError(
            "file_size cannot be negative".to_string(),
        ));
    }
    if let Some(max_retries) = req.max_retries {
        if max_retries < 0 {
            return Err(DomainError::ValidationError(
                "max_retries cannot be negative".to_string(),
            ));
        }
    }
    Ok(())
}

/// Execute the submission use case
///
/// # Arguments
///
/// * `store` - Job store
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `default_max_retries` - Used when the request does not override it
/// * `req` - Submission request
pub async fn execute(
    store: &dyn JobStore,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    default_max_retries: i32,
    req: SubmitJobRequest,
) -> Result<Job> {
    validate_request(&req)?;

    let mut job = Job::new(
        id_provider.generate_id(),
        req.owner_id,
        req.file_name,
        req.file_size,
        time_provider.now_millis(),
    )
    .with_priority(req.priority)
    .with_max_retries(req.max_retries.unwrap_or(default_max_retries));
    job.options = req.options;

    store.insert_job(&job).await?;

    info!(
        job_id = %job.id,
        owner_id = %job.owner_id,
        priority = %job.priority,
        "Job submitted"
    );
    Ok(job)
}
