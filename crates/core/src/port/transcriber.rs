// Transcriber Port
// Speech-to-text execution is an external collaborator: the worker hands it a
// claimed job and gets back a transcript or an error.

use crate::domain::Job;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a successful transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
    pub duration_ms: i64,
}

/// Transcription errors
#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Transcription timeout after {0}ms")]
    Timeout(i64),

    #[error("Transcription failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Transcriber trait
///
/// Implementations:
/// - SubprocessTranscriber (infra-system): runs a speech-to-text command
/// - MockTranscriber: scripted outcomes for tests
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the media referenced by `job`
    async fn transcribe(&self, job: &Job) -> Result<Transcript, TranscriptionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockOutcome {
        Success,
        Fail,
        Panic,
    }

    pub struct MockTranscriber {
        outcome: MockOutcome,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockTranscriber {
        pub fn new(outcome: MockOutcome) -> Self {
            Self {
                outcome,
                delay: Duration::from_millis(0),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockOutcome::Success)
        }

        pub fn new_failing() -> Self {
            Self::new(MockOutcome::Fail)
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcriber for MockTranscriber {
        async fn transcribe(&self, job: &Job) -> Result<Transcript, TranscriptionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.outcome {
                MockOutcome::Success => Ok(Transcript {
                    text: format!("transcript of {}", job.file_name),
                    language: job.options.language.clone(),
                    duration_ms: self.delay.as_millis() as i64,
                }),
                MockOutcome::Fail => Err(TranscriptionError::Failed(format!(
                    "mock failure for {}",
                    job.id
                ))),
                MockOutcome::Panic => panic!("mock transcriber panic for {}", job.id),
            }
        }
    }
}
