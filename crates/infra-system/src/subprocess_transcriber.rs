// Subprocess transcriber
// Runs a configured speech-to-text command per job with an allowlisted
// environment and a hard timeout.
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use scribe_core::domain::Job;
use scribe_core::port::{TimeProvider, Transcriber, Transcript, TranscriptionError};

/// Max stderr bytes kept in the failure message
const STDERR_TAIL_BYTES: usize = 512;

/// Subprocess settings
///
/// `args` may contain placeholders substituted per job:
/// `{file}` (absolute media path), `{job_id}`, `{language}`, `{model}`,
/// `{vocabulary}` (comma separated).
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub command: String,
    pub args: Vec<String>,
    pub media_dir: PathBuf,
    pub timeout: Duration,
    /// Environment variables passed through to the child
    pub env_allowlist: Vec<String>,
}

impl TranscriberConfig {
    pub fn new(command: impl Into<String>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: vec!["{file}".to_string()],
            media_dir: media_dir.into(),
            timeout: Duration::from_secs(30 * 60),
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string(), "LANG".to_string()],
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Structured output a command may print instead of plain text
#[derive(Debug, Deserialize)]
struct JsonTranscript {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

pub struct SubprocessTranscriber {
    config: TranscriberConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl SubprocessTranscriber {
    pub fn new(config: TranscriberConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
        }
    }

    /// Resolve the job's media file inside the media directory.
    /// Names that would escape the directory are rejected.
    fn media_path(&self, job: &Job) -> Result<PathBuf, TranscriptionError> {
        let relative = Path::new(&job.file_name);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(TranscriptionError::MediaUnavailable(format!(
                "file name escapes media directory: {}",
                job.file_name
            )));
        }
        Ok(self.config.media_dir.join(relative))
    }

    fn render_args(&self, job: &Job, media_path: &Path) -> Vec<String> {
        let file = media_path.to_string_lossy();
        let language = job.options.language.as_deref().unwrap_or("");
        let model = job.options.model.as_deref().unwrap_or("");
        let vocabulary = job.options.vocabulary.join(",");

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{file}", &file)
                    .replace("{job_id}", &job.id)
                    .replace("{language}", language)
                    .replace("{model}", model)
                    .replace("{vocabulary}", &vocabulary)
            })
            .collect()
    }

    fn filtered_env(&self) -> Vec<(String, String)> {
        self.config
            .env_allowlist
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.clone(), v)))
            .collect()
    }

    async fn spawn_and_wait(&self, args: &[String]) -> Result<std::process::Output, TranscriptionError> {
        let child = Command::new(&self.config.command)
            .args(args)
            .env_clear()
            .envs(self.filtered_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscriptionError::SpawnFailed(format!("{}: {}", self.config.command, e)))?;

        // On timeout the future is dropped, which kills the child
        match timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(TranscriptionError::IoError(e.to_string())),
            Err(_) => Err(TranscriptionError::Timeout(
                self.config.timeout.as_millis() as i64,
            )),
        }
    }

    fn parse_output(
        &self,
        job: &Job,
        output: std::process::Output,
        duration_ms: i64,
    ) -> Result<Transcript, TranscriptionError> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL_BYTES)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(TranscriptionError::Failed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                tail.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();

        let (text, language) = match serde_json::from_str::<JsonTranscript>(trimmed) {
            Ok(parsed) => (parsed.text, parsed.language.or_else(|| job.options.language.clone())),
            Err(_) => (trimmed.to_string(), job.options.language.clone()),
        };

        if text.trim().is_empty() {
            return Err(TranscriptionError::Failed("empty transcript".to_string()));
        }

        Ok(Transcript {
            text,
            language,
            duration_ms,
        })
    }
}

#[async_trait]
impl Transcriber for SubprocessTranscriber {
    async fn transcribe(&self, job: &Job) -> Result<Transcript, TranscriptionError> {
        let media_path = self.media_path(job)?;
        if tokio::fs::metadata(&media_path).await.is_err() {
            return Err(TranscriptionError::MediaUnavailable(
                media_path.to_string_lossy().into_owned(),
            ));
        }

        let args = self.render_args(job, &media_path);
        info!(
            job_id = %job.id,
            command = %self.config.command,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting transcription subprocess"
        );
        debug!(job_id = %job.id, args = ?args, "Transcription arguments");

        let start = self.time_provider.now_millis();
        let output = self.spawn_and_wait(&args).await?;
        let duration_ms = self.time_provider.now_millis() - start;

        info!(
            job_id = %job.id,
            duration_ms = duration_ms,
            exit_code = ?output.status.code(),
            "Transcription subprocess finished"
        );
        self.parse_output(job, output, duration_ms)
    }
}
