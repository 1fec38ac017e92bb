//! Daemon settings: everything the composition root needs beyond
//! `DistributionConfig`.

use anyhow::{Context, Result};
use scribe_api_rpc::server::{DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "~/.scribe/dispatch.db";
const DEFAULT_MEDIA_DIR: &str = "~/.scribe/media";
const DEFAULT_TRANSCRIBE_CMD: &str = "whisper-cli";
const DEFAULT_TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// In-process transcription workers; 0 means remote workers only
    pub local_workers: usize,
    pub media_dir: PathBuf,
    pub transcribe_cmd: String,
    /// Whitespace separated, placeholders allowed (see `TranscriberConfig`)
    pub transcribe_args: Vec<String>,
    pub transcribe_timeout: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("SCRIBE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let media_dir =
            lookup("SCRIBE_MEDIA_DIR").unwrap_or_else(|| DEFAULT_MEDIA_DIR.to_string());

        let rpc_port = match lookup("SCRIBE_RPC_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("SCRIBE_RPC_PORT: invalid port '{}'", raw))?,
            None => DEFAULT_RPC_PORT,
        };
        let local_workers = match lookup("SCRIBE_LOCAL_WORKERS") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("SCRIBE_LOCAL_WORKERS: invalid count '{}'", raw))?,
            None => 0,
        };
        let transcribe_timeout = match lookup("SCRIBE_TRANSCRIBE_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.trim().parse().with_context(|| {
                format!("SCRIBE_TRANSCRIBE_TIMEOUT_SECS: invalid seconds '{}'", raw)
            })?),
            None => DEFAULT_TRANSCRIBE_TIMEOUT,
        };
        let transcribe_args = lookup("SCRIBE_TRANSCRIBE_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec!["{file}".to_string()]);

        Ok(Self {
            db_path: shellexpand::tilde(&db_path).into_owned(),
            rpc_host: lookup("SCRIBE_RPC_HOST").unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port,
            local_workers,
            media_dir: PathBuf::from(shellexpand::tilde(&media_dir).into_owned()),
            transcribe_cmd: lookup("SCRIBE_TRANSCRIBE_CMD")
                .unwrap_or_else(|| DEFAULT_TRANSCRIBE_CMD.to_string()),
            transcribe_args,
            transcribe_timeout,
        })
    }
}
