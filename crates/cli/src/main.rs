//! Scribe CLI - operator commands against a running dispatch daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9640";

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Scribe Dispatch CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "SCRIBE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Urgent,
}

impl PriorityArg {
    fn as_str(&self) -> &'static str {
        match self {
            PriorityArg::Low => "low",
            PriorityArg::Normal => "normal",
            PriorityArg::High => "high",
            PriorityArg::Urgent => "urgent",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show cluster health and per-worker state
    Health,

    /// Show one worker's health
    Worker {
        worker_id: String,
    },

    /// Unregister a worker and hand its jobs back to the pool
    Drain {
        worker_id: String,
    },

    /// Submit a transcription job for a stored media file
    Submit {
        /// File name relative to the media directory
        file_name: String,

        #[arg(short, long, default_value = "cli")]
        owner: String,

        /// File size in bytes
        #[arg(short, long, default_value = "0")]
        size: i64,

        #[arg(short, long, value_enum, default_value = "normal")]
        priority: PriorityArg,

        /// Override the daemon's default retry budget
        #[arg(long)]
        max_retries: Option<i32>,

        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        model: Option<String>,
    },

    /// Show a job
    Job {
        job_id: String,
    },

    /// Cancel a pending or processing job
    Cancel {
        job_id: String,
    },

    /// Job counts per status
    Jobs,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
struct WorkerRow {
    worker_id: String,
    status: String,
    failure_count: u32,
    recovery_count: u32,
    #[tabled(display_with = "display_held")]
    held_jobs: Vec<String>,
    #[tabled(display_with = "display_percent")]
    load_percent: f64,
}

fn display_held(jobs: &[String]) -> String {
    jobs.len().to_string()
}

fn display_percent(load: &f64) -> String {
    format!("{:.0}%", load)
}

#[derive(Deserialize, Tabled)]
struct JobRow {
    id: String,
    file_name: String,
    status: String,
    priority: String,
    retry_count: i32,
    max_retries: i32,
    #[tabled(display_with = "display_opt")]
    locked_by: Option<String>,
    #[tabled(display_with = "display_opt")]
    error: Option<String>,
}

fn display_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn colored_status(status: &str) -> String {
    match status {
        "healthy" | "COMPLETED" => status.green().to_string(),
        "recovering" | "PENDING" | "PROCESSING" => status.yellow().to_string(),
        "failed" | "degraded" | "FAILED" => status.red().to_string(),
        other => other.to_string(),
    }
}

fn print_job(job: Value) -> Result<()> {
    let row: JobRow = serde_json::from_value(job).context("Unexpected job payload")?;
    println!("{}", Table::new(vec![row]));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health => {
            let report =
                call_rpc(&cli.rpc_url, "system.health.v1", json!({ "detailed": true })).await?;
            let status = report["status"].as_str().unwrap_or("unknown");

            println!("{} {}", "System:".cyan().bold(), colored_status(status));
            println!(
                "  {} {}  {} {}  {} {}  {} {}",
                "total".bold(),
                report["total_workers"],
                "healthy".bold(),
                report["healthy_workers"],
                "recovering".bold(),
                report["recovering_workers"],
                "failed".bold(),
                report["failed_workers"],
            );
            println!(
                "  {} {}",
                "failures since start:".bold(),
                report["failed_workers_total"]
            );
            println!();

            let workers: Vec<WorkerRow> =
                serde_json::from_value(report["workers"].clone()).unwrap_or_default();
            if workers.is_empty() {
                println!("{}", "No workers registered".yellow());
            } else {
                println!("{}", Table::new(workers));
            }
        }

        Commands::Worker { worker_id } => {
            let health =
                call_rpc(&cli.rpc_url, "worker.health.v1", json!({ "worker_id": worker_id }))
                    .await?;
            let status = health["status"].as_str().unwrap_or("unknown");
            println!("{} {}", worker_id.bold(), colored_status(status));
            println!("  {} {}", "failure_count:".bold(), health["failure_count"]);
            println!("  {} {}", "recovery_count:".bold(), health["recovery_count"]);
            println!("  {} {}", "last_heartbeat:".bold(), health["last_heartbeat"]);
        }

        Commands::Drain { worker_id } => {
            let result =
                call_rpc(&cli.rpc_url, "worker.unregister.v1", json!({ "worker_id": worker_id }))
                    .await?;
            println!(
                "{}",
                format!(
                    "✓ Worker {} unregistered, {} job(s) returned to the pool",
                    worker_id, result["released_jobs"]
                )
                .green()
                .bold()
            );
        }

        Commands::Submit {
            file_name,
            owner,
            size,
            priority,
            max_retries,
            language,
            model,
        } => {
            let params = json!({
                "owner_id": owner,
                "file_name": file_name,
                "file_size": size,
                "priority": priority.as_str(),
                "max_retries": max_retries,
                "options": {
                    "language": language,
                    "model": model,
                },
            });

            let job = call_rpc(&cli.rpc_url, "job.submit.v1", params).await?;
            println!("{}", "✓ Job submitted".green().bold());
            println!();
            print_job(job)?;
        }

        Commands::Job { job_id } => {
            let job = call_rpc(&cli.rpc_url, "job.get.v1", json!({ "job_id": job_id })).await?;
            let status = job["status"].as_str().unwrap_or("unknown").to_string();
            println!("{} {}", job_id.bold(), colored_status(&status));
            print_job(job)?;
        }

        Commands::Cancel { job_id } => {
            call_rpc(&cli.rpc_url, "job.cancel.v1", json!({ "job_id": job_id })).await?;
            println!("{}", format!("✓ Job {} cancelled", job_id).green().bold());
        }

        Commands::Jobs => {
            let counts = call_rpc(&cli.rpc_url, "system.jobs.v1", json!({})).await?;
            println!("{}", "Jobs".cyan().bold());
            for key in ["pending", "processing", "completed", "failed", "cancelled"] {
                println!("  {:<11} {}", format!("{}:", key).bold(), counts[key]);
            }
            println!("  {} {} seconds", "Uptime:".bold(), counts["uptime_seconds"]);
        }
    }

    Ok(())
}
