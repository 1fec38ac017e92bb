//! Remote worker example
//!
//! Registers with a running daemon, heartbeats, and processes jobs with a
//! fake transcription step until Ctrl+C.
//!
//! ```bash
//! cargo run --package scribe-daemon
//! cargo run --package scribe-sdk --example simple
//! ```

use scribe_sdk::{CompletionStatus, ScribeClient};
use std::sync::Arc;
use std::time::Duration;

const WORKER_ID: &str = "example-worker";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Arc::new(ScribeClient::connect("http://127.0.0.1:9640")?);

    let registered = client.register_worker(WORKER_ID).await?;
    println!("Registered {} ({:?})", registered.worker_id, registered.status);

    // Heartbeats run on their own timer so a long job never looks like silence
    let hb_client = client.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            match hb_client.heartbeat(WORKER_ID).await {
                Ok(resp) => println!("heartbeat: {:?}", resp.status),
                Err(e) if e.is_not_found() => {
                    let _ = hb_client.register_worker(WORKER_ID).await;
                }
                Err(e) => eprintln!("heartbeat failed: {}", e),
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            claimed = client.claim_job(WORKER_ID) => match claimed {
                Ok(Some(job)) => {
                    println!("Processing {} ({})", job.id, job.file_name);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    client
                        .complete_job(&job.id, WORKER_ID, CompletionStatus::Completed, None)
                        .await?;
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                Err(e) => {
                    eprintln!("claim failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    heartbeat.abort();
    let released = client.unregister_worker(WORKER_ID).await?;
    println!("Unregistered, {} job(s) returned to the pool", released);
    Ok(())
}
