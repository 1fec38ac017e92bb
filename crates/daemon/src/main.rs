//! Scribe Dispatch daemon
//!
//! Wires the SQLite job store, the dispatch coordinator, its background
//! loops, the JSON-RPC server and optional in-process workers, then runs
//! until Ctrl+C.

mod config;
mod telemetry;

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::DaemonConfig;
use scribe_api_rpc::{RpcServer, RpcServerConfig};
use scribe_core::application::{
    shutdown_channel, BackgroundTasks, DispatchCoordinator, DistributionConfig,
    TranscriptionWorker,
};
use scribe_core::port::id_provider::UuidProvider;
use scribe_core::port::time_provider::SystemTimeProvider;
use scribe_core::port::{TimeProvider, Transcriber};
use scribe_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use scribe_infra_system::{SubprocessTranscriber, TranscriberConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging: SCRIBE_LOG_FORMAT=json for production, pretty otherwise
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("scribe=info"))?;

    let json = std::env::var("SCRIBE_LOG_FORMAT").is_ok_and(|f| f == "json");
    let (json_layer, pretty_layer) = if json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer().pretty()))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(telemetry::layer()?)
        .init();
    telemetry::report_status();

    info!("Scribe Dispatch v{} starting...", VERSION);

    // 2. Configuration (invalid values abort startup)
    let dist_config = DistributionConfig::from_env()?;
    dist_config.validate()?;
    let daemon_config = DaemonConfig::from_env()?;

    info!(
        db_path = %daemon_config.db_path,
        max_jobs_per_worker = dist_config.max_jobs_per_worker,
        max_retries = dist_config.max_retries,
        failure_threshold = dist_config.failure_threshold,
        "Configuration loaded"
    );

    // 3. Database
    if let Some(parent) = std::path::Path::new(&daemon_config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let pool = create_pool(&daemon_config.db_path).await?;
    run_migrations(&pool).await?;

    // 4. Wiring
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(SqliteJobStore::new(pool.clone()));
    let coordinator = Arc::new(DispatchCoordinator::new(
        store,
        time_provider.clone(),
        Arc::new(UuidProvider),
        &dist_config,
    ));

    // Leases left behind by a previous run are picked up by the first sweep
    // once they pass the stale timeout; the registry starts empty.
    let background = BackgroundTasks::start(coordinator.clone(), &dist_config);

    // 5. JSON-RPC server
    let rpc_config = RpcServerConfig {
        host: daemon_config.rpc_host.clone(),
        port: daemon_config.rpc_port,
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, coordinator.clone())
        .start()
        .await?;

    // 6. Optional in-process workers
    let (worker_shutdown, worker_token) = shutdown_channel();
    let mut worker_handles = Vec::with_capacity(daemon_config.local_workers);
    if daemon_config.local_workers > 0 {
        let transcriber: Arc<dyn Transcriber> = Arc::new(SubprocessTranscriber::new(
            TranscriberConfig::new(&daemon_config.transcribe_cmd, &daemon_config.media_dir)
                .with_args(daemon_config.transcribe_args.clone())
                .with_timeout(daemon_config.transcribe_timeout),
            time_provider.clone(),
        ));

        for i in 0..daemon_config.local_workers {
            let worker_id = format!("local-{}-{}", std::process::id(), i);
            let worker =
                TranscriptionWorker::new(worker_id.clone(), coordinator.clone(), transcriber.clone());
            let token = worker_token.clone();
            worker_handles.push(tokio::spawn(async move {
                if let Err(e) = worker.run(token).await {
                    error!(worker_id = %worker_id, error = %e, "Local worker stopped with error");
                }
            }));
        }
        info!(count = daemon_config.local_workers, "Local workers started");
    }

    info!(rpc_addr = %rpc_addr, "System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: workers drain first so their reports still land
    worker_shutdown.shutdown();
    let grace = dist_config.shutdown_grace;
    for handle in worker_handles {
        if tokio::time::timeout(grace, handle).await.is_err() {
            error!("Local worker did not stop within the shutdown grace");
        }
    }

    background.stop().await;

    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server stop failed");
    }
    rpc_handle.stopped().await;

    pool.close().await;
    telemetry::shutdown();
    info!("Shutdown complete.");

    Ok(())
}
