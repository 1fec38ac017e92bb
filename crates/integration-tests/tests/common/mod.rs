//! Shared fixtures: SQLite-backed coordinator on a manual clock

#![allow(dead_code)]

use scribe_core::application::{DispatchCoordinator, DistributionConfig, SubmitJobRequest};
use scribe_core::domain::{Job, Priority};
use scribe_core::port::id_provider::SequentialIdProvider;
use scribe_core::port::time_provider::mocks::MockTimeProvider;
use scribe_infra_sqlite::{create_pool, create_pool_with, run_migrations, SqliteJobStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub coordinator: Arc<DispatchCoordinator>,
    pub clock: Arc<MockTimeProvider>,
    pub store: Arc<SqliteJobStore>,
}

/// Small, deterministic timings
pub fn test_config() -> DistributionConfig {
    DistributionConfig {
        max_jobs_per_worker: 2,
        max_retries: 3,
        retry_delay: Duration::from_secs(1),
        retry_jitter: false,
        stale_job_timeout: Duration::from_secs(60),
        health_check_interval: Duration::from_secs(10),
        health_check_timeout: Duration::from_secs(30),
        failure_threshold: 3,
        recovery_threshold: 3,
        failover_delay: Duration::from_secs(60),
        ..Default::default()
    }
}

async fn build(store: SqliteJobStore, config: &DistributionConfig) -> Harness {
    let store = Arc::new(store);
    let clock = Arc::new(MockTimeProvider::new(START_MILLIS));
    let coordinator = Arc::new(DispatchCoordinator::new(
        store.clone(),
        clock.clone(),
        Arc::new(SequentialIdProvider::new("job")),
        config,
    ));
    Harness {
        coordinator,
        clock,
        store,
    }
}

/// In-memory database (single connection so every query sees the same data)
pub async fn memory_harness(config: &DistributionConfig) -> Harness {
    let pool = create_pool_with("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    build(SqliteJobStore::new(pool), config).await
}

/// File database with a real connection pool, for concurrency tests
pub async fn file_harness(config: &DistributionConfig) -> (Harness, TempDb) {
    let db = TempDb::new();
    let pool = create_pool(db.path.to_string_lossy().as_ref()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (build(SqliteJobStore::new(pool), config).await, db)
}

pub struct TempDb {
    pub path: PathBuf,
}

impl TempDb {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("scribe-it-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

pub fn request(file_name: &str, priority: Priority) -> SubmitJobRequest {
    SubmitJobRequest {
        owner_id: "owner-1".to_string(),
        file_name: file_name.to_string(),
        file_size: 1024,
        priority,
        max_retries: None,
        options: Default::default(),
    }
}

pub async fn submit(h: &Harness, file_name: &str, priority: Priority) -> Job {
    let job = h
        .coordinator
        .submit_job(request(file_name, priority))
        .await
        .unwrap();
    // Distinct created_at per job keeps FIFO order observable
    h.clock.advance_millis(1);
    job
}
