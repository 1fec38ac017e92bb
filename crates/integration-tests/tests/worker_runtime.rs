//! In-process worker driving a real subprocess transcriber against SQLite

#![cfg(unix)]

use scribe_core::application::{
    shutdown_channel, DispatchCoordinator, DistributionConfig, SubmitJobRequest,
    TranscriptionWorker,
};
use scribe_core::domain::{Job, JobStatus, Priority};
use scribe_core::port::id_provider::UuidProvider;
use scribe_core::port::time_provider::SystemTimeProvider;
use scribe_core::port::TimeProvider;
use scribe_infra_sqlite::{create_pool_with, run_migrations, SqliteJobStore};
use scribe_infra_system::{SubprocessTranscriber, TranscriberConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn media_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("scribe-it-media-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("meeting.txt"), "good morning everyone\n").unwrap();
    dir
}

async fn coordinator() -> Arc<DispatchCoordinator> {
    let pool = create_pool_with("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let config = DistributionConfig {
        retry_delay: Duration::from_secs(60),
        retry_jitter: false,
        ..Default::default()
    };
    Arc::new(DispatchCoordinator::new(
        Arc::new(SqliteJobStore::new(pool)),
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
        &config,
    ))
}

async fn submit(coordinator: &DispatchCoordinator, file_name: &str) -> Job {
    coordinator
        .submit_job(SubmitJobRequest {
            owner_id: "owner-1".to_string(),
            file_name: file_name.to_string(),
            file_size: 22,
            priority: Priority::Normal,
            max_retries: None,
            options: Default::default(),
        })
        .await
        .unwrap()
}

/// Poll until `done` holds for the job or the deadline passes
async fn wait_for(coordinator: &DispatchCoordinator, job_id: &str, done: impl Fn(&Job) -> bool) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let job = coordinator.get_job(job_id).await.unwrap();
            if done(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not reach the expected state in time")
}

fn transcriber(command: &str, args: &[&str], media: PathBuf) -> Arc<SubprocessTranscriber> {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    Arc::new(SubprocessTranscriber::new(
        TranscriberConfig::new(command, media)
            .with_args(args.iter().map(|a| a.to_string()).collect())
            .with_timeout(Duration::from_secs(5)),
        time_provider,
    ))
}

#[tokio::test]
async fn test_worker_completes_job_and_unregisters() {
    let coordinator = coordinator().await;
    let job = submit(&coordinator, "meeting.txt").await;

    let worker = TranscriptionWorker::new(
        "local-1",
        coordinator.clone(),
        transcriber("cat", &["{file}"], media_dir()),
    )
    .with_idle_sleep(Duration::from_millis(10));

    let (tx, token) = shutdown_channel();
    let handle = tokio::spawn(async move { worker.run(token).await });

    let done = wait_for(&coordinator, &job.id, |j| j.status == JobStatus::Completed).await;
    assert!(done.locked_by.is_none());
    assert!(done.completed_at.is_some());

    tx.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(coordinator.get_worker_health("local-1").await.is_err());
}

#[tokio::test]
async fn test_worker_reports_failure_for_retry() {
    let coordinator = coordinator().await;
    let job = submit(&coordinator, "meeting.txt").await;

    let worker = TranscriptionWorker::new(
        "local-2",
        coordinator.clone(),
        transcriber("sh", &["-c", "echo no model loaded >&2; exit 2"], media_dir()),
    )
    .with_idle_sleep(Duration::from_millis(10));

    let (tx, token) = shutdown_channel();
    let handle = tokio::spawn(async move { worker.run(token).await });

    let retried = wait_for(&coordinator, &job.id, |j| j.retry_count == 1).await;
    assert_eq!(retried.status, JobStatus::Pending);
    assert!(retried
        .error
        .as_deref()
        .is_some_and(|e| e.contains("no model loaded")));
    assert!(retried.next_retry_at.is_some());

    tx.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_missing_media_is_reported_as_failure() {
    let coordinator = coordinator().await;
    let job = submit(&coordinator, "not-uploaded.wav").await;

    let worker = TranscriptionWorker::new(
        "local-3",
        coordinator.clone(),
        transcriber("cat", &["{file}"], media_dir()),
    )
    .with_idle_sleep(Duration::from_millis(10));

    let (tx, token) = shutdown_channel();
    let handle = tokio::spawn(async move { worker.run(token).await });

    let retried = wait_for(&coordinator, &job.id, |j| j.retry_count == 1).await;
    assert!(retried
        .error
        .as_deref()
        .is_some_and(|e| e.contains("Media unavailable")));

    tx.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
}
