// SQLite JobStore Implementation

use async_trait::async_trait;
use scribe_core::domain::{Job, JobId, JobOptions, JobStatus, Priority};
use scribe_core::error::{AppError, Result};
use scribe_core::port::{ClaimCriteria, JobStore};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

// Helper to convert sqlx::Error to AppError.
// Busy/locked databases and pool exhaustion are transient (StoreUnavailable).
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            match db_err.code().as_deref() {
                // SQLite result codes: https://www.sqlite.org/rescode.html
                // SQLITE_BUSY, SQLITE_LOCKED and their extended variants
                Some("5") | Some("6") | Some("261") | Some("517") | Some("262") => {
                    AppError::StoreUnavailable(format!("Database busy: {}", message))
                }
                Some("2067") | Some("1555") => {
                    AppError::Conflict(format!("Unique constraint violation: {}", message))
                }
                Some("275") => {
                    AppError::Store(format!("Check constraint violation: {}", message))
                }
                Some("13") => AppError::Store(format!("Database full: {}", message)),
                Some(code) => AppError::Store(format!("Database error [{}]: {}", code, message)),
                None => AppError::Store(format!("Database error: {}", message)),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            AppError::StoreUnavailable(err.to_string())
        }
        sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => AppError::Store(format!("Column not found: {}", col)),
        _ => AppError::Store(err.to_string()),
    }
}

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let options = serde_json::to_string(&job.options)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, owner_id, file_name, file_size,
                status, priority, retry_count, max_retries,
                created_at, updated_at, locked_by, locked_at,
                next_retry_at, completed_at, error, options, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner_id)
        .bind(&job.file_name)
        .bind(job.file_size)
        .bind(job.status.to_string())
        .bind(job.priority.as_i32())
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(job.next_retry_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(options)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn find_and_lock_next_job(&self, criteria: &ClaimCriteria) -> Result<Option<Job>> {
        // Single statement: the inner SELECT and the UPDATE run under one write
        // lock, and the status guard makes a lost race a no-op.
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING', locked_by = ?, locked_at = ?, updated_at = ?,
                version = version + 1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                  AND (next_retry_at IS NULL OR next_retry_at <= ?)
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            )
              AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(&criteria.worker_id)
        .bind(criteria.now_millis)
        .bind(criteria.now_millis)
        .bind(criteria.now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update_job(&self, job: &Job) -> Result<bool> {
        let options = serde_json::to_string(&job.options)?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, priority = ?, retry_count = ?, max_retries = ?,
                updated_at = ?, locked_by = ?, locked_at = ?,
                next_retry_at = ?, completed_at = ?, error = ?, options = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(job.status.to_string())
        .bind(job.priority.as_i32())
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(job.updated_at)
        .bind(&job.locked_by)
        .bind(job.locked_at)
        .bind(job.next_retry_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(options)
        .bind(&job.id)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish a concurrent write from a missing job
        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM jobs WHERE id = ?")
            .bind(&job.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match current {
            None => Err(AppError::NotFound(format!("Job {} not found", job.id))),
            Some(current) => {
                debug!(
                    job_id = %job.id,
                    read_version = job.version,
                    current_version = current,
                    "Conditional update skipped, job changed since read"
                );
                Ok(false)
            }
        }
    }

    async fn find_stale_processing_jobs(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'PROCESSING' AND locked_at < ?
            ORDER BY locked_at ASC
            "#,
        )
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_processing_by_worker(&self, worker_id: &str) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = 'PROCESSING' AND locked_by = ?
            ORDER BY locked_at ASC
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    owner_id: String,
    file_name: String,
    file_size: i64,
    status: String,
    priority: i32,
    retry_count: i32,
    max_retries: i32,
    created_at: i64,
    updated_at: i64,
    locked_by: Option<String>,
    locked_at: Option<i64>,
    next_retry_at: Option<i64>,
    completed_at: Option<i64>,
    error: Option<String>,
    options: String,
    version: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let status = JobStatus::from_str(&self.status)
            .map_err(|e| AppError::Store(format!("Job {}: {}", self.id, e)))?;
        let priority = Priority::try_from(self.priority)
            .map_err(|e| AppError::Store(format!("Job {}: {}", self.id, e)))?;
        let options: JobOptions = serde_json::from_str(&self.options)?;

        Ok(Job {
            id: self.id,
            owner_id: self.owner_id,
            file_name: self.file_name,
            file_size: self.file_size,
            status,
            priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            created_at: self.created_at,
            updated_at: self.updated_at,
            locked_by: self.locked_by,
            locked_at: self.locked_at,
            next_retry_at: self.next_retry_at,
            completed_at: self.completed_at,
            error: self.error,
            options,
            version: self.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool_with, run_migrations};

    async fn setup_store() -> SqliteJobStore {
        let pool = create_pool_with("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    fn criteria(worker_id: &str, now_millis: i64) -> ClaimCriteria {
        ClaimCriteria {
            worker_id: worker_id.to_string(),
            now_millis,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = setup_store().await;
        let mut job = Job::new("job-1", "owner", "talk.mp4", 2048, 1000).with_priority(Priority::High);
        job.options.language = Some("de".to_string());
        job.options.vocabulary = vec!["Kubernetes".to_string()];

        store.insert_job(&job).await.unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(store.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let store = setup_store().await;
        let job = Job::new("job-1", "owner", "a.wav", 1, 1000);
        store.insert_job(&job).await.unwrap();
        assert!(matches!(
            store.insert_job(&job).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_order_and_lease() {
        let store = setup_store().await;
        store
            .insert_job(&Job::new("a", "o", "a.wav", 1, 1).with_priority(Priority::Low))
            .await
            .unwrap();
        store
            .insert_job(&Job::new("b", "o", "b.wav", 1, 2).with_priority(Priority::High))
            .await
            .unwrap();
        store
            .insert_job(&Job::new("c", "o", "c.wav", 1, 3).with_priority(Priority::Normal))
            .await
            .unwrap();

        let mut order = vec![];
        while let Some(job) = store.find_and_lock_next_job(&criteria("w1", 10)).await.unwrap() {
            assert_eq!(job.status, JobStatus::Processing);
            assert_eq!(job.locked_by.as_deref(), Some("w1"));
            assert_eq!(job.locked_at, Some(10));
            order.push(job.id);
        }
        assert_eq!(order, vec!["b", "c", "a"]);
        assert_eq!(store.count_by_status(JobStatus::Processing).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_claim_skips_jobs_in_backoff() {
        let store = setup_store().await;
        let mut job = Job::new("a", "o", "a.wav", 1, 1).with_priority(Priority::Urgent);
        job.next_retry_at = Some(5_000);
        store.insert_job(&job).await.unwrap();
        store
            .insert_job(&Job::new("b", "o", "b.wav", 1, 2).with_priority(Priority::Low))
            .await
            .unwrap();

        let first = store.find_and_lock_next_job(&criteria("w1", 4_999)).await.unwrap();
        assert_eq!(first.unwrap().id, "b");
        assert!(store
            .find_and_lock_next_job(&criteria("w1", 4_999))
            .await
            .unwrap()
            .is_none());

        let retried = store.find_and_lock_next_job(&criteria("w1", 5_000)).await.unwrap();
        assert_eq!(retried.unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_update_job_is_conditional() {
        let store = setup_store().await;
        store
            .insert_job(&Job::new("a", "o", "a.wav", 1, 1))
            .await
            .unwrap();
        let mut leased = store
            .find_and_lock_next_job(&criteria("w1", 10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.version, 1);

        leased.schedule_retry(20, 1_000, Some("boom".to_string()));
        assert!(store.update_job(&leased).await.unwrap());
        // Already written once from this read: second write is a no-op
        assert!(!store.update_job(&leased).await.unwrap());

        let stored = store.find_by_id(&"a".to_string()).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, Some(1_020));
        assert_eq!(stored.version, 2);
        assert!(stored.locked_by.is_none());

        let ghost = Job::new("ghost", "o", "g.wav", 1, 1);
        assert!(matches!(
            store.update_job(&ghost).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_release_from_old_read_spares_new_lease() {
        let store = setup_store().await;
        store
            .insert_job(&Job::new("a", "o", "a.wav", 1, 1))
            .await
            .unwrap();
        store.find_and_lock_next_job(&criteria("w1", 10)).await.unwrap();

        // Sweep reads the lease, then the holder reports and re-claims
        let swept = store.find_stale_processing_jobs(100).await.unwrap().remove(0);
        let mut reported = swept.clone();
        reported.schedule_retry(50, 10, Some("crash".to_string()));
        assert!(store.update_job(&reported).await.unwrap());
        let reclaimed = store
            .find_and_lock_next_job(&criteria("w1", 70))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.locked_at, Some(70));

        let mut released = swept;
        released.schedule_retry(80, 10, Some("lease expired".to_string()));
        assert!(!store.update_job(&released).await.unwrap());

        let stored = store.find_by_id(&"a".to_string()).await.unwrap().unwrap();
        assert!(stored.is_leased_by("w1"));
        assert_eq!(stored.locked_at, Some(70));
        assert_eq!(stored.retry_count, 1);
    }

    #[tokio::test]
    async fn test_find_stale_and_by_worker() {
        let store = setup_store().await;
        for id in ["a", "b", "c"] {
            store
                .insert_job(&Job::new(id, "o", "m.wav", 1, 1))
                .await
                .unwrap();
        }
        store.find_and_lock_next_job(&criteria("w1", 100)).await.unwrap();
        store.find_and_lock_next_job(&criteria("w1", 200)).await.unwrap();
        store.find_and_lock_next_job(&criteria("w2", 300)).await.unwrap();

        let stale = store.find_stale_processing_jobs(250).await.unwrap();
        let ids: Vec<_> = stale.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let held = store.find_processing_by_worker("w2").await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].id, "c");
    }

    #[tokio::test]
    async fn test_lease_invariant_enforced_by_schema() {
        let store = setup_store().await;
        let mut job = Job::new("a", "o", "a.wav", 1, 1);
        store.insert_job(&job).await.unwrap();

        // PROCESSING without an owner violates the CHECK constraint
        job.status = JobStatus::Processing;
        assert!(matches!(
            store.update_job(&job).await,
            Err(AppError::Store(_))
        ));
    }
}
