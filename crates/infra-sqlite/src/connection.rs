// SQLite Connection Pool Setup

use scribe_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create SQLite connection pool with WAL mode
///
/// Accepts a plain file path or a `sqlite:` URL.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    create_pool_with(database_url, DEFAULT_MAX_CONNECTIONS).await
}

/// Same as [`create_pool`] with an explicit pool size.
///
/// `sqlite::memory:` gives every connection its own database, so in-memory
/// pools should use a single connection.
pub async fn create_pool_with(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite://{}", database_url)
    };

    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|e| AppError::Config(format!("Invalid database url {}: {}", database_url, e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| AppError::StoreUnavailable(format!("Cannot open database: {}", e)))
}
