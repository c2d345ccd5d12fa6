use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::DatabaseError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pooled `SQLite` connections backing the object store.
///
/// Runners publish from several tasks at once, so the file is opened in WAL
/// mode and writers wait on `busy_timeout` instead of failing immediately.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open `database_url` (`sqlite:qc.db`, `sqlite::memory:`), creating the
    /// file when it does not exist yet.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| DatabaseError::ConnectionFailed(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let in_memory = database_url.contains(":memory:");
        let pool = pool_options(in_memory, max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(format!("cannot open object store: {e}")))?;

        tracing::debug!(url = %database_url, in_memory, "object store pool opened");
        Ok(Self { pool })
    }

    /// Create or upgrade the `objects` table. Already applied migrations are skipped.
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all pooled connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// An in-memory database lives and dies with its connection, so that pool
/// holds exactly one connection which is never recycled.
fn pool_options(in_memory: bool, max_connections: u32) -> SqlitePoolOptions {
    let options = SqlitePoolOptions::new().acquire_timeout(ACQUIRE_TIMEOUT);
    if in_memory {
        options
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        options
            .max_connections(max_connections.max(1))
            .idle_timeout(Duration::from_secs(30))
            .max_lifetime(Duration::from_secs(1800))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_create_object_table() {
        let db = DatabaseConnection::new("sqlite::memory:", 5)
            .await
            .expect("failed to open in-memory store");
        db.migrate().await.expect("failed to run migrations");
        db.migrate().await.expect("migrations must be re-runnable");

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM objects")
            .fetch_one(db.pool())
            .await
            .expect("objects table missing");
        assert_eq!(count.0, 0);
        db.close().await;
    }

    #[tokio::test]
    async fn test_non_sqlite_url_is_rejected() {
        let result = DatabaseConnection::new("postgres://nowhere", 1).await;
        assert!(matches!(result, Err(DatabaseError::ConnectionFailed(_))));
    }
}
