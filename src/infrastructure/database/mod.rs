//! Object store implementations
//!
//! - `SqliteDatabase`: persistent store on sqlx/SQLite
//! - `InMemoryDatabase`: process-local store for tests and dry runs
//! - `RetryingDatabase`: backoff decorator for either of them

pub mod connection;
pub mod memory;
pub mod retry;
pub mod sqlite;
pub mod utils;

use std::sync::Arc;

pub use connection::DatabaseConnection;
pub use memory::InMemoryDatabase;
pub use retry::RetryingDatabase;
pub use sqlite::SqliteDatabase;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{DatabaseBackend, DatabaseConfig};
use crate::domain::ports::Database;

/// Build the configured object store, wrapped in the retry decorator.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.implementation {
        DatabaseBackend::Memory => {
            tracing::info!("using in-memory object store");
            Ok(Arc::new(RetryingDatabase::new(
                InMemoryDatabase::new(),
                config.retry,
            )))
        }
        DatabaseBackend::Sqlite => {
            let connection = DatabaseConnection::new(&config.url, config.max_connections).await?;
            connection.migrate().await?;
            tracing::info!(url = %config.url, "connected to SQLite object store");
            Ok(Arc::new(RetryingDatabase::new(
                SqliteDatabase::new(connection.pool().clone()),
                config.retry,
            )))
        }
    }
}
