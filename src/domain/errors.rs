//! Error types for the QC framework.
//!
//! `QcError` is the framework taxonomy surfaced by runners and registries.
//! User plugin callbacks return `anyhow::Result` and never see these types.

use thiserror::Error;

/// Framework-level errors
#[derive(Error, Debug)]
pub enum QcError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("an object named '{0}' is already being published")]
    DuplicateObjectName(String),

    #[error("object '{0}' is not being published")]
    ObjectNotFound(String),

    #[error("check '{check}' is already bound to object '{object}'")]
    DuplicateCheckBinding { object: String, check: String },

    #[error("cannot {action} while runner is {state}")]
    InvalidStateTransition { state: String, action: &'static str },

    #[error("task '{task}' failed to initialize: {reason}")]
    TaskInitialization { task: String, reason: String },

    #[error("task '{task}' failed to start activity (run {run}): {reason}")]
    ActivityStart {
        task: String,
        run: u32,
        reason: String,
    },

    #[error("object '{object}' holds a {found}, expected {expected}")]
    WrongType {
        object: String,
        expected: String,
        found: String,
    },

    #[error("no plugin registered for class '{0}'")]
    PluginNotFound(String),

    #[error("invalid trigger '{0}'")]
    InvalidTrigger(String),

    #[error("post-processing task '{task}' failed: {reason}")]
    PostProcessing { task: String, reason: String },

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors raised when combining payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge a {found} into a {expected}")]
    KindMismatch { expected: String, found: String },

    #[error("axis mismatch: {0}")]
    AxisMismatch(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("payload '{0}' does not support merging")]
    NotMergeable(String),
}

/// Errors raised by database implementations
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("connection error: {0}")]
    ConnectionFailed(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl DatabaseError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::ConnectionFailed(_) => true,
            Self::QueryFailed(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db_err) => {
                    // SQLITE_BUSY and SQLITE_LOCKED
                    matches!(db_err.code().as_deref(), Some("5" | "6"))
                }
                _ => false,
            },
            Self::MigrationFailed(_) | Self::JsonError(_) | Self::InvalidKey(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DatabaseError::Transient("busy".into()).is_transient());
        assert!(DatabaseError::ConnectionFailed("refused".into()).is_transient());
        assert!(DatabaseError::QueryFailed(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!DatabaseError::QueryFailed(sqlx::Error::RowNotFound).is_transient());
        assert!(!DatabaseError::InvalidKey(String::new()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = QcError::DuplicateObjectName("h1".into());
        assert_eq!(err.to_string(), "an object named 'h1' is already being published");

        let err: QcError = MergeError::NotMergeable("blob".into()).into();
        assert!(err.to_string().contains("does not support merging"));
    }
}
