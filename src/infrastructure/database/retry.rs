use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Activity, MonitorObject, QualityObject, RetryConfig};
use crate::domain::ports::database::{Database, ObjectVersion};

/// Database decorator retrying transient failures
///
/// Backoff doubles from `initial_backoff_ms` up to `max_backoff_ms`. A call
/// is attempted at most `max_retries + 1` times; permanent errors (bad
/// keys, serialization, migrations) are returned on the first attempt.
pub struct RetryingDatabase<D> {
    inner: D,
    policy: RetryConfig,
}

impl<D: Database> RetryingDatabase<D> {
    /// Wrap `inner`, retrying transient failures per `policy`.
    pub const fn new(inner: D, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    pub const fn inner(&self) -> &D {
        &self.inner
    }

    fn backoff(&self) -> backoff::ExponentialBackoff {
        let max_backoff = Duration::from_millis(self.policy.max_backoff_ms);
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.policy.initial_backoff_ms))
            .with_max_interval(max_backoff)
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(
                max_backoff * (self.policy.max_retries + 1) + Duration::from_secs(1),
            ))
            .build()
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let max_retries = self.policy.max_retries;
        let mut attempt = 0_u32;

        let result = backoff::future::retry_notify(
            self.backoff(),
            || {
                attempt += 1;
                let current = attempt;
                let fut = call();
                async move {
                    fut.await.map_err(|err| {
                        if err.is_transient() && current <= max_retries {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: DatabaseError, wait: Duration| {
                warn!(operation, error = %err, ?wait, "transient database failure, retrying");
            },
        )
        .await;

        if result.is_ok() && attempt > 1 {
            debug!(operation, attempts = attempt, "database call succeeded after retries");
        }
        result
    }
}

#[async_trait]
impl<D: Database> Database for RetryingDatabase<D> {
    async fn store_mo(&self, mo: &MonitorObject) -> Result<(), DatabaseError> {
        self.with_retry("store_mo", || self.inner.store_mo(mo)).await
    }

    async fn store_qo(&self, qo: &QualityObject) -> Result<(), DatabaseError> {
        self.with_retry("store_qo", || self.inner.store_qo(qo)).await
    }

    async fn retrieve_mo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<MonitorObject>, DatabaseError> {
        self.with_retry("retrieve_mo", || {
            self.inner.retrieve_mo(path, name, timestamp, activity)
        })
        .await
    }

    async fn retrieve_qo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<QualityObject>, DatabaseError> {
        self.with_retry("retrieve_qo", || {
            self.inner.retrieve_qo(path, name, timestamp, activity)
        })
        .await
    }

    async fn list_versions(&self, path: &str, name: &str) -> Result<Vec<ObjectVersion>, DatabaseError> {
        self.with_retry("list_versions", || self.inner.list_versions(path, name))
            .await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        self.with_retry("list_objects", || self.inner.list_objects(prefix))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Graph;
    use crate::infrastructure::database::InMemoryDatabase;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` store calls.
    struct FlakyDatabase {
        inner: InMemoryDatabase,
        failures: AtomicU32,
        calls: AtomicU32,
        transient: bool,
    }

    impl FlakyDatabase {
        fn new(failures: u32, transient: bool) -> Self {
            Self {
                inner: InMemoryDatabase::new(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                transient,
            }
        }

        fn fail(&self) -> Result<(), DatabaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            self.failures.store(remaining - 1, Ordering::SeqCst);
            if self.transient {
                Err(DatabaseError::Transient("database is locked".into()))
            } else {
                Err(DatabaseError::InvalidKey("bad".into()))
            }
        }
    }

    #[async_trait]
    impl Database for FlakyDatabase {
        async fn store_mo(&self, mo: &MonitorObject) -> Result<(), DatabaseError> {
            self.fail()?;
            self.inner.store_mo(mo).await
        }

        async fn store_qo(&self, qo: &QualityObject) -> Result<(), DatabaseError> {
            self.fail()?;
            self.inner.store_qo(qo).await
        }

        async fn retrieve_mo(
            &self,
            path: &str,
            name: &str,
            timestamp: Option<DateTime<Utc>>,
            activity: &Activity,
        ) -> Result<Option<MonitorObject>, DatabaseError> {
            self.inner.retrieve_mo(path, name, timestamp, activity).await
        }

        async fn retrieve_qo(
            &self,
            path: &str,
            name: &str,
            timestamp: Option<DateTime<Utc>>,
            activity: &Activity,
        ) -> Result<Option<QualityObject>, DatabaseError> {
            self.inner.retrieve_qo(path, name, timestamp, activity).await
        }

        async fn list_versions(&self, path: &str, name: &str) -> Result<Vec<ObjectVersion>, DatabaseError> {
            self.inner.list_versions(path, name).await
        }

        async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
            self.inner.list_objects(prefix).await
        }
    }

    fn fast_policy(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn mo() -> MonitorObject {
        MonitorObject::new(Graph::new("g").into(), "Task", "TST")
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let db = RetryingDatabase::new(FlakyDatabase::new(2, true), fast_policy(3));
        db.store_mo(&mo()).await.expect("should succeed after retries");
        assert_eq!(db.inner().calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.inner().inner.version_count().await, 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let db = RetryingDatabase::new(FlakyDatabase::new(10, true), fast_policy(2));
        let err = db.store_mo(&mo()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(db.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let db = RetryingDatabase::new(FlakyDatabase::new(1, false), fast_policy(3));
        let err = db.store_mo(&mo()).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidKey(_)));
        assert_eq!(db.inner().calls.load(Ordering::SeqCst), 1);
    }
}
