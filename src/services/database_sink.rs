use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use crate::domain::errors::QcError;
use crate::domain::ports::{Database, MonitorObjectSink, PublishedCycle};

/// Sink that stores every published object, then optionally forwards the
/// cycle. Used when no check runner sits downstream of a task.
pub struct DatabaseSink {
    database: Arc<dyn Database>,
    downstream: Option<Arc<dyn MonitorObjectSink>>,
}

impl DatabaseSink {
    /// Sink storing every published object.
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            downstream: None,
        }
    }

    /// Also forward each cycle to `downstream` once stored.
    #[must_use]
    pub fn with_downstream(mut self, downstream: Arc<dyn MonitorObjectSink>) -> Self {
        self.downstream = Some(downstream);
        self
    }
}

#[async_trait]
impl MonitorObjectSink for DatabaseSink {
    async fn publish(&self, cycle: PublishedCycle) -> Result<(), QcError> {
        let mut first_error = None;
        for object in &cycle.objects {
            if let Err(err) = self.database.store_mo(object).await {
                error!(object = %object.full_path(), error = %err, "failed to store object");
                first_error.get_or_insert(err);
            }
        }
        debug!(task = %cycle.task_name, cycle = cycle.cycle_number, objects = cycle.objects.len(), "cycle stored");

        if let Some(downstream) = &self.downstream {
            downstream.publish(cycle).await?;
        }
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Activity, Histogram1D, MonitorObject};
    use crate::infrastructure::database::InMemoryDatabase;

    #[tokio::test]
    async fn test_stores_every_object() {
        let database = Arc::new(InMemoryDatabase::new());
        let sink = DatabaseSink::new(database.clone());
        let objects = ["a", "b"]
            .into_iter()
            .map(|name| MonitorObject::new(Histogram1D::new(name, 4, 0.0, 1.0).into(), "Task", "TST"))
            .collect();

        sink.publish(PublishedCycle {
            task_name: "Task".into(),
            instance: 0,
            cycle_number: 1,
            objects,
        })
        .await
        .unwrap();

        assert_eq!(database.version_count().await, 2);
        assert!(database
            .retrieve_mo("TST/MO/Task", "b", None, &Activity::any())
            .await
            .unwrap()
            .is_some());
    }
}
