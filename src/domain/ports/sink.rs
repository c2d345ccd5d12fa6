use async_trait::async_trait;

use crate::domain::errors::QcError;
use crate::domain::models::{MonitorObject, QualityObject};

/// Objects published by one task instance at the end of one cycle
#[derive(Debug, Clone)]
pub struct PublishedCycle {
    /// Task that produced the objects
    pub task_name: String,
    /// Replica index, 0 for a single instance or a merged result
    pub instance: u32,
    /// Cycle the objects were filled in
    pub cycle_number: u64,
    /// Snapshots of every published object
    pub objects: Vec<MonitorObject>,
}

/// Downstream of a task runner: a merger, a check runner or the database
#[async_trait]
pub trait MonitorObjectSink: Send + Sync {
    /// Accept the objects of one finished cycle.
    async fn publish(&self, cycle: PublishedCycle) -> Result<(), QcError>;
}

/// Downstream of a check runner, e.g. an aggregator runner
#[async_trait]
pub trait QualityObjectSink: Send + Sync {
    /// Accept the quality objects produced in one pass.
    async fn publish_qualities(&self, qualities: Vec<QualityObject>) -> Result<(), QcError>;
}
