//! In-process merging of partial objects from parallel task instances.
//!
//! Each instance publishes its objects once per cycle. Contributions are
//! keyed by (cycle, instance), so a repeated publication is ignored rather
//! than double counted. When every expected instance has contributed, the
//! objects are merged by name and forwarded downstream as one cycle.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::QcError;
use crate::domain::models::{metadata_keys, Mergeable, MonitorObject};
use crate::domain::ports::{MonitorObjectSink, PublishedCycle};

/// Merge statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounters {
    /// Cycles whose merged objects were published
    pub cycles_merged: u64,
    /// Second contributions of one instance to the same cycle, dropped
    pub duplicate_contributions: u64,
    /// Objects that could not be merged
    pub merge_failures: u64,
}

#[derive(Debug, Default)]
struct Pending {
    /// cycle -> instance -> objects
    cycles: BTreeMap<u64, BTreeMap<u32, Vec<MonitorObject>>>,
    /// Cycles already forwarded; late contributions are dropped.
    completed: BTreeSet<u64>,
    counters: MergeCounters,
}

/// Collects partial objects and forwards one merged set per cycle
pub struct MergeCollector {
    task_name: String,
    expected_instances: u32,
    downstream: Arc<dyn MonitorObjectSink>,
    pending: Mutex<Pending>,
}

impl MergeCollector {
    /// Collector expecting `expected_instances` contributions per cycle.
    pub fn new(
        task_name: impl Into<String>,
        expected_instances: u32,
        downstream: Arc<dyn MonitorObjectSink>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            expected_instances: expected_instances.max(1),
            downstream,
            pending: Mutex::new(Pending::default()),
        }
    }

    pub async fn counters(&self) -> MergeCounters {
        self.pending.lock().await.counters
    }

    /// Cycles with at least one contribution that were not forwarded yet
    pub async fn pending_cycles(&self) -> Vec<u64> {
        self.pending.lock().await.cycles.keys().copied().collect()
    }

    /// Merge and forward whatever arrived for `cycle`, even if incomplete.
    ///
    /// Returns false if nothing was pending for that cycle.
    pub async fn flush(&self, cycle: u64) -> Result<bool, QcError> {
        let merged = {
            let mut pending = self.pending.lock().await;
            let Some(contributions) = pending.cycles.remove(&cycle) else {
                return Ok(false);
            };
            warn!(
                task = %self.task_name,
                cycle,
                received = contributions.len(),
                expected = self.expected_instances,
                "flushing incomplete cycle"
            );
            Self::complete(&mut pending, cycle, contributions)
        };
        self.forward(cycle, merged).await?;
        Ok(true)
    }

    /// Flush every pending cycle, oldest first
    pub async fn flush_all(&self) -> Result<usize, QcError> {
        let cycles = self.pending_cycles().await;
        let mut flushed = 0;
        for cycle in cycles {
            if self.flush(cycle).await? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    fn complete(
        pending: &mut Pending,
        cycle: u64,
        contributions: BTreeMap<u32, Vec<MonitorObject>>,
    ) -> Vec<MonitorObject> {
        pending.completed.insert(cycle);
        pending.counters.cycles_merged += 1;
        let (merged, failures) = merge_contributions(contributions);
        pending.counters.merge_failures += failures;
        merged
    }

    async fn forward(&self, cycle: u64, objects: Vec<MonitorObject>) -> Result<(), QcError> {
        info!(task = %self.task_name, cycle, objects = objects.len(), "forwarding merged cycle");
        self.downstream
            .publish(PublishedCycle {
                task_name: self.task_name.clone(),
                instance: 0,
                cycle_number: cycle,
                objects,
            })
            .await
    }
}

/// Merge objects by name across instances, in instance order.
///
/// Returns the merged objects and the number of contributions that could
/// not be merged.
fn merge_contributions(contributions: BTreeMap<u32, Vec<MonitorObject>>) -> (Vec<MonitorObject>, u64) {
    let mut merged: BTreeMap<String, MonitorObject> = BTreeMap::new();
    let mut failures = 0;

    for (instance, objects) in contributions {
        for object in objects {
            let Some(target) = merged.get_mut(object.name()) else {
                merged.insert(object.name().to_string(), object);
                continue;
            };

            if let Err(err) = target.payload_mut().merge(object.payload()) {
                failures += 1;
                warn!(object = %object.name(), instance, error = %err, "cannot merge contribution");
                continue;
            }

            let validity = match (target.validity(), object.validity()) {
                (Some(a), Some(b)) => Some(a.union(&b)),
                (a, b) => a.or(b),
            };
            let created_at = target.created_at().max(object.created_at());
            let degraded = target.get_metadata(metadata_keys::DEGRADED_CYCLE) == Some("true")
                || object.get_metadata(metadata_keys::DEGRADED_CYCLE) == Some("true");
            if let (Some(validity), Some(created_at)) = (validity, created_at) {
                let activity = target.activity().clone();
                let cycle = target.cycle_number();
                target.stamp(&activity, cycle, validity, created_at);
            }
            target.add_metadata(metadata_keys::DEGRADED_CYCLE, degraded.to_string());
        }
    }

    (merged.into_values().collect(), failures)
}

#[async_trait]
impl MonitorObjectSink for MergeCollector {
    async fn publish(&self, cycle: PublishedCycle) -> Result<(), QcError> {
        let number = cycle.cycle_number;
        let merged = {
            let mut guard = self.pending.lock().await;
            let pending = &mut *guard;
            if pending.completed.contains(&number) {
                pending.counters.duplicate_contributions += 1;
                warn!(task = %self.task_name, cycle = number, instance = cycle.instance, "late contribution dropped");
                return Ok(());
            }

            let contributions = pending.cycles.entry(number).or_default();
            if contributions.contains_key(&cycle.instance) {
                pending.counters.duplicate_contributions += 1;
                debug!(task = %self.task_name, cycle = number, instance = cycle.instance, "duplicate contribution ignored");
                return Ok(());
            }
            contributions.insert(cycle.instance, cycle.objects);

            let received = u32::try_from(contributions.len()).unwrap_or(u32::MAX);
            if received < self.expected_instances {
                debug!(
                    task = %self.task_name,
                    cycle = number,
                    received,
                    expected = self.expected_instances,
                    "waiting for more instances"
                );
                return Ok(());
            }

            let contributions = pending.cycles.remove(&number).unwrap_or_default();
            Self::complete(pending, number, contributions)
        };

        self.forward(number, merged).await
    }
}
