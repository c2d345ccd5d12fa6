//! Minimal task and check, the starting point for new plugins.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::domain::models::quality::{GOOD_LEVEL, MEDIUM_LEVEL};
use crate::domain::models::{
    Activity, Decoration, FlagKind, Histogram1D, MonitorObject, ObjectsManager, PayloadKind,
    PublicationPolicy, Quality,
};
use crate::domain::ports::{CheckInterface, InitContext, ProcessingContext, TaskInterface};

const EXAMPLE: &str = "example";

/// Histograms the payload size of every input
#[derive(Debug, Default)]
pub struct SkeletonTask {
    messages: u64,
}

impl TaskInterface for SkeletonTask {
    fn initialize(&mut self, ctx: InitContext<'_>) -> anyhow::Result<()> {
        let bins = ctx.options.parameter_or("bins", 100_usize);
        let max = ctx.options.parameter_or("maxPayloadSize", 10_000.0_f64);
        info!(bins, max, "initializing skeleton task");

        let histogram = Histogram1D::new(EXAMPLE, bins, 0.0, max).with_title("Payload size");
        ctx.objects.start_publishing(histogram, PublicationPolicy::Forever)?;
        ctx.objects.set_default_draw_options(EXAMPLE, "hist")?;
        Ok(())
    }

    fn start_of_activity(&mut self, activity: &Activity, objects: &mut ObjectsManager) -> anyhow::Result<()> {
        debug!(run = activity.number, "skeleton task start of activity");
        self.messages = 0;
        objects.reset_all();
        Ok(())
    }

    fn monitor_data(&mut self, ctx: ProcessingContext<'_>) -> anyhow::Result<()> {
        self.messages += 1;
        let histogram = ctx.objects.histogram1d_mut(EXAMPLE)?;
        for (_, data) in ctx.inputs.iter() {
            histogram.fill(data.payload_size() as f64);
        }
        Ok(())
    }

    fn end_of_cycle(&mut self, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
        debug!(messages = self.messages, "skeleton task end of cycle");
        Ok(())
    }
}

/// Good when the example histogram has entries
#[derive(Debug, Default)]
pub struct SkeletonCheck;

impl CheckInterface for SkeletonCheck {
    fn configure(&mut self, _parameters: &BTreeMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }

    fn check(&self, objects: &BTreeMap<String, MonitorObject>) -> anyhow::Result<Quality> {
        let mut result = Quality::null();
        for object in objects.values() {
            let entries = object.payload().entries().unwrap_or(0.0);
            let quality = if entries > 0.0 {
                Quality::good()
            } else {
                Quality::medium().with_flag(FlagKind::NoDetectorData, format!("'{}' is empty", object.name()))
            };
            if result.is_null() || quality.is_worse_than(&result) {
                result = quality;
            }
        }
        Ok(result)
    }

    fn beautify(&self, object: &mut MonitorObject, quality: &Quality) -> anyhow::Result<()> {
        let color = match quality.level() {
            GOOD_LEVEL => "green",
            MEDIUM_LEVEL => "orange",
            _ => "red",
        };
        object.decorate(
            "skeleton_fill",
            Decoration::FillColor {
                color: color.to_string(),
            },
        );
        Ok(())
    }

    fn accepted_type(&self) -> PayloadKind {
        PayloadKind::Histogram1D
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DataHeader, DataRef, InputRecord, TaskConfig};
    use crate::domain::ports::{ServiceRegistry, TaskOptions};
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::database::InMemoryDatabase;
    use std::sync::Arc;

    #[test]
    fn test_task_fills_payload_sizes() {
        let config = TaskConfig::new("SkeletonTask", "TST");
        let services = ServiceRegistry::new(Arc::new(InMemoryDatabase::new()), Arc::new(SystemClock));
        let mut objects = ObjectsManager::new("Skeleton", "TST");
        let mut task = SkeletonTask::default();

        task.initialize(InitContext {
            objects: &mut objects,
            services: &services,
            options: TaskOptions::new(&config),
        })
        .unwrap();

        let inputs = InputRecord::new().with("raw", DataRef::new(DataHeader::default(), vec![0; 150]));
        let activity = Activity::default();
        task.monitor_data(ProcessingContext {
            inputs: &inputs,
            objects: &mut objects,
            services: &services,
            options: TaskOptions::new(&config),
            activity: &activity,
        })
        .unwrap();

        let mo = objects.get_monitor_object(EXAMPLE).unwrap();
        assert_eq!(mo.payload().entries(), Some(1.0));
        assert_eq!(mo.draw_options(), Some("hist"));
    }

    #[test]
    fn test_check_and_idempotent_beautify() {
        let check = SkeletonCheck;
        let mut filled = Histogram1D::new(EXAMPLE, 10, 0.0, 10.0);
        filled.fill(1.0);
        let mut mo = MonitorObject::new(filled.into(), "Skeleton", "TST");
        let objects = BTreeMap::from([(EXAMPLE.to_string(), mo.clone())]);

        let quality = check.check(&objects).unwrap();
        assert_eq!(quality, Quality::good());

        check.beautify(&mut mo, &quality).unwrap();
        let once = mo.clone();
        check.beautify(&mut mo, &quality).unwrap();
        assert_eq!(once, mo);

        let empty = MonitorObject::new(Histogram1D::new(EXAMPLE, 10, 0.0, 10.0).into(), "Skeleton", "TST");
        let quality = check.check(&BTreeMap::from([(EXAMPLE.to_string(), empty)])).unwrap();
        assert_eq!(quality, Quality::medium());
        assert!(quality.has_flag(&FlagKind::NoDetectorData));
    }
}
