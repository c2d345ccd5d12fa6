//! Task filling histograms with generated values, used for demos and
//! load tests.
//!
//! Every message adds `fillsPerMessage` values drawn around `mean` with
//! spread `sigma`. A message carrying a JSON array of numbers under the
//! `values` binding fills exactly those values instead.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::domain::models::{Activity, Histogram1D, ObjectsManager, PublicationPolicy};
use crate::domain::ports::{InitContext, ProcessingContext, TaskInterface};

/// Test task filling a histogram with random values
#[derive(Debug)]
pub struct RandomHistogramTask {
    object_name: String,
    fills_per_message: usize,
    mean: f64,
    sigma: f64,
    rng: StdRng,
}

impl Default for RandomHistogramTask {
    fn default() -> Self {
        Self {
            object_name: "histogram".to_string(),
            fills_per_message: 100,
            mean: 50.0,
            sigma: 10.0,
            rng: StdRng::seed_from_u64(0),
        }
    }
}

impl RandomHistogramTask {
    /// Approximately normal deviate: sum of twelve uniforms, shifted.
    fn gauss(&mut self) -> f64 {
        let sum: f64 = (0..12).map(|_| self.rng.gen::<f64>()).sum();
        self.mean + self.sigma * (sum - 6.0)
    }
}

impl TaskInterface for RandomHistogramTask {
    fn initialize(&mut self, ctx: InitContext<'_>) -> anyhow::Result<()> {
        let options = ctx.options;
        self.object_name = options.parameter("objectName").unwrap_or("histogram").to_string();
        self.fills_per_message = options.parameter_or("fillsPerMessage", 100);
        self.mean = options.parameter_or("mean", 50.0);
        self.sigma = options.parameter_or("sigma", 10.0);
        self.rng = match options.parameter("seed").and_then(|seed| seed.parse::<u64>().ok()) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let bins = options.parameter_or("bins", 100_usize);
        let min = options.parameter_or("min", 0.0);
        let max = options.parameter_or("max", 100.0);
        if bins == 0 || max <= min {
            anyhow::bail!("invalid binning: {bins} bins over [{min}, {max}]");
        }
        info!(object = %self.object_name, bins, min, max, "initializing random histogram task");

        ctx.objects
            .start_publishing(Histogram1D::new(self.object_name.clone(), bins, min, max), PublicationPolicy::Forever)?;
        Ok(())
    }

    fn start_of_activity(&mut self, _activity: &Activity, objects: &mut ObjectsManager) -> anyhow::Result<()> {
        objects.reset_all();
        Ok(())
    }

    fn monitor_data(&mut self, ctx: ProcessingContext<'_>) -> anyhow::Result<()> {
        if let Some(data) = ctx.inputs.get("values") {
            let values: Vec<f64> = data.decode()?;
            let histogram = ctx.objects.histogram1d_mut(&self.object_name)?;
            for value in values {
                histogram.fill(value);
            }
            return Ok(());
        }

        let values: Vec<f64> = (0..self.fills_per_message).map(|_| self.gauss()).collect();
        let histogram = ctx.objects.histogram1d_mut(&self.object_name)?;
        for value in values {
            histogram.fill(value);
        }
        Ok(())
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

    fn setup(parameters: &[(&str, &str)]) -> (RandomHistogramTask, ObjectsManager, ServiceRegistry, TaskConfig) {
        let mut config = TaskConfig::new("RandomHistogramTask", "TST");
        for (key, value) in parameters {
            config.task_parameters.insert((*key).to_string(), (*value).to_string());
        }
        let services = ServiceRegistry::new(Arc::new(InMemoryDatabase::new()), Arc::new(SystemClock));
        let mut objects = ObjectsManager::new("Random", "TST");
        let mut task = RandomHistogramTask::default();
        task.initialize(InitContext {
            objects: &mut objects,
            services: &services,
            options: TaskOptions::new(&config),
        })
        .unwrap();
        (task, objects, services, config)
    }

    fn feed(task: &mut RandomHistogramTask, objects: &mut ObjectsManager, services: &ServiceRegistry, config: &TaskConfig, inputs: &InputRecord) {
        let activity = Activity::default();
        task.monitor_data(ProcessingContext {
            inputs,
            objects,
            services,
            options: TaskOptions::new(config),
            activity: &activity,
        })
        .unwrap();
    }

    #[test]
    fn test_generated_fills_are_reproducible() {
        let parameters = [("seed", "42"), ("fillsPerMessage", "500")];
        let (mut a, mut objects_a, services, config) = setup(&parameters);
        let (mut b, mut objects_b, _, _) = setup(&parameters);

        feed(&mut a, &mut objects_a, &services, &config, &InputRecord::new());
        feed(&mut b, &mut objects_b, &services, &config, &InputRecord::new());

        let ha = objects_a.get_monitor_object("histogram").unwrap().payload();
        let hb = objects_b.get_monitor_object("histogram").unwrap().payload();
        assert_eq!(ha.entries(), Some(500.0));
        assert!(ha.approx_eq(hb, 0.0));
        let mean = ha.as_histogram1d().unwrap().mean();
        assert!((mean - 50.0).abs() < 3.0, "mean {mean}");
    }

    #[test]
    fn test_explicit_values() {
        let (mut task, mut objects, services, config) = setup(&[("bins", "10"), ("max", "10")]);
        let data = DataRef::encode(DataHeader::default(), &vec![0.5, 0.5, 9.5]).unwrap();
        feed(&mut task, &mut objects, &services, &config, &InputRecord::new().with("values", data));

        let h = objects.get_monitor_object("histogram").unwrap().payload().as_histogram1d().unwrap();
        assert!((h.bin_content(1) - 2.0).abs() < f64::EPSILON);
        assert!((h.bin_content(10) - 1.0).abs() < f64::EPSILON);
    }
}
