//! Built-in plugins.
//!
//! Every class here is registered in the [`PluginRegistry`] under its
//! class name, so configurations can use them with `moduleName: builtin`.

pub mod random_histogram;
pub mod skeleton;
pub mod threshold;
pub mod trending;
pub mod worst_of;

pub use random_histogram::RandomHistogramTask;
pub use skeleton::{SkeletonCheck, SkeletonTask};
pub use threshold::{MeanThresholdCheck, ThresholdFractionCheck};
pub use trending::{Reductor, TrendingTask};
pub use worst_of::WorstOfAggregator;

use crate::services::plugin_registry::PluginRegistry;

pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register_task("SkeletonTask", || Box::new(SkeletonTask::default()));
    registry.register_task("RandomHistogramTask", || Box::new(RandomHistogramTask::default()));
    registry.register_check("SkeletonCheck", || Box::new(SkeletonCheck::default()));
    registry.register_check("ThresholdFractionCheck", || Box::new(ThresholdFractionCheck::default()));
    registry.register_check("MeanThresholdCheck", || Box::new(MeanThresholdCheck::default()));
    registry.register_aggregator("WorstOfAggregator", || Box::new(WorstOfAggregator::default()));
    registry.register_postprocessing("TrendingTask", || Box::new(TrendingTask::default()));
}
