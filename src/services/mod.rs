//! Runners and the services connecting them.

pub mod aggregator_runner;
pub mod check_runner;
pub mod database_sink;
pub mod guard;
pub mod infrastructure;
pub mod merger;
pub mod plugin_registry;
pub mod postprocessing_runner;
pub mod task_runner;
pub mod triggers;
pub mod update_policy;

pub use aggregator_runner::{AggregatorCounters, AggregatorRunner};
pub use check_runner::{CheckCounters, CheckRunner};
pub use database_sink::DatabaseSink;
pub use guard::{guarded, guarded_async};
pub use infrastructure::{CycleReport, QcInfrastructure, SyntheticData};
pub use merger::{MergeCollector, MergeCounters};
pub use plugin_registry::PluginRegistry;
pub use postprocessing_runner::{PostProcessingCounters, PostProcessingRunner, PostProcessingState};
pub use task_runner::{RunnerCounters, TaskRunner, TaskRunnerState};
pub use triggers::{TriggerSet, TriggerSource};
pub use update_policy::{InputMatcher, UpdatePolicyManager};
