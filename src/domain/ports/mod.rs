//! Ports: traits implemented by plugins and adapters.

pub mod aggregator;
pub mod check;
pub mod clock;
pub mod database;
pub mod postprocessing;
pub mod services;
pub mod sink;
pub mod task;

pub use aggregator::AggregatorInterface;
pub use check::CheckInterface;
pub use clock::Clock;
pub use database::{Database, ObjectKind, ObjectVersion};
pub use postprocessing::{PostProcessingContext, PostProcessingInterface};
pub use services::ServiceRegistry;
pub use sink::{MonitorObjectSink, PublishedCycle, QualityObjectSink};
pub use task::{InitContext, ProcessingContext, TaskInterface, TaskOptions};
