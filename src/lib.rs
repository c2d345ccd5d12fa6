//! Quality Control framework
//!
//! Monitoring tasks turn sampled data into Monitor Objects (histograms,
//! graphs, canvases). Checks judge those objects and produce Quality
//! Objects, aggregators fold qualities together, and trigger-driven
//! post-processing tasks derive new objects (trends, summaries) from what
//! is stored in the versioned object database.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): objects, verdicts, configuration, and the
//!   plugin and storage ports
//! - **Service Layer** (`services`): task, check, aggregator and
//!   post-processing runners, merging, update policies, triggers
//! - **Infrastructure Layer** (`infrastructure`): object stores, config
//!   loading, logging, clocks
//! - **Modules** (`modules`): built-in tasks, checks, aggregators and
//!   post-processing tasks
//! - **CLI Layer** (`cli`): the `qc` command
//!
//! # Example
//!
//! ```ignore
//! use quality_control::{ConfigLoader, PluginRegistry, QcInfrastructure};
//!
//! let config = ConfigLoader::load_from_file("qc.yaml")?;
//! let database = quality_control::infrastructure::database::connect(&config.qc.config.database).await?;
//! let mut qc = QcInfrastructure::from_config(config, &PluginRegistry::with_builtins(), database, clock).await?;
//! qc.initialize()?;
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod modules;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DatabaseError, MergeError, QcError};
pub use domain::models::{
    Activity, Histogram1D, MonitorObject, ObjectsManager, Payload, QcConfig, Quality, QualityObject, Trigger,
};
pub use domain::ports::{AggregatorInterface, CheckInterface, Database, PostProcessingInterface, TaskInterface};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{CheckRunner, PluginRegistry, PostProcessingRunner, QcInfrastructure, TaskRunner};
