//! Domain models: objects, verdicts, configuration.

pub mod activity;
pub mod config;
pub mod cycle;
pub mod graph;
pub mod histogram;
pub mod input;
pub mod metadata_keys;
pub mod monitor_object;
pub mod objects_manager;
pub mod payload;
pub mod polygon;
pub mod quality;
pub mod quality_object;
pub mod ratio;
pub mod trigger;

pub use activity::Activity;
pub use config::{
    AggregatorConfig, CheckConfig, CommonConfig, DataSourceSpec, DataSourceType, DatabaseBackend,
    DatabaseConfig, ObjectSelection, PostProcessingConfig, PublicationPolicy, QcConfig, QcSection,
    QualitySettings, RetryConfig, TaskConfig, TaskLocation, UpdatePolicyType,
};
pub use cycle::{CycleInfo, ValidityInterval};
pub use graph::{Canvas, Graph, GraphPoint};
pub use histogram::{Axis, Histogram1D, Histogram2D, Profile1D};
pub use input::{DataHeader, DataRef, InputRecord, TaskInput};
pub use monitor_object::{CheckBinding, Decoration, MonitorObject};
pub use objects_manager::ObjectsManager;
pub use payload::{Mergeable, OpaqueObject, Payload, PayloadKind};
pub use polygon::PolygonHistogram;
pub use quality::{Flag, FlagKind, NullHandling, Quality};
pub use quality_object::QualityObject;
pub use ratio::RatioHistogram;
pub use trigger::{Trigger, TriggerSpec, TriggerType};
