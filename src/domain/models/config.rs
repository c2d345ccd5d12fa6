//! Configuration model.
//!
//! Mirrors the configuration tree:
//!
//! ```yaml
//! qc:
//!   config: { database, Activity, consulUrl, logging, quality }
//!   tasks: { <name>: TaskConfig }
//!   checks: { <name>: CheckConfig }
//!   aggregators: { <name>: AggregatorConfig }
//!   postprocessing: { <name>: PostProcessingConfig }
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::activity::Activity;
use super::quality::NullHandling;
use crate::domain::errors::QcError;
use crate::infrastructure::logging::LogConfig;

/// Root of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QcConfig {
    /// Everything lives under the `qc` key
    #[serde(default)]
    pub qc: QcSection,
}

/// The `qc` section: common settings plus one map per component kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QcSection {
    /// Settings shared by every component
    #[serde(default)]
    pub config: CommonConfig,
    /// Tasks by name
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    /// Checks by name
    #[serde(default)]
    pub checks: BTreeMap<String, CheckConfig>,
    /// Aggregators by name
    #[serde(default)]
    pub aggregators: BTreeMap<String, AggregatorConfig>,
    /// Post-processing tasks by name
    #[serde(default)]
    pub postprocessing: BTreeMap<String, PostProcessingConfig>,
}

/// Settings shared by every component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    /// Object store
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Activity used when none is given at start of run
    #[serde(default, rename = "Activity")]
    pub activity: Activity,
    /// Configuration service endpoint; recorded, not contacted
    #[serde(default)]
    pub consul_url: Option<String>,
    /// Logging setup
    #[serde(default)]
    pub logging: LogConfig,
    /// Quality aggregation settings
    #[serde(default)]
    pub quality: QualitySettings,
}

/// Quality aggregation settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySettings {
    /// How Null verdicts take part in aggregation.
    #[serde(default)]
    pub null_handling: NullHandling,
}

/// Which object store implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// Persistent SQLite file
    #[default]
    Sqlite,
    /// Process-local store, lost at exit
    Memory,
}

/// Object store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Store implementation
    #[serde(default)]
    pub implementation: DatabaseBackend,
    /// SQLite URL, e.g. `sqlite:qc.db`
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Upper bound of the connection pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Retry of transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            implementation: DatabaseBackend::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:qc.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

/// Bounded exponential backoff for transient database failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First delay between attempts
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap on the delay between attempts
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    100
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

const fn default_true() -> bool {
    true
}

fn default_detector() -> String {
    "MISC".to_string()
}

fn default_module() -> String {
    "builtin".to_string()
}

/// Where a task instance runs relative to the merger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskLocation {
    /// Same process as the merger
    #[default]
    Local,
    /// Another process; partial objects are shipped to the merger
    Remote,
}

/// How long an object stays registered for publication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublicationPolicy {
    /// Published at the next cycle end, then dropped.
    Once,
    /// Published until the end of the current activity.
    ThroughStop,
    /// Published until explicitly removed.
    #[default]
    Forever,
}

/// Input of a task as seen by the dataflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDataSource {
    /// Source kind, e.g. `dataSamplingPolicy` or `direct`
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Dataflow query selecting the inputs
    #[serde(default)]
    pub query: String,
}

/// Settings of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Inactive components are not built
    #[serde(default = "default_true")]
    pub active: bool,
    /// Plugin class, resolved through the registry
    pub class_name: String,
    /// Module providing the class
    #[serde(default = "default_module")]
    pub module_name: String,
    /// Detector code, first element of storage paths
    #[serde(default = "default_detector")]
    pub detector_name: String,
    /// Cycle length in seconds
    #[serde(default = "default_cycle_duration")]
    pub cycle_duration_seconds: f64,
    /// When set, a cycle ends after this many messages instead of on a timer.
    #[serde(default)]
    pub cycle_event_count: Option<u64>,
    /// Input of the task
    #[serde(default)]
    pub data_source: TaskDataSource,
    /// Free-form parameters handed to the task
    #[serde(default)]
    pub task_parameters: BTreeMap<String, String>,
    /// Where the task runs relative to the merger
    #[serde(default)]
    pub location: TaskLocation,
    /// Replicas whose partial objects are merged
    #[serde(default = "default_parallel_instances")]
    pub parallel_instances: u32,
    /// Reset the task every N cycles; 0 disables it.
    #[serde(default)]
    pub reset_after_cycles: u64,
    /// Stop opening cycles after N; absent means unlimited.
    #[serde(default)]
    pub max_number_cycles: Option<u64>,
    /// Failed message fraction above which a cycle is marked degraded
    #[serde(default = "default_degraded_threshold")]
    pub degraded_cycle_threshold: f64,
}

const fn default_cycle_duration() -> f64 {
    10.0
}

const fn default_parallel_instances() -> u32 {
    1
}

const fn default_degraded_threshold() -> f64 {
    0.1
}

impl TaskConfig {
    /// Defaults for `class_name` on `detector_name`.
    pub fn new(class_name: impl Into<String>, detector_name: impl Into<String>) -> Self {
        Self {
            active: true,
            class_name: class_name.into(),
            module_name: default_module(),
            detector_name: detector_name.into(),
            cycle_duration_seconds: default_cycle_duration(),
            cycle_event_count: None,
            data_source: TaskDataSource::default(),
            task_parameters: BTreeMap::new(),
            location: TaskLocation::default(),
            parallel_instances: default_parallel_instances(),
            reset_after_cycles: 0,
            max_number_cycles: None,
            degraded_cycle_threshold: default_degraded_threshold(),
        }
    }
}

/// When a Check or Aggregator fires, based on which inputs were updated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdatePolicyType {
    /// At least one input updated.
    #[default]
    OnAny,
    /// Every input updated since the last firing.
    OnAll,
    /// Every input seen at least once, then any update.
    OnAnyNonZero,
    /// Once per updated input, with only that input.
    OnEachSeparately,
    /// Any object matching the selection updated; at most once per cycle.
    OnGlobalAny,
}

impl UpdatePolicyType {
    /// Name used in configuration and stored quality objects.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OnAny => "OnAny",
            Self::OnAll => "OnAll",
            Self::OnAnyNonZero => "OnAnyNonZero",
            Self::OnEachSeparately => "OnEachSeparately",
            Self::OnGlobalAny => "OnGlobalAny",
        }
    }
}

impl fmt::Display for UpdatePolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdatePolicyType {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OnAny" => Ok(Self::OnAny),
            "OnAll" => Ok(Self::OnAll),
            "OnAnyNonZero" => Ok(Self::OnAnyNonZero),
            "OnEachSeparately" => Ok(Self::OnEachSeparately),
            "OnGlobalAny" => Ok(Self::OnGlobalAny),
            _ => Err(QcError::Configuration(format!("unknown update policy '{s}'"))),
        }
    }
}

/// Producer type of a data source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSourceType {
    /// A task's monitor objects
    #[default]
    Task,
    /// A check's quality objects
    Check,
    /// An aggregator's quality objects
    Aggregator,
    /// A post-processing task's objects
    PostProcessing,
}

/// Explicit object names, or every object of the producer.
///
/// Serialized as a list of names or the string `"all"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ObjectSelection {
    #[default]
    All,
    Names(Vec<String>),
}

impl Serialize for ObjectSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Names(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ObjectSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Keyword(String),
            Names(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Keyword(word) if word == "all" => Ok(Self::All),
            Raw::Keyword(word) => Err(D::Error::custom(format!(
                "object selection must be a list of names or \"all\", got \"{word}\""
            ))),
            Raw::Names(names) => Ok(Self::Names(names)),
        }
    }
}

impl ObjectSelection {
    /// Selection of the given names.
    pub fn names(names: &[&str]) -> Self {
        Self::Names(names.iter().map(ToString::to_string).collect())
    }

    /// Whether every object is selected.
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

/// Where a Check or Aggregator reads its inputs from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Producer type
    #[serde(default, rename = "type")]
    pub kind: DataSourceType,
    /// Producer name
    pub name: String,
    /// Monitor objects read from a task
    #[serde(default, rename = "MOs")]
    pub mos: ObjectSelection,
    /// Quality objects read from a check or aggregator
    #[serde(default, rename = "QOs")]
    pub qos: ObjectSelection,
}

impl DataSourceSpec {
    /// Read `mos` from task `name`.
    pub fn task(name: impl Into<String>, mos: ObjectSelection) -> Self {
        Self {
            kind: DataSourceType::Task,
            name: name.into(),
            mos,
            qos: ObjectSelection::All,
        }
    }

    /// Read `qos` from check `name`.
    pub fn check(name: impl Into<String>, qos: ObjectSelection) -> Self {
        Self {
            kind: DataSourceType::Check,
            name: name.into(),
            mos: ObjectSelection::All,
            qos,
        }
    }
}

/// Settings of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    /// Inactive components are not built
    #[serde(default = "default_true")]
    pub active: bool,
    /// Plugin class, resolved through the registry
    pub class_name: String,
    /// Module providing the class
    #[serde(default = "default_module")]
    pub module_name: String,
    /// Detector code of the produced quality objects
    #[serde(default = "default_detector")]
    pub detector_name: String,
    /// When the check fires
    #[serde(default)]
    pub policy: UpdatePolicyType,
    /// Inputs of the check
    #[serde(default)]
    pub data_source: Vec<DataSourceSpec>,
    /// Free-form parameters handed to the check
    #[serde(default)]
    pub check_parameters: BTreeMap<String, String>,
}

impl CheckConfig {
    /// Defaults for `class_name` on `detector_name`.
    pub fn new(class_name: impl Into<String>, detector_name: impl Into<String>) -> Self {
        Self {
            active: true,
            class_name: class_name.into(),
            module_name: default_module(),
            detector_name: detector_name.into(),
            policy: UpdatePolicyType::default(),
            data_source: Vec::new(),
            check_parameters: BTreeMap::new(),
        }
    }
}

/// Settings of one aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    /// Inactive components are not built
    #[serde(default = "default_true")]
    pub active: bool,
    /// Plugin class, resolved through the registry
    pub class_name: String,
    /// Module providing the class
    #[serde(default = "default_module")]
    pub module_name: String,
    /// Detector code of the produced quality objects
    #[serde(default = "default_detector")]
    pub detector_name: String,
    /// When the aggregator fires
    #[serde(default)]
    pub policy: UpdatePolicyType,
    /// Checks and aggregators whose results are reduced
    #[serde(default)]
    pub data_source: Vec<DataSourceSpec>,
    /// Free-form parameters handed to the aggregator
    #[serde(default)]
    pub aggregator_parameters: BTreeMap<String, String>,
}

/// Settings of one post-processing task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessingConfig {
    /// Inactive components are not built
    #[serde(default = "default_true")]
    pub active: bool,
    /// Plugin class, resolved through the registry
    pub class_name: String,
    /// Module providing the class
    #[serde(default = "default_module")]
    pub module_name: String,
    /// Detector code of the produced objects
    #[serde(default = "default_detector")]
    pub detector_name: String,
    /// Task-specific settings, interpreted by the task itself.
    #[serde(default)]
    pub customization: serde_json::Value,
    /// Triggers that initialize the task
    #[serde(default)]
    pub init_trigger: Vec<String>,
    /// Triggers that run an update
    #[serde(default)]
    pub update_trigger: Vec<String>,
    /// Triggers that finalize the task
    #[serde(default)]
    pub stop_trigger: Vec<String>,
}

impl PostProcessingConfig {
    /// Defaults for `class_name` on `detector_name`.
    pub fn new(class_name: impl Into<String>, detector_name: impl Into<String>) -> Self {
        Self {
            active: true,
            class_name: class_name.into(),
            module_name: default_module(),
            detector_name: detector_name.into(),
            customization: serde_json::Value::Null,
            init_trigger: Vec::new(),
            update_trigger: Vec::new(),
            stop_trigger: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
qc:
  config:
    database:
      implementation: memory
    Activity:
      number: 12
      type: PHYSICS
  tasks:
    Rate:
      className: RandomHistogramTask
      detectorName: TST
      cycleDurationSeconds: 2
      parallelInstances: 3
      taskParameters:
        bins: "50"
  checks:
    RateCheck:
      className: MeanThresholdCheck
      policy: OnAll
      dataSource:
        - type: Task
          name: Rate
          MOs: [histogram]
    Everything:
      className: SkeletonCheck
      policy: OnGlobalAny
      dataSource:
        - type: Task
          name: Rate
          MOs: all
  postprocessing:
    Trend:
      className: TrendingTask
      customization:
        dataSources: []
      initTrigger: [userorcontrol]
      updateTrigger: ["periodic:2"]
"#;

    #[test]
    fn test_parse_sample() {
        let config: QcConfig = serde_yaml::from_str(SAMPLE).unwrap();
        let qc = &config.qc;

        assert_eq!(qc.config.database.implementation, DatabaseBackend::Memory);
        assert_eq!(qc.config.activity.number, 12);

        let task = &qc.tasks["Rate"];
        assert!(task.active);
        assert_eq!(task.parallel_instances, 3);
        assert!((task.degraded_cycle_threshold - 0.1).abs() < f64::EPSILON);
        assert_eq!(task.task_parameters["bins"], "50");

        let check = &qc.checks["RateCheck"];
        assert_eq!(check.policy, UpdatePolicyType::OnAll);
        assert_eq!(check.detector_name, "MISC");
        assert_eq!(check.data_source[0].mos, ObjectSelection::names(&["histogram"]));
        assert!(qc.checks["Everything"].data_source[0].mos.is_all());

        let pp = &qc.postprocessing["Trend"];
        assert_eq!(pp.update_trigger, vec!["periodic:2".to_string()]);
        assert!(pp.customization["dataSources"].is_array());
    }

    #[test]
    fn test_selection_rejects_other_keywords() {
        let result: Result<ObjectSelection, _> = serde_yaml::from_str("some");
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("OnEachSeparately".parse::<UpdatePolicyType>().unwrap(), UpdatePolicyType::OnEachSeparately);
        assert!("OnSometimes".parse::<UpdatePolicyType>().is_err());
    }
}
