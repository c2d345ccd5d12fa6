use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Yaml};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{DataSourceSpec, DataSourceType, DatabaseBackend, QcConfig};
use crate::domain::models::trigger::TriggerSpec;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database url cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("{kind} name cannot be empty")]
    EmptyName { kind: &'static str },

    #[error("{kind} '{name}' has no className")]
    EmptyClassName { kind: &'static str, name: String },

    #[error("Task '{task}': cycleDurationSeconds must be positive, got {value}")]
    InvalidCycleDuration { task: String, value: f64 },

    #[error("Task '{task}': {reason}")]
    InvalidTask { task: String, reason: String },

    #[error("'{consumer}' reads from unknown {kind} '{source_name}'")]
    UnknownSource {
        consumer: String,
        kind: &'static str,
        source_name: String,
    },

    #[error("Post-processing task '{task}': invalid trigger '{trigger}'")]
    InvalidTrigger { task: String, trigger: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Environment prefix for overrides, e.g. `QC_QC__CONFIG__LOGGING__LEVEL=debug`.
    pub const ENV_PREFIX: &'static str = "QC_";

    /// Load configuration from a file
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. The file, read as JSON when it ends in `.json` and as YAML otherwise
    /// 3. Environment variables (QC_* prefix, `__` separates nesting levels)
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<QcConfig> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let figment = Figment::new().merge(Serialized::defaults(QcConfig::default()));
        let figment = if is_json {
            figment.merge(Json::file(path))
        } else {
            figment.merge(Yaml::file(path))
        };

        let config: QcConfig = figment
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from YAML text, without environment overrides
    pub fn load_from_str(yaml: &str) -> Result<QcConfig> {
        let config: QcConfig = Figment::new()
            .merge(Serialized::defaults(QcConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &QcConfig) -> Result<(), ConfigError> {
        let qc = &config.qc;
        let common = &qc.config;

        // Logging
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&common.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(common.logging.level.clone()));
        }

        // Database
        let database = &common.database;
        if database.implementation == DatabaseBackend::Sqlite && database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(database.max_connections));
        }
        if database.retry.initial_backoff_ms >= database.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                database.retry.initial_backoff_ms,
                database.retry.max_backoff_ms,
            ));
        }

        // Tasks
        for (name, task) in &qc.tasks {
            check_names("Task", name, &task.class_name)?;
            if !(task.cycle_duration_seconds.is_finite() && task.cycle_duration_seconds > 0.0) {
                return Err(ConfigError::InvalidCycleDuration {
                    task: name.clone(),
                    value: task.cycle_duration_seconds,
                });
            }
            let invalid = |reason: &str| ConfigError::InvalidTask {
                task: name.clone(),
                reason: reason.to_string(),
            };
            if task.cycle_event_count == Some(0) {
                return Err(invalid("cycleEventCount must be at least 1"));
            }
            if task.parallel_instances == 0 {
                return Err(invalid("parallelInstances must be at least 1"));
            }
            if !(0.0..=1.0).contains(&task.degraded_cycle_threshold) {
                return Err(invalid("degradedCycleThreshold must be within [0, 1]"));
            }
        }

        let tasks: BTreeSet<&str> = qc.tasks.keys().map(String::as_str).collect();
        let checks: BTreeSet<&str> = qc.checks.keys().map(String::as_str).collect();
        let aggregators: BTreeSet<&str> = qc.aggregators.keys().map(String::as_str).collect();
        let postprocessing: BTreeSet<&str> =
            qc.postprocessing.keys().map(String::as_str).collect();
        let known = |source: &DataSourceSpec| match source.kind {
            DataSourceType::Task => ("task", tasks.contains(source.name.as_str())),
            DataSourceType::Check => ("check", checks.contains(source.name.as_str())),
            DataSourceType::Aggregator => ("aggregator", aggregators.contains(source.name.as_str())),
            DataSourceType::PostProcessing => (
                "post-processing task",
                postprocessing.contains(source.name.as_str()),
            ),
        };

        // Checks
        for (name, check) in &qc.checks {
            check_names("Check", name, &check.class_name)?;
            if check.data_source.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Check '{name}' has no dataSource"
                )));
            }
            for source in &check.data_source {
                let (kind, exists) = known(source);
                if !exists {
                    return Err(ConfigError::UnknownSource {
                        consumer: name.clone(),
                        kind,
                        source_name: source.name.clone(),
                    });
                }
            }
        }

        // Aggregators
        for (name, aggregator) in &qc.aggregators {
            check_names("Aggregator", name, &aggregator.class_name)?;
            for source in &aggregator.data_source {
                if !matches!(source.kind, DataSourceType::Check | DataSourceType::Aggregator) {
                    return Err(ConfigError::ValidationFailed(format!(
                        "Aggregator '{name}' can only read from checks and aggregators"
                    )));
                }
                let (kind, exists) = known(source);
                if !exists {
                    return Err(ConfigError::UnknownSource {
                        consumer: name.clone(),
                        kind,
                        source_name: source.name.clone(),
                    });
                }
            }
        }

        // Post-processing
        for (name, pp) in &qc.postprocessing {
            check_names("Post-processing task", name, &pp.class_name)?;
            if pp.init_trigger.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Post-processing task '{name}' has no initTrigger"
                )));
            }
            let all_triggers = pp
                .init_trigger
                .iter()
                .chain(&pp.update_trigger)
                .chain(&pp.stop_trigger);
            for trigger in all_triggers {
                if trigger.parse::<TriggerSpec>().is_err() {
                    return Err(ConfigError::InvalidTrigger {
                        task: name.clone(),
                        trigger: trigger.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn check_names(kind: &'static str, name: &str, class_name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyName { kind });
    }
    if class_name.trim().is_empty() {
        return Err(ConfigError::EmptyClassName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{
        CheckConfig, ObjectSelection, PostProcessingConfig, TaskConfig,
    };

    fn valid_config() -> QcConfig {
        let mut config = QcConfig::default();
        config
            .qc
            .tasks
            .insert("Rate".into(), TaskConfig::new("RandomHistogramTask", "TST"));
        let mut check = CheckConfig::new("MeanThresholdCheck", "TST");
        check
            .data_source
            .push(DataSourceSpec::task("Rate", ObjectSelection::All));
        config.qc.checks.insert("RateCheck".into(), check);
        config
    }

    #[test]
    fn test_default_config() {
        let config = QcConfig::default();
        assert_eq!(config.qc.config.database.url, "sqlite:qc.db");
        assert_eq!(config.qc.config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(ConfigLoader::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = valid_config();
        config.qc.config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = valid_config();
        config.qc.config.database.max_connections = 0;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConnections(0)
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = valid_config();
        config.qc.config.database.retry.initial_backoff_ms = 30000;
        config.qc.config.database.retry.max_backoff_ms = 10000;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30000, 10000)
        ));
    }

    #[test]
    fn test_validate_cycle_duration() {
        for value in [0.0, -1.0, f64::NAN] {
            let mut config = valid_config();
            if let Some(task) = config.qc.tasks.get_mut("Rate") {
                task.cycle_duration_seconds = value;
            }
            assert!(matches!(
                ConfigLoader::validate(&config).unwrap_err(),
                ConfigError::InvalidCycleDuration { .. }
            ));
        }
    }

    #[test]
    fn test_validate_unknown_task_source() {
        let mut config = valid_config();
        let mut check = CheckConfig::new("SkeletonCheck", "TST");
        check
            .data_source
            .push(DataSourceSpec::task("Missing", ObjectSelection::All));
        config.qc.checks.insert("Orphan".into(), check);

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::UnknownSource { consumer, source_name, .. } => {
                assert_eq!(consumer, "Orphan");
                assert_eq!(source_name, "Missing");
            }
            other => panic!("Expected UnknownSource error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_empty_class_name() {
        let mut config = valid_config();
        config
            .qc
            .tasks
            .insert("Nameless".into(), TaskConfig::new("", "TST"));

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyClassName { kind: "Task", .. }
        ));
    }

    #[test]
    fn test_validate_triggers() {
        let mut config = valid_config();
        let mut pp = PostProcessingConfig::new("TrendingTask", "TST");
        pp.init_trigger.push("userorcontrol".into());
        pp.update_trigger.push("every now and then".into());
        config.qc.postprocessing.insert("Trend".into(), pp);

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidTrigger { task, trigger } => {
                assert_eq!(task, "Trend");
                assert_eq!(trigger, "every now and then");
            }
            other => panic!("Expected InvalidTrigger error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_from_str_unknown_policy() {
        let yaml = r"
qc:
  tasks:
    Rate:
      className: RandomHistogramTask
  checks:
    RateCheck:
      className: SkeletonCheck
      policy: OnFullMoon
      dataSource:
        - type: Task
          name: Rate
";
        assert!(ConfigLoader::load_from_str(yaml).is_err());
    }

    #[test]
    fn test_load_from_str() {
        let yaml = r"
qc:
  config:
    database:
      implementation: memory
  tasks:
    Rate:
      className: RandomHistogramTask
      detectorName: TST
      cycleDurationSeconds: 0.5
";
        let config = ConfigLoader::load_from_str(yaml).unwrap();
        assert_eq!(
            config.qc.config.database.implementation,
            DatabaseBackend::Memory
        );
        assert!((config.qc.tasks["Rate"].cycle_duration_seconds - 0.5).abs() < f64::EPSILON);
    }
}
