use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Logging configuration, read from `qc.config.logging`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Console output, written to stderr so that command output stays clean
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// How often the log file rolls over
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Rolled files older than this are deleted at startup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Encoding of log records
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human readable, multi-line
    #[default]
    Pretty,
}

impl LogFormat {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

/// Log file rollover period
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// New file every day
    #[default]
    Daily,
    /// New file every hour
    Hourly,
    /// Single file
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_retention_days() -> u32 {
    30
}
