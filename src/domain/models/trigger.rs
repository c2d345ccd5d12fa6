//! Post-processing triggers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::activity::Activity;
use crate::domain::errors::QcError;

/// Why a post-processing callback is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Nothing happened.
    No,
    Once,
    Always,
    StartOfRun,
    EndOfRun,
    StartOfFill,
    EndOfFill,
    Periodic,
    NewObject,
    UserOrControl,
}

impl TriggerType {
    /// Name used in logs and configuration.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::No => "no",
            Self::Once => "once",
            Self::Always => "always",
            Self::StartOfRun => "start_of_run",
            Self::EndOfRun => "end_of_run",
            Self::StartOfFill => "start_of_fill",
            Self::EndOfFill => "end_of_fill",
            Self::Periodic => "periodic",
            Self::NewObject => "new_object",
            Self::UserOrControl => "user_or_control",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trigger occurrence, stamped with the time it refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// What happened
    pub trigger_type: TriggerType,
    /// Time the occurrence refers to; objects are read as of this instant
    pub timestamp: DateTime<Utc>,
    /// Activity the occurrence belongs to
    pub activity: Activity,
    /// Set for triggers that will never fire again.
    #[serde(default)]
    pub last: bool,
    /// Object path for `NewObject` triggers.
    #[serde(default)]
    pub object_path: Option<String>,
}

impl Trigger {
    /// Occurrence of `trigger_type` at `timestamp`.
    pub const fn new(trigger_type: TriggerType, timestamp: DateTime<Utc>, activity: Activity) -> Self {
        Self {
            trigger_type,
            timestamp,
            activity,
            last: false,
            object_path: None,
        }
    }

    /// Non-firing occurrence.
    pub fn none(timestamp: DateTime<Utc>) -> Self {
        Self::new(TriggerType::No, timestamp, Activity::any())
    }

    /// Mark the occurrence as the last one of its trigger.
    #[must_use]
    pub const fn last(mut self) -> Self {
        self.last = true;
        self
    }

    /// Whether this occurrence should run a callback.
    pub fn fired(&self) -> bool {
        self.trigger_type != TriggerType::No
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.trigger_type, self.timestamp.to_rfc3339())?;
        if let Some(path) = &self.object_path {
            write!(f, " ({path})")?;
        }
        Ok(())
    }
}

/// A trigger as written in configuration, e.g. `periodic:2`, `sor` or
/// `newobject:qcdb:TST/MO/Task/h`.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    Once,
    Always,
    StartOfRun,
    EndOfRun,
    StartOfFill,
    EndOfFill,
    Periodic(std::time::Duration),
    NewObject { path: String, name: String },
    UserOrControl,
}

impl TriggerSpec {
    /// Type of the occurrences this spec produces.
    pub const fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Once => TriggerType::Once,
            Self::Always => TriggerType::Always,
            Self::StartOfRun => TriggerType::StartOfRun,
            Self::EndOfRun => TriggerType::EndOfRun,
            Self::StartOfFill => TriggerType::StartOfFill,
            Self::EndOfFill => TriggerType::EndOfFill,
            Self::Periodic(_) => TriggerType::Periodic,
            Self::NewObject { .. } => TriggerType::NewObject,
            Self::UserOrControl => TriggerType::UserOrControl,
        }
    }

    fn parse_period(text: &str) -> Option<f64> {
        let text = text.trim();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value: f64 = number.parse().ok()?;
        let multiplier = match unit.trim() {
            "" | "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
            "min" | "mins" | "minute" | "minutes" => 60.0,
            "h" | "hour" | "hours" => 3600.0,
            _ => return None,
        };
        Some(value * multiplier)
    }
}

impl FromStr for TriggerSpec {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let invalid = || QcError::InvalidTrigger(s.to_string());

        let simple = match lower.as_str() {
            "once" => Some(Self::Once),
            "always" => Some(Self::Always),
            "sor" | "startofrun" | "start-of-run" => Some(Self::StartOfRun),
            "eor" | "endofrun" | "end-of-run" => Some(Self::EndOfRun),
            "sof" | "startoffill" | "start-of-fill" => Some(Self::StartOfFill),
            "eof" | "endoffill" | "end-of-fill" => Some(Self::EndOfFill),
            "user" | "control" | "userorcontrol" | "user-or-control" => Some(Self::UserOrControl),
            _ => None,
        };
        if let Some(spec) = simple {
            return Ok(spec);
        }

        let object_path = ["newobject:", "on-new-object:"]
            .iter()
            .find(|prefix| lower.starts_with(*prefix))
            .map(|prefix| &trimmed[prefix.len()..]);
        if let Some(rest) = object_path {
            let rest = ["qcdb:", "ccdb:"]
                .iter()
                .find_map(|db| rest.strip_prefix(db))
                .unwrap_or(rest);
            let (path, name) = rest
                .rsplit_once('/')
                .filter(|(path, name)| !path.is_empty() && !name.is_empty())
                .ok_or_else(invalid)?;
            return Ok(Self::NewObject {
                path: path.to_string(),
                name: name.to_string(),
            });
        }

        let period = lower
            .strip_prefix("periodic:")
            .map_or_else(|| Self::parse_period(&lower), Self::parse_period)
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .ok_or_else(invalid)?;
        Ok(Self::Periodic(std::time::Duration::from_secs_f64(period)))
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Periodic(period) => write!(f, "periodic:{}", period.as_secs_f64()),
            Self::NewObject { path, name } => write!(f, "newobject:qcdb:{path}/{name}"),
            other => f.write_str(other.trigger_type().as_str()),
        }
    }
}
