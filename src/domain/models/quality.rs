//! Quality verdicts and their aggregation algebra.
//!
//! A `Quality` is a leveled verdict (Null, Good, Medium, Bad) that carries
//! the flags a Check accumulated while deciding it, plus free-form metadata.
//! Two qualities are equal when their name and level match; flags and
//! metadata do not take part in equality.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Level of the Null quality ("no opinion").
pub const NULL_LEVEL: u32 = 0;
/// Level of the Good quality.
pub const GOOD_LEVEL: u32 = 1;
/// Level of the Medium quality.
pub const MEDIUM_LEVEL: u32 = 2;
/// Level of the Bad quality.
pub const BAD_LEVEL: u32 = 3;

/// Kind of a quality flag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FlagKind {
    /// Reason not known to the check
    Unknown,
    /// Input payload is not of the type the check expects
    WrongType,
    /// The check itself failed while deciding
    CheckException,
    /// An expected input object was not available
    MissingInput,
    /// The detector delivered no usable data
    NoDetectorData,
    /// Part of the acceptance is missing or masked
    LimitedAcceptance,
    /// Tracking quality is insufficient
    BadTracking,
    /// Particle identification is degraded
    #[serde(rename = "BadPID")]
    BadPid,
    /// Installation-specific flag kind
    Custom(String),
}

impl FlagKind {
    /// Name of the kind as stored and displayed
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown => "Unknown",
            Self::WrongType => "WrongType",
            Self::CheckException => "CheckException",
            Self::MissingInput => "MissingInput",
            Self::NoDetectorData => "NoDetectorData",
            Self::LimitedAcceptance => "LimitedAcceptance",
            Self::BadTracking => "BadTracking",
            Self::BadPid => "BadPID",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlagKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Unknown" => Self::Unknown,
            "WrongType" => Self::WrongType,
            "CheckException" => Self::CheckException,
            "MissingInput" => Self::MissingInput,
            "NoDetectorData" => Self::NoDetectorData,
            "LimitedAcceptance" => Self::LimitedAcceptance,
            "BadTracking" => Self::BadTracking,
            "BadPID" => Self::BadPid,
            other => Self::Custom(other.to_string()),
        })
    }
}

/// A flag attached to a quality: what went wrong, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    /// What went wrong
    pub kind: FlagKind,
    /// Human-readable explanation
    pub reason: String,
}

impl Flag {
    /// Create a flag with its reason.
    pub fn new(kind: FlagKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// How Null takes part in aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullHandling {
    /// Null is the worst possible outcome: any Null input yields Null.
    #[default]
    Worst,
    /// Null inputs are skipped; the result is Null only when nothing was decided.
    Ignore,
}

/// A leveled verdict produced by a Check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quality {
    level: u32,
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    flags: Vec<Flag>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

impl Quality {
    /// Create a quality with an arbitrary level and name.
    pub fn new(level: u32, name: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            flags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// No verdict: the check could not decide.
    pub fn null() -> Self {
        Self::new(NULL_LEVEL, "Null")
    }

    /// The data is fine.
    pub fn good() -> Self {
        Self::new(GOOD_LEVEL, "Good")
    }

    /// The data is usable with caveats.
    pub fn medium() -> Self {
        Self::new(MEDIUM_LEVEL, "Medium")
    }

    /// The data should not be used.
    pub fn bad() -> Self {
        Self::new(BAD_LEVEL, "Bad")
    }

    /// The predefined quality for a level, if any.
    pub fn from_level(level: u32) -> Option<Self> {
        match level {
            NULL_LEVEL => Some(Self::null()),
            GOOD_LEVEL => Some(Self::good()),
            MEDIUM_LEVEL => Some(Self::medium()),
            BAD_LEVEL => Some(Self::bad()),
            _ => None,
        }
    }

    /// The predefined quality with this name, if any.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Null" => Some(Self::null()),
            "Good" => Some(Self::good()),
            "Medium" => Some(Self::medium()),
            "Bad" => Some(Self::bad()),
            _ => None,
        }
    }

    pub const fn level(&self) -> u32 {
        self.level
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn is_null(&self) -> bool {
        self.level == NULL_LEVEL
    }

    /// Replace level and name, keeping accumulated flags and metadata.
    pub fn set(&mut self, other: &Self) {
        self.level = other.level;
        self.name.clone_from(&other.name);
    }

    /// Builder-style variant of [`Quality::add_flag`].
    #[must_use]
    pub fn with_flag(mut self, kind: FlagKind, reason: impl Into<String>) -> Self {
        self.add_flag(kind, reason);
        self
    }

    /// Attach a flag; flags accumulate and are never cleared by [`Quality::set`].
    pub fn add_flag(&mut self, kind: FlagKind, reason: impl Into<String>) -> &mut Self {
        self.flags.push(Flag::new(kind, reason));
        self
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn has_flag(&self, kind: &FlagKind) -> bool {
        self.flags.iter().any(|flag| &flag.kind == kind)
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Rank used for comparisons: lower is better, Null ranks below everything.
    const fn severity(&self) -> u32 {
        if self.level == NULL_LEVEL {
            u32::MAX
        } else {
            self.level
        }
    }

    /// Strict comparison in the Good < Medium < Bad < Null order.
    pub const fn is_better_than(&self, other: &Self) -> bool {
        self.severity() < other.severity()
    }

    /// Strict comparison in the Good < Medium < Bad < Null order.
    pub const fn is_worse_than(&self, other: &Self) -> bool {
        self.severity() > other.severity()
    }

    /// Aggregate a set of qualities: the worst wins and flags are concatenated.
    ///
    /// An empty input, or an input where nothing was decided, yields Null.
    pub fn aggregate<'a, I>(qualities: I, null_handling: NullHandling) -> Self
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut worst: Option<&Self> = None;
        let mut flags = Vec::new();

        for quality in qualities {
            flags.extend(quality.flags.iter().cloned());
            if quality.is_null() && null_handling == NullHandling::Ignore {
                continue;
            }
            match worst {
                Some(current) if !quality.is_worse_than(current) => {}
                _ => worst = Some(quality),
            }
        }

        let mut result = worst.map_or_else(Self::null, |q| Self::new(q.level, q.name.clone()));
        result.flags = flags;
        result
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Quality {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.name == other.name
    }
}

impl Eq for Quality {}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_qualities() {
        assert_eq!(Quality::null().level(), 0);
        assert_eq!(Quality::good().name(), "Good");
        assert_eq!(Quality::from_level(3), Some(Quality::bad()));
        assert_eq!(Quality::from_name("Medium"), Some(Quality::medium()));
        assert!(Quality::from_level(42).is_none());
    }

    #[test]
    fn test_equality_ignores_flags() {
        let flagged = Quality::bad().with_flag(FlagKind::BadTracking, "too few tracks");
        assert_eq!(flagged, Quality::bad());
        assert_ne!(Quality::new(3, "Terrible"), Quality::bad());
    }

    #[test]
    fn test_ordering() {
        assert!(Quality::good().is_better_than(&Quality::medium()));
        assert!(Quality::medium().is_better_than(&Quality::bad()));
        assert!(Quality::bad().is_worse_than(&Quality::good()));
        assert!(Quality::null().is_worse_than(&Quality::bad()));
        assert!(!Quality::good().is_better_than(&Quality::good()));
    }

    #[test]
    fn test_set_keeps_flags() {
        let mut quality = Quality::good();
        quality.add_flag(FlagKind::Unknown, "first pass");
        quality.set(&Quality::bad());
        assert_eq!(quality, Quality::bad());
        assert_eq!(quality.flags().len(), 1);
    }

    #[test]
    fn test_aggregate_worst_wins() {
        let inputs = [
            Quality::good(),
            Quality::bad().with_flag(FlagKind::NoDetectorData, "empty"),
            Quality::medium().with_flag(FlagKind::LimitedAcceptance, "holes"),
        ];
        let result = Quality::aggregate(&inputs, NullHandling::Worst);
        assert_eq!(result, Quality::bad());
        assert_eq!(result.flags().len(), 2);
    }

    #[test]
    fn test_aggregate_null_handling() {
        let inputs = [Quality::good(), Quality::null()];
        assert_eq!(Quality::aggregate(&inputs, NullHandling::Worst), Quality::null());
        assert_eq!(Quality::aggregate(&inputs, NullHandling::Ignore), Quality::good());

        let nulls = [Quality::null(), Quality::null()];
        assert_eq!(Quality::aggregate(&nulls, NullHandling::Ignore), Quality::null());
        assert_eq!(Quality::aggregate(&[] as &[Quality], NullHandling::Worst), Quality::null());
    }

    #[test]
    fn test_flag_kind_round_trip_names() {
        assert_eq!("BadPID".parse::<FlagKind>().unwrap(), FlagKind::BadPid);
        assert_eq!(
            "Saturation".parse::<FlagKind>().unwrap(),
            FlagKind::Custom("Saturation".into())
        );
        assert_eq!(FlagKind::WrongType.to_string(), "WrongType");
    }
}
