//! Quality objects: the published result of a Check or an Aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::activity::Activity;
use super::cycle::ValidityInterval;
use super::metadata_keys;
use super::quality::Quality;

/// Verdict of a Check over one or more monitor objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityObject {
    quality: Quality,
    check_name: String,
    detector: String,
    #[serde(default)]
    policy_name: String,
    #[serde(default)]
    input_mos: Vec<String>,
    /// Representative input, set when the QO judges a single object.
    #[serde(default)]
    monitor_object_name: Option<String>,
    #[serde(default)]
    activity: Activity,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    cycle_number: u64,
    #[serde(default)]
    validity: Option<ValidityInterval>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl QualityObject {
    /// Unstamped result of `check_name`, computed from `input_mos` under `policy_name`.
    pub fn new(
        quality: Quality,
        check_name: impl Into<String>,
        detector: impl Into<String>,
        policy_name: impl Into<String>,
        input_mos: Vec<String>,
    ) -> Self {
        Self {
            quality,
            check_name: check_name.into(),
            detector: detector.into(),
            policy_name: policy_name.into(),
            input_mos,
            monitor_object_name: None,
            activity: Activity::default(),
            metadata: BTreeMap::new(),
            cycle_number: 0,
            validity: None,
            created_at: None,
        }
    }

    /// Name the result after the single object it judges.
    #[must_use]
    pub fn with_monitor_object(mut self, name: impl Into<String>) -> Self {
        self.monitor_object_name = Some(name.into());
        self
    }

    pub const fn quality(&self) -> &Quality {
        &self.quality
    }

    pub fn set_quality(&mut self, quality: Quality) {
        self.quality = quality;
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    pub fn detector(&self) -> &str {
        &self.detector
    }

    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// Inputs the verdict was computed from, as `<task>/<object>`.
    pub fn input_mos(&self) -> &[String] {
        &self.input_mos
    }

    pub fn monitor_object_name(&self) -> Option<&str> {
        self.monitor_object_name.as_deref()
    }

    /// Folder the object is stored in: `<detector>/QO/<check>`.
    pub fn path(&self) -> String {
        format!("{}/QO/{}", self.detector, self.check_name)
    }

    /// Name within the folder: the representative object, or the check itself.
    pub fn name(&self) -> &str {
        self.monitor_object_name
            .as_deref()
            .unwrap_or(&self.check_name)
    }

    /// Full storage key: `<detector>/QO/<check>/<name>`.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path(), self.name())
    }

    pub const fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Cycle of the inputs the verdict was computed from.
    pub const fn cycle_number(&self) -> u64 {
        self.cycle_number
    }

    pub const fn validity(&self) -> Option<ValidityInterval> {
        self.validity
    }

    pub const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Stamp provenance for publication.
    pub fn stamp(
        &mut self,
        activity: &Activity,
        cycle_number: u64,
        validity: Option<ValidityInterval>,
        created_at: DateTime<Utc>,
    ) {
        self.activity = activity.clone();
        self.cycle_number = cycle_number;
        self.validity = validity;
        self.created_at = Some(created_at);

        self.add_metadata(metadata_keys::RUN_NUMBER, activity.number.to_string());
        self.add_metadata(metadata_keys::RUN_TYPE, activity.run_type.clone());
        self.add_metadata(metadata_keys::PERIOD_NAME, activity.period_name.clone());
        self.add_metadata(metadata_keys::PASS_NAME, activity.pass_name.clone());
        self.add_metadata(metadata_keys::PROVENANCE, activity.provenance.clone());
        self.add_metadata(metadata_keys::CHECK_NAME, self.check_name.clone());
        self.add_metadata(metadata_keys::QUALITY, self.quality.name().to_string());
        self.add_metadata(metadata_keys::CYCLE_NUMBER, cycle_number.to_string());
        self.add_metadata(
            metadata_keys::OBJECT_CREATION_TIME,
            created_at.timestamp_millis().to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_uses_representative_object() {
        let qo = QualityObject::new(Quality::good(), "MeanCheck", "TST", "OnAny", vec!["h1".into()]);
        assert_eq!(qo.full_path(), "TST/QO/MeanCheck/MeanCheck");

        let qo = qo.with_monitor_object("h1");
        assert_eq!(qo.path(), "TST/QO/MeanCheck");
        assert_eq!(qo.name(), "h1");
    }

    #[test]
    fn test_stamp_records_quality() {
        let mut qo = QualityObject::new(Quality::bad(), "C", "TST", "OnAll", vec![]);
        qo.stamp(&Activity::new(5, "PHYSICS"), 2, None, Utc::now());
        assert_eq!(qo.get_metadata(metadata_keys::QUALITY), Some("Bad"));
        assert_eq!(qo.get_metadata(metadata_keys::CYCLE_NUMBER), Some("2"));
        assert_eq!(qo.get_metadata(metadata_keys::CHECK_NAME), Some("C"));
    }
}
