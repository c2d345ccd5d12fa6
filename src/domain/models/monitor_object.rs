//! Monitor objects: named payloads with provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::activity::Activity;
use super::cycle::ValidityInterval;
use super::metadata_keys;
use super::payload::Payload;
use super::quality::Quality;

/// A Check attached to a monitor object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckBinding {
    /// Binding name, unique per object
    pub name: String,
    /// Check class, resolved through the plugin registry
    pub class_name: String,
    /// Module providing the class
    pub module_name: String,
}

/// Presentation element added by a Check's beautify step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decoration {
    /// Horizontal or vertical line at a value, e.g. a threshold.
    Line {
        value: f64,
        vertical: bool,
        color: String,
    },
    /// Text box drawn on the object.
    Caption { text: String, color: String },
    /// Fill color hint for the whole object.
    FillColor { color: String },
}

/// A payload produced by a Task, tagged for publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorObject {
    name: String,
    task_name: String,
    detector: String,
    #[serde(default)]
    activity: Activity,
    payload: Payload,
    #[serde(default = "default_owner")]
    is_owner: bool,
    #[serde(default)]
    checks: Vec<CheckBinding>,
    #[serde(default)]
    check_qualities: BTreeMap<String, Quality>,
    #[serde(default)]
    decorations: BTreeMap<String, Decoration>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    cycle_number: u64,
    #[serde(default)]
    validity: Option<ValidityInterval>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

const fn default_owner() -> bool {
    true
}

impl MonitorObject {
    /// Wrap a payload produced by `task_name`; the object owns its payload.
    pub fn new(payload: Payload, task_name: impl Into<String>, detector: impl Into<String>) -> Self {
        Self {
            name: payload.name().to_string(),
            task_name: task_name.into(),
            detector: detector.into(),
            activity: Activity::default(),
            payload,
            is_owner: true,
            checks: Vec::new(),
            check_qualities: BTreeMap::new(),
            decorations: BTreeMap::new(),
            metadata: BTreeMap::new(),
            cycle_number: 0,
            validity: None,
            created_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// Folder the object is stored in: `<detector>/MO/<task>`.
    pub fn path(&self) -> String {
        format!("{}/MO/{}", self.detector, self.task_name)
    }

    /// Full storage key: `<detector>/MO/<task>/<name>`.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path(), self.name)
    }

    /// Cache key used by runners: `<task>/<name>`.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.task_name, self.name)
    }

    pub const fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Replace the activity the object belongs to.
    pub fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }

    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Whether the object owns its payload; unowned payloads are handed back on removal.
    pub const fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn set_is_owner(&mut self, is_owner: bool) {
        self.is_owner = is_owner;
    }

    pub fn checks(&self) -> &[CheckBinding] {
        &self.checks
    }

    /// Attach a check; returns false if a binding with the same name exists.
    pub fn add_check(&mut self, binding: CheckBinding) -> bool {
        if self.checks.iter().any(|existing| existing.name == binding.name) {
            return false;
        }
        self.checks.push(binding);
        true
    }

    /// Most recent verdict of each check that evaluated this object.
    pub fn check_qualities(&self) -> &BTreeMap<String, Quality> {
        &self.check_qualities
    }

    /// Record the latest verdict of `check` on this object.
    pub fn set_check_quality(&mut self, check: impl Into<String>, quality: Quality) {
        self.check_qualities.insert(check.into(), quality);
    }

    pub fn decorations(&self) -> &BTreeMap<String, Decoration> {
        &self.decorations
    }

    /// Set a keyed decoration. Setting the same key twice replaces it, which
    /// keeps beautification idempotent.
    pub fn decorate(&mut self, key: impl Into<String>, decoration: Decoration) {
        self.decorations.insert(key.into(), decoration);
    }

    pub fn clear_decorations(&mut self) {
        self.decorations.clear();
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

    /// Default draw options, if a task set them.
    pub fn draw_options(&self) -> Option<&str> {
        self.get_metadata(metadata_keys::DRAW_OPTIONS)
    }

    pub fn display_hints(&self) -> Option<&str> {
        self.get_metadata(metadata_keys::DISPLAY_HINTS)
    }

    pub const fn cycle_number(&self) -> u64 {
        self.cycle_number
    }

    /// Validity interval, set at publication.
    pub const fn validity(&self) -> Option<ValidityInterval> {
        self.validity
    }

    /// Creation time, set at publication.
    pub const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Stamp provenance for publication: activity, cycle, validity and the
    /// standard metadata tags.
    pub fn stamp(
        &mut self,
        activity: &Activity,
        cycle_number: u64,
        validity: ValidityInterval,
        created_at: DateTime<Utc>,
    ) {
        self.activity = activity.clone();
        self.cycle_number = cycle_number;
        self.validity = Some(validity);
        self.created_at = Some(created_at);

        self.add_metadata(metadata_keys::RUN_NUMBER, activity.number.to_string());
        self.add_metadata(metadata_keys::RUN_TYPE, activity.run_type.clone());
        self.add_metadata(metadata_keys::PERIOD_NAME, activity.period_name.clone());
        self.add_metadata(metadata_keys::PASS_NAME, activity.pass_name.clone());
        self.add_metadata(metadata_keys::PROVENANCE, activity.provenance.clone());
        self.add_metadata(metadata_keys::TASK_NAME, self.task_name.clone());
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
    use crate::domain::models::histogram::Histogram1D;

    fn mo() -> MonitorObject {
        MonitorObject::new(Histogram1D::new("h1", 10, 0.0, 1.0).into(), "Task", "TST")
    }

    #[test]
    fn test_paths() {
        let mo = mo();
        assert_eq!(mo.path(), "TST/MO/Task");
        assert_eq!(mo.full_path(), "TST/MO/Task/h1");
        assert_eq!(mo.cache_key(), "Task/h1");
    }

    #[test]
    fn test_unique_check_bindings() {
        let mut mo = mo();
        let binding = CheckBinding {
            name: "MeanCheck".into(),
            class_name: "MeanThresholdCheck".into(),
            module_name: "builtin".into(),
        };
        assert!(mo.add_check(binding.clone()));
        assert!(!mo.add_check(binding));
        assert_eq!(mo.checks().len(), 1);
    }

    #[test]
    fn test_decorate_is_idempotent() {
        let mut once = mo();
        let line = Decoration::Line {
            value: 0.5,
            vertical: false,
            color: "red".into(),
        };
        once.decorate("threshold", line.clone());
        let mut twice = once.clone();
        twice.decorate("threshold", line);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_stamp_sets_metadata() {
        let mut mo = mo();
        let now = Utc::now();
        mo.stamp(&Activity::new(1, "PHYSICS"), 3, ValidityInterval::instant(now), now);

        assert_eq!(mo.get_metadata(metadata_keys::RUN_NUMBER), Some("1"));
        assert_eq!(mo.get_metadata(metadata_keys::CYCLE_NUMBER), Some("3"));
        assert_eq!(mo.get_metadata(metadata_keys::TASK_NAME), Some("Task"));
        assert_eq!(mo.cycle_number(), 3);
        assert_eq!(mo.activity().run_type, "PHYSICS");
    }
}
