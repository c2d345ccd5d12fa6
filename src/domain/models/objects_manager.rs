//! Per-task registry of monitor objects.
//!
//! The ObjectsManager owns every object a task publishes. Tasks create
//! payloads, hand them over with [`ObjectsManager::start_publishing`] and
//! afterwards reach them by name. Runners take snapshots at cycle end.

use std::collections::BTreeMap;

use super::activity::Activity;
use super::config::PublicationPolicy;
use super::histogram::{Histogram1D, Histogram2D};
use super::metadata_keys;
use super::monitor_object::{CheckBinding, MonitorObject};
use super::payload::{Mergeable, Payload, PayloadKind};
use crate::domain::errors::QcError;

#[derive(Debug, Clone)]
struct Entry {
    object: MonitorObject,
    policy: PublicationPolicy,
}

/// Objects a task publishes, keyed by name, with their publication policies.
#[derive(Debug, Clone)]
pub struct ObjectsManager {
    task_name: String,
    detector: String,
    activity: Activity,
    objects: BTreeMap<String, Entry>,
}

impl ObjectsManager {
    /// Empty registry for `task_name` of `detector`.
    pub fn new(task_name: impl Into<String>, detector: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            detector: detector.into(),
            activity: Activity::default(),
            objects: BTreeMap::new(),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// Activity stamped on every object at publication.
    pub const fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Register a payload for publication under its name.
    pub fn start_publishing(
        &mut self,
        payload: impl Into<Payload>,
        policy: PublicationPolicy,
    ) -> Result<&mut MonitorObject, QcError> {
        let payload = payload.into();
        let name = payload.name().to_string();
        if name.is_empty() {
            return Err(QcError::Configuration(format!(
                "task '{}' tried to publish an object without a name",
                self.task_name
            )));
        }
        if self.objects.contains_key(&name) {
            return Err(QcError::DuplicateObjectName(name));
        }

        let mut object = MonitorObject::new(payload, self.task_name.clone(), self.detector.clone());
        object.set_activity(self.activity.clone());
        tracing::debug!(task = %self.task_name, object = %name, ?policy, "started publishing");

        let entry = self
            .objects
            .entry(name)
            .or_insert(Entry { object, policy });
        Ok(&mut entry.object)
    }

    /// Remove an object from publication.
    ///
    /// If the object does not own its payload, the payload is handed back.
    pub fn stop_publishing(&mut self, name: &str) -> Result<Option<Payload>, QcError> {
        let entry = self
            .objects
            .remove(name)
            .ok_or_else(|| QcError::ObjectNotFound(name.to_string()))?;
        tracing::debug!(task = %self.task_name, object = %name, "stopped publishing");
        if entry.object.is_owner() {
            Ok(None)
        } else {
            Ok(Some(entry.object.into_payload()))
        }
    }

    /// Remove every object from publication.
    pub fn stop_publishing_all(&mut self) {
        self.objects.clear();
    }

    /// Whether an object of this name is registered.
    pub fn is_being_published(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn policy(&self, name: &str) -> Option<PublicationPolicy> {
        self.objects.get(name).map(|entry| entry.policy)
    }

    pub fn get_monitor_object(&self, name: &str) -> Option<&MonitorObject> {
        self.objects.get(name).map(|entry| &entry.object)
    }

    pub fn get_monitor_object_mut(&mut self, name: &str) -> Option<&mut MonitorObject> {
        self.objects.get_mut(name).map(|entry| &mut entry.object)
    }

    fn object_mut(&mut self, name: &str) -> Result<&mut MonitorObject, QcError> {
        self.get_monitor_object_mut(name)
            .ok_or_else(|| QcError::ObjectNotFound(name.to_string()))
    }

    /// Mutable payload of a published object.
    pub fn payload_mut(&mut self, name: &str) -> Result<&mut Payload, QcError> {
        self.object_mut(name).map(MonitorObject::payload_mut)
    }

    /// Mutable 1D histogram, or `WrongType` if the payload is something else.
    pub fn histogram1d_mut(&mut self, name: &str) -> Result<&mut Histogram1D, QcError> {
        let payload = self.payload_mut(name)?;
        let found = payload.kind();
        payload
            .as_histogram1d_mut()
            .ok_or_else(|| wrong_type(name, PayloadKind::Histogram1D, found))
    }

    /// Mutable 2D histogram, or `WrongType` if the payload is something else.
    pub fn histogram2d_mut(&mut self, name: &str) -> Result<&mut Histogram2D, QcError> {
        let payload = self.payload_mut(name)?;
        let found = payload.kind();
        payload
            .as_histogram2d_mut()
            .ok_or_else(|| wrong_type(name, PayloadKind::Histogram2D, found))
    }

    /// Attach a Check binding to an object. Binding names are unique per object.
    pub fn add_check(
        &mut self,
        name: &str,
        check_name: &str,
        class_name: &str,
        module_name: &str,
    ) -> Result<(), QcError> {
        let object = self.object_mut(name)?;
        let added = object.add_check(CheckBinding {
            name: check_name.to_string(),
            class_name: class_name.to_string(),
            module_name: module_name.to_string(),
        });
        if added {
            Ok(())
        } else {
            Err(QcError::DuplicateCheckBinding {
                object: name.to_string(),
                check: check_name.to_string(),
            })
        }
    }

    /// Draw options passed on to whatever renders the object.
    pub fn set_default_draw_options(&mut self, name: &str, options: &str) -> Result<(), QcError> {
        self.add_metadata(name, metadata_keys::DRAW_OPTIONS, options)
    }

    pub fn set_display_hint(&mut self, name: &str, hints: &str) -> Result<(), QcError> {
        self.add_metadata(name, metadata_keys::DISPLAY_HINTS, hints)
    }

    /// Add a metadata entry to a published object.
    pub fn add_metadata(&mut self, name: &str, key: &str, value: &str) -> Result<(), QcError> {
        self.object_mut(name)?.add_metadata(key, value);
        Ok(())
    }

    /// Propagate a new activity to the manager and all of its objects.
    pub fn set_activity(&mut self, activity: &Activity) {
        self.activity = activity.clone();
        for entry in self.objects.values_mut() {
            entry.object.set_activity(activity.clone());
        }
    }

    /// Published objects, ordered by name.
    pub fn monitor_objects(&self) -> impl Iterator<Item = &MonitorObject> {
        self.objects.values().map(|entry| &entry.object)
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Reset every payload to its empty state.
    pub fn reset_all(&mut self) {
        for entry in self.objects.values_mut() {
            entry.object.payload_mut().reset();
        }
    }

    /// Independent copies of every object, for publication.
    pub fn snapshot(&self) -> Vec<MonitorObject> {
        self.monitor_objects().cloned().collect()
    }

    /// Drop objects that were registered for a single publication.
    pub fn after_publication(&mut self) {
        self.objects
            .retain(|_, entry| entry.policy != PublicationPolicy::Once);
    }

    /// Drop objects that were registered until the end of the activity.
    pub fn after_activity(&mut self) {
        self.objects.retain(|_, entry| {
            !matches!(
                entry.policy,
                PublicationPolicy::Once | PublicationPolicy::ThroughStop
            )
        });
    }
}

fn wrong_type(name: &str, expected: PayloadKind, found: PayloadKind) -> QcError {
    QcError::WrongType {
        object: name.to_string(),
        expected: expected.description().to_string(),
        found: found.description().to_string(),
    }
}
