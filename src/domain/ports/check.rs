use std::collections::BTreeMap;

use crate::domain::models::{Activity, MonitorObject, PayloadKind, Quality};

/// Contract of a Check: a deterministic verdict over monitor objects.
pub trait CheckInterface: Send + Sync {
    /// Read parameters and load immutable reference data
    fn configure(&mut self, parameters: &BTreeMap<String, String>) -> anyhow::Result<()>;

    /// Judge the objects, keyed by object name
    fn check(&self, objects: &BTreeMap<String, MonitorObject>) -> anyhow::Result<Quality>;

    /// Annotate an object according to the verdict.
    ///
    /// Must be idempotent; decorations are keyed, so setting the same key
    /// again replaces the previous value.
    fn beautify(&self, _object: &mut MonitorObject, _quality: &Quality) -> anyhow::Result<()> {
        Ok(())
    }

    /// Payload kind this check knows how to judge
    fn accepted_type(&self) -> PayloadKind;

    fn start_of_activity(&mut self, _activity: &Activity) {}

    fn end_of_activity(&mut self, _activity: &Activity) {}
}
