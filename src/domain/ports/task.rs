use std::collections::BTreeMap;

use super::services::ServiceRegistry;
use crate::domain::models::{Activity, InputRecord, ObjectsManager, TaskConfig};

/// Typed access to the task's effective configuration
#[derive(Debug, Clone, Copy)]
pub struct TaskOptions<'a> {
    config: &'a TaskConfig,
}

impl<'a> TaskOptions<'a> {
    /// Options of `config`.
    pub const fn new(config: &'a TaskConfig) -> Self {
        Self { config }
    }

    /// The whole task configuration.
    pub const fn config(&self) -> &'a TaskConfig {
        self.config
    }

    /// The free-form `taskParameters`.
    pub const fn parameters(&self) -> &'a BTreeMap<String, String> {
        &self.config.task_parameters
    }

    /// One raw parameter.
    pub fn parameter(&self, key: &str) -> Option<&'a str> {
        self.config.task_parameters.get(key).map(String::as_str)
    }

    /// Parse a parameter, falling back to `default` when absent or malformed.
    pub fn parameter_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.parameter(key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default)
    }
}

/// Handed to [`TaskInterface::initialize`]
pub struct InitContext<'a> {
    /// Registry to publish objects in
    pub objects: &'a mut ObjectsManager,
    /// Shared services
    pub services: &'a ServiceRegistry,
    /// Task configuration
    pub options: TaskOptions<'a>,
}

/// Handed to [`TaskInterface::monitor_data`]
pub struct ProcessingContext<'a> {
    /// The message being processed
    pub inputs: &'a InputRecord,
    /// The task's objects
    pub objects: &'a mut ObjectsManager,
    /// Shared services
    pub services: &'a ServiceRegistry,
    /// Task configuration
    pub options: TaskOptions<'a>,
    /// Current activity
    pub activity: &'a Activity,
}

impl ProcessingContext<'_> {
    pub const fn inputs(&self) -> &InputRecord {
        self.inputs
    }

    pub const fn services(&self) -> &ServiceRegistry {
        self.services
    }

    pub const fn options(&self) -> TaskOptions<'_> {
        self.options
    }
}

/// Contract every monitoring task implements.
///
/// The runner calls these in order `initialize`, then per activity
/// `start_of_activity`, any number of (`start_of_cycle`, `monitor_data`*,
/// `end_of_cycle`), `end_of_activity` and finally `reset`. Calls never
/// overlap. Errors and panics are caught by the runner.
pub trait TaskInterface: Send {
    /// Build objects, register them for publication, attach checks
    fn initialize(&mut self, ctx: InitContext<'_>) -> anyhow::Result<()>;

    /// Reset per-activity state
    fn start_of_activity(&mut self, activity: &Activity, objects: &mut ObjectsManager) -> anyhow::Result<()>;

    /// Reset per-cycle accumulators
    fn start_of_cycle(&mut self, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
        Ok(())
    }

    /// Consume one message and update objects
    fn monitor_data(&mut self, ctx: ProcessingContext<'_>) -> anyhow::Result<()>;

    /// Per-cycle finalization
    fn end_of_cycle(&mut self, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
        Ok(())
    }

    /// Finalization at activity end
    fn end_of_activity(&mut self, _activity: &Activity, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
        Ok(())
    }

    /// Clear all objects to a pristine state
    fn reset(&mut self, objects: &mut ObjectsManager) -> anyhow::Result<()> {
        objects.reset_all();
        Ok(())
    }
}
