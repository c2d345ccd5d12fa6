//! Registry of plugin constructors.
//!
//! Tasks, checks, aggregators and post-processing tasks are created by
//! class name from configuration. Each module registers a constructor per
//! class; the runners only ever see the trait objects.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::QcError;
use crate::domain::ports::{AggregatorInterface, CheckInterface, PostProcessingInterface, TaskInterface};

/// Builds a fresh task instance
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn TaskInterface> + Send + Sync>;
/// Builds a fresh check instance
pub type CheckFactory = Arc<dyn Fn() -> Box<dyn CheckInterface> + Send + Sync>;
/// Builds a fresh aggregator instance
pub type AggregatorFactory = Arc<dyn Fn() -> Box<dyn AggregatorInterface> + Send + Sync>;
/// Builds a fresh postprocessing task instance
pub type PostProcessingFactory = Arc<dyn Fn() -> Box<dyn PostProcessingInterface> + Send + Sync>;

/// Constructors keyed by class name
#[derive(Clone, Default)]
pub struct PluginRegistry {
    tasks: HashMap<String, TaskFactory>,
    checks: HashMap<String, CheckFactory>,
    aggregators: HashMap<String, AggregatorFactory>,
    postprocessing: HashMap<String, PostProcessingFactory>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("tasks", &self.task_classes())
            .field("checks", &self.check_classes())
            .field("aggregators", &sorted(self.aggregators.keys()))
            .field("postprocessing", &sorted(self.postprocessing.keys()))
            .finish()
    }
}

fn sorted<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut keys: Vec<String> = keys.cloned().collect();
    keys.sort();
    keys
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in class
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::modules::register_builtins(&mut registry);
        registry
    }

    /// Register a task class; a later registration under the same name wins.
    pub fn register_task<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn TaskInterface> + Send + Sync + 'static,
    {
        self.tasks.insert(class_name.into(), Arc::new(factory));
    }

    /// Register a check class.
    pub fn register_check<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn CheckInterface> + Send + Sync + 'static,
    {
        self.checks.insert(class_name.into(), Arc::new(factory));
    }

    /// Register an aggregator class.
    pub fn register_aggregator<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn AggregatorInterface> + Send + Sync + 'static,
    {
        self.aggregators.insert(class_name.into(), Arc::new(factory));
    }

    /// Register a postprocessing task class.
    pub fn register_postprocessing<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn PostProcessingInterface> + Send + Sync + 'static,
    {
        self.postprocessing.insert(class_name.into(), Arc::new(factory));
    }

    /// Instantiate a task class, or fail with `UnknownClass`.
    pub fn create_task(&self, class_name: &str) -> Result<Box<dyn TaskInterface>, QcError> {
        self.tasks
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| QcError::PluginNotFound(class_name.to_string()))
    }

    /// Instantiate a check class.
    pub fn create_check(&self, class_name: &str) -> Result<Box<dyn CheckInterface>, QcError> {
        self.checks
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| QcError::PluginNotFound(class_name.to_string()))
    }

    /// Instantiate an aggregator class.
    pub fn create_aggregator(&self, class_name: &str) -> Result<Box<dyn AggregatorInterface>, QcError> {
        self.aggregators
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| QcError::PluginNotFound(class_name.to_string()))
    }

    /// Instantiate a postprocessing task class.
    pub fn create_postprocessing(&self, class_name: &str) -> Result<Box<dyn PostProcessingInterface>, QcError> {
        self.postprocessing
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| QcError::PluginNotFound(class_name.to_string()))
    }

    pub fn has_task(&self, class_name: &str) -> bool {
        self.tasks.contains_key(class_name)
    }

    pub fn has_check(&self, class_name: &str) -> bool {
        self.checks.contains_key(class_name)
    }

    pub fn has_aggregator(&self, class_name: &str) -> bool {
        self.aggregators.contains_key(class_name)
    }

    pub fn has_postprocessing(&self, class_name: &str) -> bool {
        self.postprocessing.contains_key(class_name)
    }

    /// Registered task classes, sorted.
    pub fn task_classes(&self) -> Vec<String> {
        sorted(self.tasks.keys())
    }

    pub fn check_classes(&self) -> Vec<String> {
        sorted(self.checks.keys())
    }

    pub fn aggregator_classes(&self) -> Vec<String> {
        sorted(self.aggregators.keys())
    }

    pub fn postprocessing_classes(&self) -> Vec<String> {
        sorted(self.postprocessing.keys())
    }
}
