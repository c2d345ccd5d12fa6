use async_trait::async_trait;

use super::services::ServiceRegistry;
use crate::domain::models::{Activity, ObjectsManager, PostProcessingConfig, QualityObject, Trigger};

/// What a post-processing task works with: services to read inputs, and
/// its own objects to publish.
#[derive(Debug)]
pub struct PostProcessingContext {
    /// Object store and clock
    pub services: ServiceRegistry,
    /// Objects the task publishes after each callback
    pub objects: ObjectsManager,
    /// Quality objects to store after the callback; drained by the runner
    pub qualities: Vec<QualityObject>,
    /// Activity the task runs for
    pub activity: Activity,
}

impl PostProcessingContext {
    /// Context with no pending quality objects.
    pub fn new(services: ServiceRegistry, objects: ObjectsManager, activity: Activity) -> Self {
        Self {
            services,
            objects,
            qualities: Vec::new(),
            activity,
        }
    }
}

/// Contract of a trigger-driven post-processing task.
///
/// Callbacks for one instance are invoked sequentially, in trigger order.
#[async_trait]
pub trait PostProcessingInterface: Send {
    /// Read the task's customization
    fn configure(&mut self, name: &str, config: &PostProcessingConfig) -> anyhow::Result<()>;

    /// Prepare outputs; runs once, on the init trigger
    async fn initialize(&mut self, trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()>;

    /// Produce or refresh output objects from database inputs
    async fn update(&mut self, trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()>;

    /// Final update and cleanup, on the stop trigger
    async fn finalize(&mut self, trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()>;
}
