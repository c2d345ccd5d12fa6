//! Post-processing runner: drives one trigger-based task.
//!
//! ```text
//! Created --init trigger--> Running --update trigger--> Running
//! Running --stop trigger--> Finished
//! ```
//!
//! Callbacks are awaited one at a time, in trigger order. Objects left in
//! the task's objects manager and quality objects pushed to the context are
//! published after every update and at finalization, stamped with the
//! trigger's timestamp.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::guard::{guarded, guarded_async};
use super::triggers::TriggerSet;
use crate::domain::errors::QcError;
use crate::domain::models::{
    Activity, ObjectsManager, PostProcessingConfig, Trigger, TriggerType, ValidityInterval,
};
use crate::domain::ports::{PostProcessingContext, PostProcessingInterface, ServiceRegistry};

/// Lifecycle of a postprocessing runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PostProcessingState {
    Created,
    Running,
    Finished,
}

impl PostProcessingState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Finished => "Finished",
        }
    }
}

impl fmt::Display for PostProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PostProcessingCounters {
    /// Successful update callbacks
    pub updates: u64,
    /// Callbacks that returned an error
    pub update_failures: u64,
    /// Objects written to the store
    pub objects_published: u64,
    /// Objects the store refused
    pub publication_failures: u64,
}

/// Drives one postprocessing task through its init, update and stop triggers
pub struct PostProcessingRunner {
    name: String,
    task: Box<dyn PostProcessingInterface>,
    ctx: PostProcessingContext,
    state: PostProcessingState,
    init_triggers: TriggerSet,
    update_triggers: TriggerSet,
    stop_triggers: TriggerSet,
    counters: PostProcessingCounters,
}

impl PostProcessingRunner {
    /// Parse the triggers and configure the task.
    ///
    /// Init triggers are armed now; update and stop triggers when the task
    /// is initialized.
    pub fn new(
        name: impl Into<String>,
        config: &PostProcessingConfig,
        mut task: Box<dyn PostProcessingInterface>,
        services: ServiceRegistry,
        activity: Activity,
    ) -> Result<Self, QcError> {
        let name = name.into();
        let now = services.clock().now();
        let init_triggers = TriggerSet::parse(&config.init_trigger, now)?;
        let update_triggers = TriggerSet::parse(&config.update_trigger, now)?;
        let stop_triggers = TriggerSet::parse(&config.stop_trigger, now)?;
        if init_triggers.is_empty() {
            return Err(QcError::Configuration(format!(
                "post-processing task '{name}' has no init trigger"
            )));
        }

        guarded(|| task.configure(&name, config)).map_err(|err| {
            QcError::Configuration(format!("post-processing task '{name}' failed to configure: {err:#}"))
        })?;

        let objects = ObjectsManager::new(name.clone(), config.detector_name.clone());
        Ok(Self {
            ctx: PostProcessingContext::new(services, objects, activity),
            name,
            task,
            state: PostProcessingState::Created,
            init_triggers,
            update_triggers,
            stop_triggers,
            counters: PostProcessingCounters::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state.
    pub const fn state(&self) -> PostProcessingState {
        self.state
    }

    /// Snapshot of the counters.
    pub const fn counters(&self) -> PostProcessingCounters {
        self.counters
    }

    pub const fn objects(&self) -> &ObjectsManager {
        &self.ctx.objects
    }

    pub const fn activity(&self) -> &Activity {
        &self.ctx.activity
    }

    /// Forward a run or fill event to every trigger
    pub fn notify(&mut self, event: TriggerType, activity: &Activity) {
        if event == TriggerType::StartOfRun {
            self.ctx.activity = activity.clone();
            self.ctx.objects.set_activity(activity);
        }
        let now = self.ctx.services.clock().now();
        self.init_triggers.notify(event, now, activity);
        self.update_triggers.notify(event, now, activity);
        self.stop_triggers.notify(event, now, activity);
    }

    /// Poll the triggers once and run whatever fired.
    ///
    /// Returns false once the task has finished.
    pub async fn run_once(&mut self) -> Result<bool, QcError> {
        let now = self.ctx.services.clock().now();
        let database = self.ctx.services.database().clone();

        if self.state == PostProcessingState::Created {
            let trigger = self.init_triggers.poll(now, &self.ctx.activity, database.as_ref()).await;
            if trigger.fired() {
                self.initialize(&trigger).await?;
            }
        }

        if self.state == PostProcessingState::Running {
            let trigger = self.update_triggers.poll(now, &self.ctx.activity, database.as_ref()).await;
            if trigger.fired() {
                self.update(&trigger).await;
            }
            let trigger = self.stop_triggers.poll(now, &self.ctx.activity, database.as_ref()).await;
            if trigger.fired() {
                self.finalize(&trigger).await;
            }
        }

        Ok(self.state != PostProcessingState::Finished)
    }

    /// Initialize on a user or control signal, if an init trigger listens to it
    pub async fn start(&mut self) -> Result<bool, QcError> {
        let activity = self.ctx.activity.clone();
        self.notify(TriggerType::UserOrControl, &activity);
        self.run_once().await
    }

    /// Finalize now, on a user or control signal
    pub async fn stop(&mut self) {
        if self.state == PostProcessingState::Running {
            let now = self.ctx.services.clock().now();
            let trigger = Trigger::new(TriggerType::UserOrControl, now, self.ctx.activity.clone()).last();
            self.finalize(&trigger).await;
        }
    }

    /// Replay the task over explicit timestamps: the first initializes, the
    /// ones in between update and the last finalizes.
    pub async fn run_over_timestamps(&mut self, timestamps: &[DateTime<Utc>]) -> Result<(), QcError> {
        let [first, middle @ .., last] = timestamps else {
            return Err(QcError::PostProcessing {
                task: self.name.clone(),
                reason: format!("at least 2 timestamps are needed, got {}", timestamps.len()),
            });
        };
        if self.state != PostProcessingState::Created {
            return Err(QcError::InvalidStateTransition {
                state: self.state.to_string(),
                action: "replay timestamps",
            });
        }

        let activity = self.ctx.activity.clone();
        self.initialize(&Trigger::new(TriggerType::UserOrControl, *first, activity.clone()))
            .await?;
        for timestamp in middle {
            self.update(&Trigger::new(TriggerType::UserOrControl, *timestamp, activity.clone()))
                .await;
        }
        self.finalize(&Trigger::new(TriggerType::UserOrControl, *last, activity).last())
            .await;
        Ok(())
    }

    /// Poll at `cadence` until the task finishes or `cancelled` is raised;
    /// a cancelled task is finalized.
    pub async fn run(&mut self, cadence: Duration, cancelled: Arc<AtomicBool>) -> Result<PostProcessingCounters, QcError> {
        let mut ticker = tokio::time::interval(cadence.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(task = %self.name, cadence_ms = cadence.as_millis() as u64, "post-processing loop started");

        loop {
            ticker.tick().await;
            if cancelled.load(Ordering::SeqCst) {
                self.stop().await;
                break;
            }
            if !self.run_once().await? {
                break;
            }
        }

        info!(task = %self.name, updates = self.counters.updates, "post-processing loop finished");
        Ok(self.counters)
    }

    async fn initialize(&mut self, trigger: &Trigger) -> Result<(), QcError> {
        info!(task = %self.name, %trigger, "initializing");
        self.ctx.activity = if trigger.activity.specificity() > 0 {
            trigger.activity.clone()
        } else {
            self.ctx.activity.clone()
        };
        let activity = self.ctx.activity.clone();
        self.ctx.objects.set_activity(&activity);

        guarded_async(self.task.initialize(trigger, &mut self.ctx))
            .await
            .map_err(|err| {
                error!(task = %self.name, error = %err, "initialization failed");
                QcError::PostProcessing {
                    task: self.name.clone(),
                    reason: format!("{err:#}"),
                }
            })?;

        self.update_triggers.rearm(trigger.timestamp);
        self.stop_triggers.rearm(trigger.timestamp);
        self.state = PostProcessingState::Running;
        Ok(())
    }

    async fn update(&mut self, trigger: &Trigger) {
        debug!(task = %self.name, %trigger, "updating");
        match guarded_async(self.task.update(trigger, &mut self.ctx)).await {
            Ok(()) => {
                self.counters.updates += 1;
                self.publish(trigger).await;
            }
            Err(err) => {
                self.counters.update_failures += 1;
                warn!(task = %self.name, error = %err, "update failed");
            }
        }
    }

    async fn finalize(&mut self, trigger: &Trigger) {
        info!(task = %self.name, %trigger, "finalizing");
        match guarded_async(self.task.finalize(trigger, &mut self.ctx)).await {
            Ok(()) => self.publish(trigger).await,
            Err(err) => {
                self.counters.update_failures += 1;
                warn!(task = %self.name, error = %err, "finalize failed");
            }
        }
        self.state = PostProcessingState::Finished;
    }

    async fn publish(&mut self, trigger: &Trigger) {
        let database = self.ctx.services.database().clone();
        let cycle = self.counters.updates;
        let validity = ValidityInterval::instant(trigger.timestamp);

        for object in self.ctx.objects.monitor_objects() {
            let mut object = object.clone();
            object.stamp(&self.ctx.activity, cycle, validity, trigger.timestamp);
            match database.store_mo(&object).await {
                Ok(()) => self.counters.objects_published += 1,
                Err(err) => {
                    self.counters.publication_failures += 1;
                    error!(task = %self.name, object = %object.full_path(), error = %err, "failed to store object");
                }
            }
        }
        for mut qo in std::mem::take(&mut self.ctx.qualities) {
            qo.stamp(&self.ctx.activity, cycle, Some(validity), trigger.timestamp);
            match database.store_qo(&qo).await {
                Ok(()) => self.counters.objects_published += 1,
                Err(err) => {
                    self.counters.publication_failures += 1;
                    error!(task = %self.name, object = %qo.full_path(), error = %err, "failed to store quality");
                }
            }
        }
        self.ctx.objects.after_publication();
    }
}

impl fmt::Debug for PostProcessingRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessingRunner")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Graph, PublicationPolicy, Quality, QualityObject};
    use crate::domain::ports::{Clock, Database};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::database::InMemoryDatabase;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    #[derive(Default)]
    struct Counting {
        fail_updates: bool,
    }

    #[async_trait]
    impl PostProcessingInterface for Counting {
        fn configure(&mut self, _name: &str, config: &PostProcessingConfig) -> anyhow::Result<()> {
            self.fail_updates = config.customization["fail"].as_bool().unwrap_or(false);
            Ok(())
        }

        async fn initialize(&mut self, _trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()> {
            ctx.objects.start_publishing(Graph::new("points"), PublicationPolicy::Forever)?;
            Ok(())
        }

        async fn update(&mut self, trigger: &Trigger, ctx: &mut PostProcessingContext) -> anyhow::Result<()> {
            if self.fail_updates {
                anyhow::bail!("no input");
            }
            let x = trigger.timestamp.timestamp() as f64;
            ctx.objects
                .payload_mut("points")?
                .as_graph_mut()
                .ok_or_else(|| anyhow::anyhow!("not a graph"))?
                .add_point(x, 1.0);
            ctx.qualities.push(QualityObject::new(Quality::good(), "Counting", "TST", "", vec![]));
            Ok(())
        }

        async fn finalize(&mut self, _trigger: &Trigger, _ctx: &mut PostProcessingContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn config(init: &[&str], update: &[&str], stop: &[&str]) -> PostProcessingConfig {
        let mut config = PostProcessingConfig::new("Counting", "TST");
        config.init_trigger = init.iter().map(ToString::to_string).collect();
        config.update_trigger = update.iter().map(ToString::to_string).collect();
        config.stop_trigger = stop.iter().map(ToString::to_string).collect();
        config
    }

    fn runner(config: &PostProcessingConfig) -> (PostProcessingRunner, Arc<ManualClock>, Arc<InMemoryDatabase>) {
        let clock = Arc::new(ManualClock::default());
        let database = Arc::new(InMemoryDatabase::new());
        let services = ServiceRegistry::new(database.clone(), clock.clone());
        let runner = PostProcessingRunner::new(
            "Counting",
            config,
            Box::new(Counting::default()),
            services,
            Activity::new(7, "PHYSICS"),
        )
        .unwrap();
        (runner, clock, database)
    }

    #[tokio::test]
    async fn test_periodic_updates_and_publication() {
        let (mut runner, clock, database) = runner(&config(&["once"], &["periodic:2"], &[]));

        for _ in 0..3 {
            assert!(runner.run_once().await.unwrap());
            clock.advance(ChronoDuration::seconds(1));
            assert!(runner.run_once().await.unwrap());
            clock.advance(ChronoDuration::seconds(1));
        }

        assert_eq!(runner.state(), PostProcessingState::Running);
        assert_eq!(runner.counters().updates, 3);
        let graph = database
            .retrieve_mo("TST/MO/Counting", "points", None, &Activity::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(graph.payload().as_graph().unwrap().len(), 3);
        assert_eq!(graph.activity().number, 7);
        assert!(database
            .retrieve_qo("TST/QO/Counting", "Counting", None, &Activity::any())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_user_control_start_and_stop() {
        let (mut runner, _, _) = runner(&config(&["userorcontrol"], &["always"], &[]));
        assert!(runner.run_once().await.unwrap());
        assert_eq!(runner.state(), PostProcessingState::Created);

        runner.start().await.unwrap();
        assert_eq!(runner.state(), PostProcessingState::Running);
        assert_eq!(runner.counters().updates, 1);

        runner.stop().await;
        assert_eq!(runner.state(), PostProcessingState::Finished);
        assert!(!runner.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_trigger_finishes() {
        let (mut runner, _, _) = runner(&config(&["once"], &["always"], &["eor"]));
        assert!(runner.run_once().await.unwrap());
        runner.notify(TriggerType::EndOfRun, &Activity::new(7, "PHYSICS"));
        assert!(!runner.run_once().await.unwrap());
        assert_eq!(runner.state(), PostProcessingState::Finished);
    }

    #[tokio::test]
    async fn test_update_failures_are_counted() {
        let mut failing = config(&["once"], &["always"], &[]);
        failing.customization = serde_json::json!({ "fail": true });
        let (mut runner, _, database) = runner(&failing);

        runner.run_once().await.unwrap();
        runner.run_once().await.unwrap();
        assert_eq!(runner.counters().update_failures, 2);
        assert_eq!(runner.state(), PostProcessingState::Running);
        assert!(database.list_objects("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_over_timestamps() {
        let (mut runner, clock, database) = runner(&config(&["userorcontrol"], &[], &[]));
        let start = clock.now();
        let timestamps: Vec<_> = (0..4).map(|i| start + ChronoDuration::seconds(i * 10)).collect();
        runner.run_over_timestamps(&timestamps).await.unwrap();

        assert_eq!(runner.state(), PostProcessingState::Finished);
        assert_eq!(runner.counters().updates, 2);
        let versions = database.list_versions("TST/MO/Counting", "points").await.unwrap();
        // two updates and the finalization
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].timestamp, timestamps[3]);

        assert!(runner.run_over_timestamps(&timestamps).await.is_err());
    }

    #[test]
    fn test_missing_init_trigger_rejected() {
        let clock = Arc::new(ManualClock::default());
        let services = ServiceRegistry::new(Arc::new(InMemoryDatabase::new()), clock);
        let result = PostProcessingRunner::new(
            "Counting",
            &config(&[], &["always"], &[]),
            Box::new(Counting::default()),
            services,
            Activity::default(),
        );
        assert!(matches!(result, Err(QcError::Configuration(_))));
    }
}
