//! Task runner: drives one task instance through its cycle state machine.
//!
//! ```text
//! Uninitialized --initialize--> Idle
//! Idle --start_of_activity--> InActivity
//! InActivity --start_cycle--> InCycle
//! InCycle --monitor_data--> InCycle
//! InCycle --end_cycle--> InActivity (publish)
//! InActivity --end_of_activity--> Idle
//! ```
//!
//! Task callbacks are synchronous and never overlap. Errors and panics
//! raised by the task are caught, logged and counted; only `initialize`
//! and `start_of_activity` failures are fatal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::guard::guarded;
use crate::domain::errors::QcError;
use crate::domain::models::{
    metadata_keys, Activity, CycleInfo, InputRecord, ObjectsManager, TaskConfig, TaskInput,
    ValidityInterval,
};
use crate::domain::ports::{
    InitContext, MonitorObjectSink, ProcessingContext, PublishedCycle, ServiceRegistry,
    TaskInterface, TaskOptions,
};

/// Where a task runner is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskRunnerState {
    Uninitialized,
    Idle,
    InActivity,
    InCycle,
}

impl TaskRunnerState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Idle => "Idle",
            Self::InActivity => "InActivity",
            Self::InCycle => "InCycle",
        }
    }
}

impl fmt::Display for TaskRunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative runner statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerCounters {
    /// Data messages handed to `monitor_data`.
    pub total_messages: u64,
    /// Failed task callbacks, all kinds included.
    pub exception_count: u64,
    /// Cycles whose objects reached the sink
    pub cycles_published: u64,
    /// Cycles the sink rejected
    pub publication_failures: u64,
    /// Messages received while no cycle could be opened.
    pub dropped_messages: u64,
}

/// Hosts one task instance and drives it through activities and cycles
pub struct TaskRunner {
    name: String,
    instance: u32,
    config: TaskConfig,
    task: Box<dyn TaskInterface>,
    objects: ObjectsManager,
    services: ServiceRegistry,
    sink: Arc<dyn MonitorObjectSink>,
    state: TaskRunnerState,
    activity: Activity,
    cycle: Option<CycleInfo>,
    cycle_number: u64,
    counters: RunnerCounters,
    cancelled: Arc<AtomicBool>,
}

impl TaskRunner {
    /// Runner for one instance of `config`; call `init` before feeding data.
    pub fn new(
        name: impl Into<String>,
        config: TaskConfig,
        task: Box<dyn TaskInterface>,
        services: ServiceRegistry,
        sink: Arc<dyn MonitorObjectSink>,
    ) -> Self {
        let name = name.into();
        let objects = ObjectsManager::new(name.clone(), config.detector_name.clone());
        Self {
            name,
            instance: 0,
            config,
            task,
            objects,
            services,
            sink,
            state: TaskRunnerState::Uninitialized,
            activity: Activity::default(),
            cycle: None,
            cycle_number: 0,
            counters: RunnerCounters::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Index of this replica among the task's parallel instances
    #[must_use]
    pub const fn with_instance(mut self, instance: u32) -> Self {
        self.instance = instance;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn instance(&self) -> u32 {
        self.instance
    }

    /// Lifecycle state.
    pub const fn state(&self) -> TaskRunnerState {
        self.state
    }

    /// Snapshot of the counters.
    pub const fn counters(&self) -> RunnerCounters {
        self.counters
    }

    pub const fn objects(&self) -> &ObjectsManager {
        &self.objects
    }

    pub const fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Number of the current (or last) cycle within the activity
    pub const fn cycle_number(&self) -> u64 {
        self.cycle_number
    }

    /// Cycle being filled, if one is open.
    pub const fn current_cycle(&self) -> Option<&CycleInfo> {
        self.cycle.as_ref()
    }

    /// Flag that, once raised, ends the activity at the next message boundary
    pub fn cancellation_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Stop `run` at the next message boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn require(&self, expected: TaskRunnerState, action: &'static str) -> Result<(), QcError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(QcError::InvalidStateTransition {
                state: self.state.to_string(),
                action,
            })
        }
    }

    fn record_failure(&mut self, callback: &str, err: &anyhow::Error) {
        self.counters.exception_count += 1;
        if let Some(cycle) = self.cycle.as_mut() {
            cycle.failures += 1;
        }
        warn!(
            task = %self.name,
            instance = self.instance,
            cycle = self.cycle_number,
            callback,
            error = %err,
            "task callback failed"
        );
    }

    /// Let the task build and register its objects
    pub fn initialize(&mut self) -> Result<(), QcError> {
        self.require(TaskRunnerState::Uninitialized, "initialize")?;

        let result = guarded(|| {
            self.task.initialize(InitContext {
                objects: &mut self.objects,
                services: &self.services,
                options: TaskOptions::new(&self.config),
            })
        });

        match result {
            Ok(()) => {
                self.state = TaskRunnerState::Idle;
                info!(
                    task = %self.name,
                    instance = self.instance,
                    objects = self.objects.len(),
                    "task initialized"
                );
                Ok(())
            }
            Err(err) => {
                error!(task = %self.name, error = %err, "task initialization failed");
                Err(QcError::TaskInitialization {
                    task: self.name.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Enter an activity; a task failure leaves the runner Idle
    pub fn start_of_activity(&mut self, activity: Activity) -> Result<(), QcError> {
        self.require(TaskRunnerState::Idle, "start_of_activity")?;

        self.objects.set_activity(&activity);
        let result = guarded(|| self.task.start_of_activity(&activity, &mut self.objects));
        if let Err(err) = result {
            error!(task = %self.name, activity = %activity, error = %err, "start of activity failed");
            return Err(QcError::ActivityStart {
                task: self.name.clone(),
                run: activity.number,
                reason: err.to_string(),
            });
        }

        info!(task = %self.name, instance = self.instance, activity = %activity, "activity started");
        self.activity = activity;
        self.cycle_number = 0;
        self.cancelled.store(false, Ordering::SeqCst);
        self.state = TaskRunnerState::InActivity;
        Ok(())
    }

    /// Open the next cycle; returns false once `maxNumberCycles` is reached
    pub fn start_cycle(&mut self) -> Result<bool, QcError> {
        self.require(TaskRunnerState::InActivity, "start_cycle")?;

        if let Some(max) = self.config.max_number_cycles {
            if self.cycle_number >= max {
                debug!(task = %self.name, max, "maximum number of cycles reached");
                return Ok(false);
            }
        }

        self.cycle_number += 1;
        self.cycle = Some(CycleInfo::new(self.cycle_number, self.services.clock().now()));
        self.state = TaskRunnerState::InCycle;

        if let Err(err) = guarded(|| self.task.start_of_cycle(&mut self.objects)) {
            self.record_failure("start_of_cycle", &err);
        }
        debug!(task = %self.name, instance = self.instance, cycle = self.cycle_number, "cycle started");
        Ok(true)
    }

    /// Hand one message to the task
    pub fn monitor_data(&mut self, inputs: &InputRecord) -> Result<(), QcError> {
        self.require(TaskRunnerState::InCycle, "monitor_data")?;

        self.counters.total_messages += 1;
        if let Some(cycle) = self.cycle.as_mut() {
            cycle.messages += 1;
        }

        let result = guarded(|| {
            self.task.monitor_data(ProcessingContext {
                inputs,
                objects: &mut self.objects,
                services: &self.services,
                options: TaskOptions::new(&self.config),
                activity: &self.activity,
            })
        });
        if let Err(err) = result {
            self.record_failure("monitor_data", &err);
        }
        Ok(())
    }

    /// Whether the open cycle has reached its event count or duration
    pub fn cycle_due(&self) -> bool {
        let Some(cycle) = self.cycle.as_ref() else {
            return false;
        };
        if self.state != TaskRunnerState::InCycle {
            return false;
        }
        match self.config.cycle_event_count {
            Some(count) => cycle.messages >= count,
            None => {
                let elapsed = self.services.clock().now() - cycle.started_at;
                elapsed.to_std().unwrap_or(Duration::ZERO) >= self.cycle_duration()
            }
        }
    }

    fn cycle_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.cycle_duration_seconds).unwrap_or(Duration::MAX)
    }

    /// Close the cycle and publish a snapshot of every registered object
    pub async fn end_cycle(&mut self) -> Result<(), QcError> {
        self.require(TaskRunnerState::InCycle, "end_cycle")?;

        if let Err(err) = guarded(|| self.task.end_of_cycle(&mut self.objects)) {
            self.record_failure("end_of_cycle", &err);
        }

        let now = self.services.clock().now();
        let cycle = self
            .cycle
            .take()
            .unwrap_or_else(|| CycleInfo::new(self.cycle_number, now));
        let degraded = cycle.failures > 0 && cycle.failure_rate() > self.config.degraded_cycle_threshold;
        if degraded {
            warn!(
                task = %self.name,
                cycle = cycle.number,
                failures = cycle.failures,
                messages = cycle.messages,
                "cycle degraded"
            );
        }

        let validity = ValidityInterval::new(cycle.started_at, now);
        let mut objects = self.objects.snapshot();
        for object in &mut objects {
            object.stamp(&self.activity, cycle.number, validity, now);
            object.add_metadata(metadata_keys::DEGRADED_CYCLE, degraded.to_string());
        }
        let published = objects.len();

        let publication = PublishedCycle {
            task_name: self.name.clone(),
            instance: self.instance,
            cycle_number: cycle.number,
            objects,
        };
        match self.sink.publish(publication).await {
            Ok(()) => {
                self.counters.cycles_published += 1;
                info!(
                    task = %self.name,
                    instance = self.instance,
                    cycle = cycle.number,
                    objects = published,
                    messages = cycle.messages,
                    degraded,
                    "cycle published"
                );
            }
            Err(err) => {
                self.counters.publication_failures += 1;
                error!(task = %self.name, cycle = cycle.number, error = %err, "publication failed");
            }
        }
        self.objects.after_publication();
        self.state = TaskRunnerState::InActivity;

        let reset_every = self.config.reset_after_cycles;
        if reset_every > 0 && cycle.number % reset_every == 0 {
            debug!(task = %self.name, cycle = cycle.number, "periodic reset");
            if let Err(err) = guarded(|| self.task.reset(&mut self.objects)) {
                self.record_failure("reset", &err);
            }
        }
        Ok(())
    }

    /// Leave the activity, closing the open cycle first
    pub async fn end_of_activity(&mut self) -> Result<(), QcError> {
        if self.state == TaskRunnerState::InCycle {
            self.end_cycle().await?;
        }
        self.require(TaskRunnerState::InActivity, "end_of_activity")?;

        let activity = self.activity.clone();
        if let Err(err) = guarded(|| self.task.end_of_activity(&activity, &mut self.objects)) {
            self.record_failure("end_of_activity", &err);
        }
        self.objects.after_activity();
        if let Err(err) = guarded(|| self.task.reset(&mut self.objects)) {
            self.record_failure("reset", &err);
        }

        self.state = TaskRunnerState::Idle;
        self.cancelled.store(false, Ordering::SeqCst);
        info!(
            task = %self.name,
            instance = self.instance,
            activity = %activity,
            cycles = self.cycle_number,
            "activity ended"
        );
        Ok(())
    }

    /// Process one input from the dataflow
    pub async fn handle(&mut self, input: TaskInput) -> Result<(), QcError> {
        if self.cancelled.load(Ordering::SeqCst)
            && matches!(self.state, TaskRunnerState::InActivity | TaskRunnerState::InCycle)
        {
            info!(task = %self.name, "activity cancelled");
            return self.end_of_activity().await;
        }

        match input {
            TaskInput::Data(record) => {
                if self.state == TaskRunnerState::InActivity && !self.start_cycle()? {
                    self.counters.dropped_messages += 1;
                    return Ok(());
                }
                self.monitor_data(&record)?;
                if self.cycle_due() {
                    self.end_cycle().await?;
                }
                Ok(())
            }
            TaskInput::Timer => match self.state {
                TaskRunnerState::InCycle => {
                    self.end_cycle().await?;
                    self.start_cycle().map(|_| ())
                }
                TaskRunnerState::InActivity => self.start_cycle().map(|_| ()),
                _ => self.require(TaskRunnerState::InCycle, "cycle_timer"),
            },
            TaskInput::EndOfStream => {
                if self.state == TaskRunnerState::InCycle {
                    self.end_cycle().await?;
                }
                Ok(())
            }
        }
    }

    /// Drive the runner from a channel until it closes or the activity is cancelled.
    ///
    /// The cycle timer is checked between messages and on a short tick, so a
    /// time-based cycle ends even when no data arrives.
    pub async fn run(&mut self, mut inputs: mpsc::Receiver<TaskInput>) -> Result<RunnerCounters, QcError> {
        if self.state == TaskRunnerState::InActivity {
            self.start_cycle()?;
        }

        let tick = self.cycle_duration().div_f64(10.0).clamp(Duration::from_millis(5), Duration::from_millis(200));
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                input = inputs.recv() => match input {
                    Some(TaskInput::EndOfStream) => {
                        self.handle(TaskInput::EndOfStream).await?;
                        break;
                    }
                    Some(input) => self.handle(input).await?,
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    if self.cycle_due() {
                        self.end_cycle().await?;
                        self.start_cycle()?;
                    }
                }
            }

            if self.state == TaskRunnerState::Idle {
                break;
            }
        }

        if self.cancelled.load(Ordering::SeqCst) {
            self.end_of_activity().await?;
        } else if self.state == TaskRunnerState::InCycle {
            self.end_cycle().await?;
        }
        Ok(self.counters)
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("state", &self.state)
            .field("cycle_number", &self.cycle_number)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Histogram1D, PublicationPolicy};
    use crate::domain::ports::Database;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::database::InMemoryDatabase;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        cycles: Mutex<Vec<PublishedCycle>>,
    }

    #[async_trait]
    impl MonitorObjectSink for RecordingSink {
        async fn publish(&self, cycle: PublishedCycle) -> Result<(), QcError> {
            self.cycles.lock().unwrap().push(cycle);
            Ok(())
        }
    }

    /// Records every callback and fails monitor_data when told to.
    struct ScriptedTask {
        calls: Arc<Mutex<Vec<&'static str>>>,
        fail_init: bool,
    }

    impl TaskInterface for ScriptedTask {
        fn initialize(&mut self, ctx: InitContext<'_>) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("initialize");
            anyhow::ensure!(!self.fail_init, "missing parameter");
            ctx.objects
                .start_publishing(Histogram1D::new("h", 10, 0.0, 10.0), PublicationPolicy::Forever)?;
            Ok(())
        }

        fn start_of_activity(&mut self, _activity: &Activity, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("start_of_activity");
            Ok(())
        }

        fn start_of_cycle(&mut self, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("start_of_cycle");
            Ok(())
        }

        fn monitor_data(&mut self, ctx: ProcessingContext<'_>) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("monitor_data");
            if ctx.inputs.get("fail").is_some() {
                anyhow::bail!("corrupted payload");
            }
            ctx.objects.histogram1d_mut("h")?.fill(1.0);
            Ok(())
        }

        fn end_of_cycle(&mut self, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("end_of_cycle");
            Ok(())
        }

        fn end_of_activity(&mut self, _activity: &Activity, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("end_of_activity");
            Ok(())
        }
    }

    fn runner(config: TaskConfig, fail_init: bool) -> (TaskRunner, Arc<RecordingSink>, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());
        let database: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());
        let services = ServiceRegistry::new(database, Arc::new(ManualClock::default()));
        let task = ScriptedTask {
            calls: Arc::clone(&calls),
            fail_init,
        };
        let runner = TaskRunner::new("Scripted", config, Box::new(task), services, sink.clone());
        (runner, sink, calls)
    }

    fn data() -> TaskInput {
        TaskInput::Data(InputRecord::new())
    }

    fn failing_data() -> TaskInput {
        use crate::domain::models::{DataHeader, DataRef};
        TaskInput::Data(InputRecord::new().with("fail", DataRef::new(DataHeader::default(), vec![])))
    }

    #[tokio::test]
    async fn test_callback_order() {
        let (mut runner, sink, calls) = runner(TaskConfig::new("Scripted", "TST"), false);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();
        runner.start_cycle().unwrap();
        runner.monitor_data(&InputRecord::new()).unwrap();
        runner.end_cycle().await.unwrap();
        runner.end_of_activity().await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "initialize",
                "start_of_activity",
                "start_of_cycle",
                "monitor_data",
                "end_of_cycle",
                "end_of_activity"
            ]
        );
        assert_eq!(runner.state(), TaskRunnerState::Idle);
        assert_eq!(sink.cycles.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_fatal() {
        let (mut runner, _sink, _calls) = runner(TaskConfig::new("Scripted", "TST"), true);
        assert!(matches!(runner.initialize(), Err(QcError::TaskInitialization { .. })));
        assert_eq!(runner.state(), TaskRunnerState::Uninitialized);
        assert!(matches!(
            runner.start_of_activity(Activity::new(1, "PHYSICS")),
            Err(QcError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_state_machine_rejects_out_of_order_calls() {
        let (mut runner, _sink, _calls) = runner(TaskConfig::new("Scripted", "TST"), false);
        runner.initialize().unwrap();
        assert!(runner.start_cycle().is_err());
        assert!(runner.monitor_data(&InputRecord::new()).is_err());
        assert!(runner.end_cycle().await.is_err());
        assert!(runner.initialize().is_err());
    }

    #[tokio::test]
    async fn test_failures_counted_and_cycle_degraded() {
        let (mut runner, sink, _calls) = runner(TaskConfig::new("Scripted", "TST"), false);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(7, "PHYSICS")).unwrap();
        runner.handle(failing_data()).await.unwrap();
        runner.handle(data()).await.unwrap();
        runner.handle(data()).await.unwrap();
        assert_eq!(runner.state(), TaskRunnerState::InCycle);
        runner.handle(TaskInput::EndOfStream).await.unwrap();

        assert_eq!(runner.counters().exception_count, 1);
        assert_eq!(runner.counters().total_messages, 3);
        let cycles = sink.cycles.lock().unwrap();
        let mo = &cycles[0].objects[0];
        assert_eq!(mo.payload().entries(), Some(2.0));
        assert_eq!(mo.get_metadata(metadata_keys::DEGRADED_CYCLE), Some("true"));
        assert_eq!(mo.get_metadata(metadata_keys::RUN_NUMBER), Some("7"));
    }

    #[tokio::test]
    async fn test_event_count_cycles_and_max_cycles() {
        let mut config = TaskConfig::new("Scripted", "TST");
        config.cycle_event_count = Some(2);
        config.max_number_cycles = Some(2);
        let (mut runner, sink, _calls) = runner(config, false);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();

        for _ in 0..6 {
            runner.handle(data()).await.unwrap();
        }

        let cycles = sink.cycles.lock().unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1].cycle_number, 2);
        assert_eq!(runner.counters().dropped_messages, 2);
        assert_eq!(
            cycles[1].objects[0].get_metadata(metadata_keys::DEGRADED_CYCLE),
            Some("false")
        );
    }

    #[tokio::test]
    async fn test_reset_after_cycles() {
        let mut config = TaskConfig::new("Scripted", "TST");
        config.cycle_event_count = Some(1);
        config.reset_after_cycles = 2;
        let (mut runner, sink, _calls) = runner(config, false);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();
        for _ in 0..3 {
            runner.handle(data()).await.unwrap();
        }

        let entries: Vec<Option<f64>> = sink
            .cycles
            .lock()
            .unwrap()
            .iter()
            .map(|cycle| cycle.objects[0].payload().entries())
            .collect();
        assert_eq!(entries, vec![Some(1.0), Some(2.0), Some(1.0)]);
    }

    #[tokio::test]
    async fn test_cancellation_ends_activity() {
        let (mut runner, _sink, calls) = runner(TaskConfig::new("Scripted", "TST"), false);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();
        runner.handle(data()).await.unwrap();
        runner.cancel();
        runner.handle(data()).await.unwrap();

        assert_eq!(runner.state(), TaskRunnerState::Idle);
        assert_eq!(calls.lock().unwrap().last(), Some(&"end_of_activity"));
        assert_eq!(runner.counters().total_messages, 1);
    }

    #[tokio::test]
    async fn test_run_loop_drains_channel() {
        let mut config = TaskConfig::new("Scripted", "TST");
        config.cycle_event_count = Some(3);
        let (mut runner, sink, _calls) = runner(config, false);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();

        let (tx, rx) = mpsc::channel(16);
        for _ in 0..7 {
            tx.send(data()).await.unwrap();
        }
        drop(tx);

        let counters = runner.run(rx).await.unwrap();
        assert_eq!(counters.total_messages, 7);
        // 3 + 3 + the partial cycle closed when the channel closed
        assert_eq!(sink.cycles.lock().unwrap().len(), 3);
        assert_eq!(runner.state(), TaskRunnerState::InActivity);
    }
}
