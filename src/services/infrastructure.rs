//! Wiring of a complete QC topology from configuration.
//!
//! ```text
//! TaskRunner ×N ──▶ MergeCollector ──▶ CheckRunner ──▶ AggregatorRunner
//!                         │                 │                 │
//!                         └─(no checks)─▶ Database ◀──────────┘
//! PostProcessingRunner ◀── triggers ── Database
//! ```
//!
//! With a single instance a task publishes straight to the check runner
//! (or to the database when no check is configured).

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use super::aggregator_runner::AggregatorRunner;
use super::check_runner::CheckRunner;
use super::database_sink::DatabaseSink;
use super::merger::MergeCollector;
use super::plugin_registry::PluginRegistry;
use super::postprocessing_runner::PostProcessingRunner;
use super::task_runner::{TaskRunner, TaskRunnerState};
use crate::domain::errors::QcError;
use crate::domain::models::{Activity, DataHeader, DataRef, InputRecord, QcConfig, TriggerType};
use crate::domain::ports::{Clock, Database, MonitorObjectSink, QualityObjectSink, ServiceRegistry};

/// Summary of one synthetic cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Messages fed to the tasks
    pub messages: u64,
    /// Runners that published in this cycle
    pub runners_published: usize,
    /// Postprocessing callbacks that ran
    pub postprocessing_steps: usize,
}

/// Generates input records for tasks that have no real data source
#[derive(Debug)]
pub struct SyntheticData {
    rng: StdRng,
    max_payload_size: usize,
}

impl SyntheticData {
    /// Generator seeded with `seed`, or from entropy.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            max_payload_size: 8192,
        }
    }

    /// One message with a single random-size payload bound as `random`
    pub fn next_record(&mut self) -> InputRecord {
        let size = self.rng.gen_range(0..=self.max_payload_size);
        let header = DataHeader {
            origin: "TST".to_string(),
            description: "RANDOM".to_string(),
            sub_specification: 0,
        };
        InputRecord::new().with("random", DataRef::new(header, vec![0; size]))
    }
}

/// Every runner of a configuration, wired together
pub struct QcInfrastructure {
    config: QcConfig,
    services: ServiceRegistry,
    activity: Activity,
    tasks: Vec<TaskRunner>,
    mergers: BTreeMap<String, Arc<MergeCollector>>,
    checks: Option<Arc<CheckRunner>>,
    aggregators: Option<Arc<AggregatorRunner>>,
    postprocessing: Vec<PostProcessingRunner>,
}

impl QcInfrastructure {
    /// Build all active components.
    ///
    /// Classes are looked up in `registry`; an unknown class or a failing
    /// plugin configuration aborts the whole setup.
    pub async fn from_config(
        config: QcConfig,
        registry: &PluginRegistry,
        database: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QcError> {
        let qc = &config.qc;
        let activity = qc.config.activity.clone();
        let services = ServiceRegistry::new(Arc::clone(&database), Arc::clone(&clock));

        let aggregators = if qc.aggregators.values().any(|a| a.active) {
            let mut runner = AggregatorRunner::new(
                Arc::clone(&database),
                Arc::clone(&clock),
                qc.config.quality.null_handling,
            );
            for (name, aggregator) in qc.aggregators.iter().filter(|(_, a)| a.active) {
                let plugin = registry.create_aggregator(&aggregator.class_name)?;
                runner.add_aggregator(name.clone(), aggregator.clone(), plugin)?;
            }
            Some(Arc::new(runner))
        } else {
            None
        };

        let checks = if qc.checks.values().any(|c| c.active) {
            let mut runner = CheckRunner::new(Arc::clone(&database), Arc::clone(&clock));
            if let Some(aggregators) = &aggregators {
                runner = runner.with_downstream(Arc::clone(aggregators) as Arc<dyn QualityObjectSink>);
            }
            for (name, check) in qc.checks.iter().filter(|(_, c)| c.active) {
                let plugin = registry.create_check(&check.class_name)?;
                runner.add_check(name.clone(), check.clone(), plugin)?;
            }
            for (name, task) in &qc.tasks {
                runner.register_producer(name.clone(), task.detector_name.clone()).await;
            }
            Some(Arc::new(runner))
        } else {
            None
        };

        let downstream: Arc<dyn MonitorObjectSink> = match &checks {
            Some(checks) => Arc::clone(checks) as Arc<dyn MonitorObjectSink>,
            None => Arc::new(DatabaseSink::new(Arc::clone(&database))),
        };

        let mut tasks = Vec::new();
        let mut mergers = BTreeMap::new();
        for (name, task) in qc.tasks.iter().filter(|(_, t)| t.active) {
            let instances = task.parallel_instances.max(1);
            let sink = if instances > 1 {
                let merger = Arc::new(MergeCollector::new(name.clone(), instances, Arc::clone(&downstream)));
                mergers.insert(name.clone(), Arc::clone(&merger));
                merger as Arc<dyn MonitorObjectSink>
            } else {
                Arc::clone(&downstream)
            };
            for instance in 0..instances {
                let plugin = registry.create_task(&task.class_name)?;
                let runner = TaskRunner::new(name.clone(), task.clone(), plugin, services.clone(), Arc::clone(&sink))
                    .with_instance(instance);
                tasks.push(runner);
            }
        }

        let mut postprocessing = Vec::new();
        for (name, pp) in qc.postprocessing.iter().filter(|(_, p)| p.active) {
            let plugin = registry.create_postprocessing(&pp.class_name)?;
            postprocessing.push(PostProcessingRunner::new(
                name.clone(),
                pp,
                plugin,
                services.clone(),
                activity.clone(),
            )?);
        }

        info!(
            tasks = tasks.len(),
            checks = qc.checks.values().filter(|c| c.active).count(),
            aggregators = qc.aggregators.values().filter(|a| a.active).count(),
            postprocessing = postprocessing.len(),
            "QC topology built"
        );

        Ok(Self {
            config,
            services,
            activity,
            tasks,
            mergers,
            checks,
            aggregators,
            postprocessing,
        })
    }

    /// Configuration the topology was built from.
    pub const fn config(&self) -> &QcConfig {
        &self.config
    }

    /// Shared object store.
    pub fn database(&self) -> &Arc<dyn Database> {
        self.services.database()
    }

    /// Activity currently running.
    pub const fn activity(&self) -> &Activity {
        &self.activity
    }

    /// Runners in configuration order.
    pub fn task_runners(&self) -> &[TaskRunner] {
        &self.tasks
    }

    pub fn task_runners_mut(&mut self) -> &mut [TaskRunner] {
        &mut self.tasks
    }

    /// Merge collector of a multi-instance task.
    pub fn merger(&self, task: &str) -> Option<&Arc<MergeCollector>> {
        self.mergers.get(task)
    }

    pub const fn check_runner(&self) -> Option<&Arc<CheckRunner>> {
        self.checks.as_ref()
    }

    pub const fn aggregator_runner(&self) -> Option<&Arc<AggregatorRunner>> {
        self.aggregators.as_ref()
    }

    /// Postprocessing runners in configuration order.
    pub fn postprocessing_runners(&self) -> &[PostProcessingRunner] {
        &self.postprocessing
    }

    /// Initialize every task instance
    pub fn initialize(&mut self) -> Result<(), QcError> {
        for runner in &mut self.tasks {
            runner.initialize()?;
        }
        Ok(())
    }

    /// Enter `activity` everywhere and fire start-of-run triggers.
    pub async fn start_of_activity(&mut self, activity: Activity) -> Result<(), QcError> {
        info!(activity = %activity, "starting activity");
        for runner in &mut self.tasks {
            runner.start_of_activity(activity.clone())?;
        }
        if let Some(checks) = &self.checks {
            checks.start_of_activity(&activity).await;
        }
        if let Some(aggregators) = &self.aggregators {
            aggregators.start_of_activity().await;
        }
        for runner in &mut self.postprocessing {
            runner.notify(TriggerType::StartOfRun, &activity);
        }
        self.activity = activity;
        Ok(())
    }

    /// Open a cycle on every task instance; returns how many opened one
    pub fn open_cycles(&mut self) -> Result<usize, QcError> {
        let mut opened = 0;
        for runner in &mut self.tasks {
            if runner.state() == TaskRunnerState::InActivity && runner.start_cycle()? {
                opened += 1;
            }
        }
        Ok(opened)
    }

    /// Hand `messages` synthetic records to every instance in a cycle
    pub fn feed(&mut self, messages: u64, data: &mut SyntheticData) -> Result<u64, QcError> {
        let mut fed = 0;
        for runner in self.tasks.iter_mut().filter(|r| r.state() == TaskRunnerState::InCycle) {
            for _ in 0..messages {
                runner.monitor_data(&data.next_record())?;
                fed += 1;
            }
        }
        Ok(fed)
    }

    /// Publish every open cycle; returns the highest cycle number closed
    pub async fn close_cycles(&mut self) -> Result<u64, QcError> {
        let mut cycle = 0;
        for runner in self.tasks.iter_mut() {
            if runner.state() == TaskRunnerState::InCycle {
                runner.end_cycle().await?;
                cycle = cycle.max(runner.cycle_number());
            }
        }
        Ok(cycle)
    }

    /// Open, feed and close one cycle, then step post-processing
    pub async fn run_cycle(&mut self, messages: u64, data: &mut SyntheticData) -> Result<CycleReport, QcError> {
        let runners_published = self.open_cycles()?;
        let messages = self.feed(messages, data)?;
        let cycle = self.close_cycles().await?;
        let postprocessing_steps = self.step_postprocessing().await?;
        Ok(CycleReport {
            cycle,
            messages,
            runners_published,
            postprocessing_steps,
        })
    }

    /// Give every post-processing runner one chance to fire
    pub async fn step_postprocessing(&mut self) -> Result<usize, QcError> {
        let mut steps = 0;
        for runner in &mut self.postprocessing {
            if runner.run_once().await? {
                steps += 1;
            }
        }
        Ok(steps)
    }

    /// Close the activity: flush partial merges, end tasks and checks, then
    /// fire end-of-run triggers.
    pub async fn end_of_activity(&mut self) -> Result<(), QcError> {
        let activity = self.activity.clone();
        for runner in &mut self.tasks {
            runner.end_of_activity().await?;
        }
        for (task, merger) in &self.mergers {
            let flushed = merger.flush_all().await?;
            if flushed > 0 {
                warn!(task = %task, cycles = flushed, "flushed incomplete merges at end of activity");
            }
        }
        if let Some(checks) = &self.checks {
            checks.end_of_activity(&activity).await;
        }
        for runner in &mut self.postprocessing {
            runner.notify(TriggerType::EndOfRun, &activity);
        }
        self.step_postprocessing().await?;
        info!(activity = %activity, "activity ended");
        Ok(())
    }

    /// Stop every post-processing runner that is still running
    pub async fn shutdown(&mut self) {
        for runner in &mut self.postprocessing {
            runner.stop().await;
        }
    }
}

impl std::fmt::Debug for QcInfrastructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QcInfrastructure")
            .field("activity", &self.activity)
            .field("tasks", &self.tasks.len())
            .field("mergers", &self.mergers.keys().collect::<Vec<_>>())
            .field("checks", &self.checks.is_some())
            .field("aggregators", &self.aggregators.is_some())
            .field("postprocessing", &self.postprocessing.len())
            .finish()
    }
}
