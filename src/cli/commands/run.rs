//! Implementation of the `qc run` command.
//!
//! Runs the whole configured topology in-process on synthetic data. Time is
//! simulated: every cycle lasts the shortest configured cycle duration, so
//! periodic post-processing triggers fire as they would online.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::cli::output::{output, CommandOutput};
use crate::cli::progress::{cycle_progress, spinner};
use crate::cli::table::TableFormatter;
use crate::domain::models::{Activity, Quality, QcConfig};
use crate::infrastructure::clock::ManualClock;
use crate::infrastructure::database;
use crate::services::{CheckCounters, PluginRegistry, QcInfrastructure, RunnerCounters, SyntheticData};

/// Parameters of `qc run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of cycles to drive
    pub cycles: u64,
    /// Synthetic messages fed per cycle
    pub messages_per_cycle: u64,
    /// Seed for the synthetic data
    pub seed: Option<u64>,
    /// Run number overriding the configured one
    pub run: Option<u32>,
}

/// One quality line of the report
#[derive(Debug, serde::Serialize)]
pub struct QualityRow {
    pub object: String,
    pub quality: Quality,
}

/// Report printed at the end of `qc run`
#[derive(Debug, serde::Serialize)]
pub struct RunOutput {
    /// Activity the run was recorded under
    pub activity: String,
    pub cycles: u64,
    pub messages: u64,
    pub postprocessing_steps: usize,
    /// Counters per task runner
    pub tasks: BTreeMap<String, RunnerCounters>,
    /// Counters per check
    pub checks: BTreeMap<String, CheckCounters>,
    /// Latest quality of every produced object
    pub qualities: Vec<QualityRow>,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Finished {}: {} cycle(s), {} message(s)", self.activity, self.cycles, self.messages),
            format!("Post-processing steps: {}", self.postprocessing_steps),
            String::new(),
        ];
        for (task, counters) in &self.tasks {
            lines.push(format!(
                "task {task}: {} cycle(s) published, {} exception(s)",
                counters.cycles_published, counters.exception_count
            ));
        }
        for (check, counters) in &self.checks {
            lines.push(format!(
                "check {check}: fired {}, missing inputs {}, exceptions {}, wrong type {}",
                counters.fired, counters.missing_inputs, counters.exceptions, counters.wrong_type
            ));
        }
        if !self.qualities.is_empty() {
            lines.push(String::new());
            let formatter = TableFormatter::new();
            lines.push(
                formatter.format_qualities(self.qualities.iter().map(|row| (row.object.as_str(), &row.quality))),
            );
        }
        lines.join("\n")
    }
}

/// Shortest cycle of the active tasks, the simulated time step
fn time_step(config: &QcConfig) -> chrono::Duration {
    let seconds = config
        .qc
        .tasks
        .values()
        .filter(|task| task.active)
        .map(|task| task.cycle_duration_seconds)
        .fold(f64::INFINITY, f64::min);
    let seconds = if seconds.is_finite() { seconds } else { 10.0 };
    chrono::Duration::milliseconds((seconds * 1000.0) as i64)
}

pub async fn execute(path: &Path, options: RunOptions, json_mode: bool) -> Result<()> {
    let config = super::load_config(path)?;
    let step = time_step(&config);
    let mut activity: Activity = config.qc.config.activity.clone();
    if let Some(run) = options.run {
        activity.number = run;
    }

    let setup = spinner("Connecting to the object store", json_mode);
    let database = database::connect(&config.qc.config.database)
        .await
        .context("Failed to open the object store")?;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let registry = PluginRegistry::with_builtins();

    setup.set_message("Building the QC topology");
    let mut qc = QcInfrastructure::from_config(config, &registry, Arc::clone(&database), clock.clone())
        .await
        .context("Failed to build the QC topology")?;
    qc.initialize().context("Failed to initialize tasks")?;
    qc.start_of_activity(activity.clone()).await?;
    setup.finish_and_clear();

    let progress = cycle_progress(options.cycles, json_mode);
    let mut data = SyntheticData::new(options.seed);
    let mut messages = 0;
    let mut postprocessing_steps = 0;
    for _ in 0..options.cycles {
        if qc.open_cycles()? == 0 {
            progress.set_message("no task accepts more cycles");
            break;
        }
        messages += qc.feed(options.messages_per_cycle, &mut data)?;
        clock.advance(step);
        let cycle = qc.close_cycles().await?;
        postprocessing_steps += qc.step_postprocessing().await?;
        progress.set_message(format!("cycle {cycle} published"));
        progress.inc(1);
    }
    qc.end_of_activity().await?;
    qc.shutdown().await;
    progress.finish_and_clear();

    let mut tasks = BTreeMap::new();
    for runner in qc.task_runners() {
        let label = format!("{}#{}", runner.name(), runner.instance());
        tasks.insert(label, runner.counters());
    }
    let checks = match qc.check_runner() {
        Some(checks) => checks.all_counters().await,
        None => BTreeMap::new(),
    };

    let filter = Activity {
        number: activity.number,
        ..Activity::any()
    };
    let mut qualities = Vec::new();
    for full_path in database.list_objects("").await? {
        if !full_path.contains("/QO/") {
            continue;
        }
        let Some((path, name)) = full_path.rsplit_once('/') else {
            continue;
        };
        if let Some(qo) = database.retrieve_qo(path, name, None, &filter).await? {
            qualities.push(QualityRow {
                object: full_path.clone(),
                quality: qo.quality().clone(),
            });
        }
    }

    let out = RunOutput {
        activity: activity.to_string(),
        cycles: options.cycles,
        messages,
        postprocessing_steps,
        tasks,
        checks,
        qualities,
    };
    output(&out, json_mode);
    Ok(())
}
