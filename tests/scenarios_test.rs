//! End-to-end behaviour of the runners on small, fully controlled topologies.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;

use common::{histogram, message, Harness, RecordingSink};
use quality_control::domain::models::{
    metadata_keys, Activity, Axis, CheckConfig, DataSourceSpec, FlagKind, Histogram1D, Histogram2D,
    MonitorObject, ObjectSelection, ObjectsManager, PostProcessingConfig, PublicationPolicy, Quality,
    UpdatePolicyType, ValidityInterval,
};
use quality_control::domain::ports::{Clock, Database, InitContext, ProcessingContext, PublishedCycle, TaskInterface};
use quality_control::modules::{ThresholdFractionCheck, TrendingTask};
use quality_control::services::{
    CheckRunner, DatabaseSink, MergeCollector, PostProcessingRunner, TaskRunnerState,
};

/// Publishes one histogram and fills bin 1 `fills` times per message.
/// With `fail_every` set, every n-th message (counting from the first)
/// fails instead.
struct FillingTask {
    bins: usize,
    fills: usize,
    fail_every: Option<u64>,
    seen: u64,
}

impl FillingTask {
    fn new(bins: usize, fills: usize) -> Self {
        Self {
            bins,
            fills,
            fail_every: None,
            seen: 0,
        }
    }
}

impl TaskInterface for FillingTask {
    fn initialize(&mut self, ctx: InitContext<'_>) -> anyhow::Result<()> {
        ctx.objects.start_publishing(
            Histogram1D::new("h1", self.bins, 0.0, self.bins as f64),
            PublicationPolicy::Forever,
        )?;
        Ok(())
    }

    fn start_of_activity(&mut self, _activity: &Activity, _objects: &mut ObjectsManager) -> anyhow::Result<()> {
        Ok(())
    }

    fn monitor_data(&mut self, ctx: ProcessingContext<'_>) -> anyhow::Result<()> {
        let index = self.seen;
        self.seen += 1;
        if self.fail_every.is_some_and(|n| index % n == 0) {
            anyhow::bail!("corrupted message {index}");
        }
        let h = ctx.objects.histogram1d_mut("h1")?;
        for _ in 0..self.fills {
            h.fill(0.5);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_empty_cycle_is_published() {
    common::setup_test_logging();
    let harness = Harness::new();
    let sink = Arc::new(DatabaseSink::new(harness.database()));
    let mut runner = harness.task_runner("Empty", Box::new(FillingTask::new(100, 1)), sink);

    runner.initialize().unwrap();
    runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();
    runner.start_cycle().unwrap();
    runner.end_cycle().await.unwrap();

    let stored = harness
        .database
        .retrieve_mo("TST/MO/Empty", "h1", None, &Activity::any())
        .await
        .unwrap()
        .expect("empty cycle must still be published");
    assert_eq!(stored.get_metadata(metadata_keys::CYCLE_NUMBER), Some("1"));
    assert_eq!(stored.get_metadata(metadata_keys::RUN_NUMBER), Some("1"));
    assert_eq!(stored.name(), "h1");
    assert_eq!(stored.payload().entries(), Some(0.0));
    assert_eq!(harness.database.version_count().await, 1);
}

#[tokio::test]
async fn test_partial_histograms_are_merged() {
    let harness = Harness::new();
    let downstream = Arc::new(RecordingSink::default());
    let merger = Arc::new(MergeCollector::new("Replica", 2, downstream.clone()));

    let mut replicas = Vec::new();
    for (instance, fills) in [(0_u32, 3_usize), (1, 5)] {
        let mut runner = harness
            .task_runner("Replica", Box::new(FillingTask::new(10, fills)), merger.clone())
            .with_instance(instance);
        runner.initialize().unwrap();
        runner.start_of_activity(Activity::new(1, "PHYSICS")).unwrap();
        runner.start_cycle().unwrap();
        runner.monitor_data(&message("data")).unwrap();
        replicas.push(runner);
    }

    replicas[0].end_cycle().await.unwrap();
    assert!(downstream.published().is_empty(), "merge must wait for every replica");
    replicas[1].end_cycle().await.unwrap();

    let merged = downstream.object(0, "h1").expect("merged object forwarded");
    let h = merged.payload().as_histogram1d().unwrap();
    assert!((h.bin_content(1) - 8.0).abs() < 1e-9);
    assert!((h.bin_error(1) - 8.0_f64.sqrt()).abs() < 1e-9);
    assert_eq!(merger.counters().await.cycles_merged, 1);
}

fn pedestals(in_range: usize) -> MonitorObject {
    let contents: Vec<f64> = (0..100)
        .map(|channel| if channel < in_range { 75.0 } else { 10.0 })
        .collect();
    let mut mo = MonitorObject::new(histogram("pedestals", 100, &contents).into(), "Pedestals", "TST");
    mo.set_activity(Activity::new(1, "PHYSICS"));
    mo
}

fn threshold_runner(harness: &Harness) -> CheckRunner {
    let mut runner = CheckRunner::new(harness.database(), harness.clock.clone());
    let mut config = CheckConfig::new("ThresholdFractionCheck", "TST");
    config.policy = UpdatePolicyType::OnAny;
    config.data_source = vec![DataSourceSpec::task("Pedestals", ObjectSelection::All)];
    config.check_parameters = BTreeMap::from([
        ("min".to_string(), "50".to_string()),
        ("max".to_string(), "100".to_string()),
        ("minGoodFraction".to_string(), "0.9".to_string()),
    ]);
    runner
        .add_check("PedestalRange", config, Box::new(ThresholdFractionCheck::default()))
        .unwrap();
    runner
}

fn cycle(number: u64, objects: Vec<MonitorObject>) -> PublishedCycle {
    PublishedCycle {
        task_name: "Pedestals".into(),
        instance: 0,
        cycle_number: number,
        objects,
    }
}

#[tokio::test]
async fn test_check_downgrades_quality_at_inclusive_threshold() {
    let harness = Harness::new();
    let runner = threshold_runner(&harness);

    let good = runner.process(cycle(1, vec![pedestals(90)])).await.unwrap();
    assert_eq!(good.len(), 1);
    assert_eq!(good[0].quality(), &Quality::good());

    let bad = runner.process(cycle(2, vec![pedestals(89)])).await.unwrap();
    assert_eq!(bad[0].quality(), &Quality::bad());
    // a single input names the quality object after its monitor object
    assert_eq!(bad[0].full_path(), "TST/QO/PedestalRange/pedestals");
    assert!(!bad[0].quality().flags().is_empty());

    let latest = harness
        .database
        .retrieve_qo("TST/QO/PedestalRange", "pedestals", None, &Activity::any())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.quality(), &Quality::bad());
}

#[tokio::test]
async fn test_wrong_type_check_yields_null_without_beautify() {
    let harness = Harness::new();
    let runner = threshold_runner(&harness);
    let mut map = MonitorObject::new(
        Histogram2D::new("map", Axis::new(4, 0.0, 1.0), Axis::new(4, 0.0, 1.0)).into(),
        "Pedestals",
        "TST",
    );
    map.set_activity(Activity::new(1, "PHYSICS"));

    let qos = runner.process(cycle(1, vec![map])).await.unwrap();
    assert_eq!(qos.len(), 1);
    let quality = qos[0].quality();
    assert!(quality.is_null());
    assert_eq!(quality.flags()[0].kind, FlagKind::WrongType);
    assert_eq!(quality.flags()[0].reason, "expected 1D histogram");

    let stored = harness
        .database
        .retrieve_mo("TST/MO/Pedestals", "map", None, &Activity::any())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.decorations().is_empty());
    assert_eq!(runner.counters("PedestalRange").await.unwrap().wrong_type, 1);
}

#[tokio::test]
async fn test_periodic_trending_appends_one_point_per_trigger() {
    let harness = Harness::new();
    let activity = Activity::new(1, "PHYSICS");
    let mut config = PostProcessingConfig::new("TrendingTask", "TST");
    config.init_trigger = vec!["once".into()];
    config.update_trigger = vec!["periodic:2".into()];
    config.customization = serde_json::json!({
        "dataSources": [{"path": "TST/MO/rate", "name": "h", "trendName": "trend"}]
    });
    let mut runner = PostProcessingRunner::new(
        "Trend",
        &config,
        Box::new(TrendingTask::default()),
        harness.services.clone(),
        activity.clone(),
    )
    .unwrap();

    for step in 0..3_u32 {
        let now = harness.clock.now();
        let mut h = Histogram1D::new("h", 10, 0.0, 10.0);
        h.fill(f64::from(step) + 0.5);
        let mut mo = MonitorObject::new(h.into(), "rate", "TST");
        mo.stamp(&activity, u64::from(step), ValidityInterval::instant(now), now);
        harness.database.store_mo(&mo).await.unwrap();

        assert!(runner.run_once().await.unwrap());
        // halfway to the next period nothing fires
        harness.clock.advance(Duration::seconds(1));
        assert!(runner.run_once().await.unwrap());
        harness.clock.advance(Duration::seconds(1));
    }

    assert_eq!(runner.counters().updates, 3);
    let trend = harness
        .database
        .retrieve_mo("TST/MO/Trend", "trend", None, &Activity::any())
        .await
        .unwrap()
        .unwrap();
    let graph = trend.payload().as_graph().unwrap();
    assert_eq!(graph.len(), 3);
    let xs: Vec<f64> = graph.points().iter().map(|point| point.x).collect();
    assert!(xs.windows(2).all(|pair| pair[0] < pair[1]), "x values not increasing: {xs:?}");
    let ys: Vec<f64> = graph.points().iter().map(|point| point.y).collect();
    assert_eq!(ys, vec![0.5, 1.5, 2.5]);
}

#[tokio::test]
async fn test_task_exceptions_are_contained() {
    let harness = Harness::new();
    let sink = Arc::new(RecordingSink::default());
    let mut task = FillingTask::new(10, 1);
    task.fail_every = Some(3);
    let mut runner = harness.task_runner("Flaky", Box::new(task), sink.clone());
    runner.initialize().unwrap();
    runner.start_of_activity(Activity::new(3, "PHYSICS")).unwrap();
    runner.start_cycle().unwrap();

    let messages = 10_u64;
    for _ in 0..messages {
        runner.monitor_data(&message("data")).unwrap();
        assert_eq!(runner.state(), TaskRunnerState::InCycle);
    }
    runner.end_cycle().await.unwrap();

    let failures = messages.div_ceil(3);
    assert_eq!(runner.counters().exception_count, failures);
    let mo = sink.object(0, "h1").unwrap();
    assert_eq!(mo.payload().entries(), Some((messages - failures) as f64));
    assert_eq!(mo.get_metadata(metadata_keys::DEGRADED_CYCLE), Some("true"));
    assert_eq!(runner.counters().cycles_published, 1);
}
