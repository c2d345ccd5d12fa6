//! Aggregator runner: reduces quality objects into summary qualities.
//!
//! Works like the check runner one level up. Inputs are quality objects
//! keyed `<check>/<name>`; each aggregator result is published as a
//! quality object named after the result under the aggregator's folder,
//! and fed back so aggregators can consume other aggregators.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::guard::guarded;
use super::update_policy::{InputMatcher, UpdatePolicyManager};
use crate::domain::errors::QcError;
use crate::domain::models::{
    AggregatorConfig, DataSourceSpec, DataSourceType, NullHandling, ObjectSelection, QualityObject,
    UpdatePolicyType, ValidityInterval,
};
use crate::domain::ports::{AggregatorInterface, Clock, Database, QualityObjectSink};

/// Per-aggregator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorCounters {
    /// Times the aggregator ran
    pub fired: u64,
    /// Runs skipped or degraded because an input had no quality yet
    pub missing_inputs: u64,
    /// Runs where the aggregator failed
    pub exceptions: u64,
}

struct AggregatorSlot {
    config: AggregatorConfig,
    aggregator: Box<dyn AggregatorInterface>,
    counters: AggregatorCounters,
}

#[derive(Default)]
struct Inner {
    aggregators: BTreeMap<String, AggregatorSlot>,
    policies: UpdatePolicyManager,
    cache: BTreeMap<String, QualityObject>,
    storage_failures: u64,
}

/// Runs aggregators over the quality objects produced by checks and by other aggregators
pub struct AggregatorRunner {
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    null_handling: NullHandling,
    downstream: Option<Arc<dyn QualityObjectSink>>,
    inner: Mutex<Inner>,
}

fn cache_key(qo: &QualityObject) -> String {
    format!("{}/{}", qo.check_name(), qo.name())
}

fn input_matchers(source: &DataSourceSpec, policy: UpdatePolicyType) -> Vec<InputMatcher> {
    match &source.qos {
        ObjectSelection::All => vec![InputMatcher::parse(&format!("{}/*", source.name))],
        ObjectSelection::Names(names) => names
            .iter()
            .map(|name| {
                let key = format!("{}/{}", source.name, name);
                if policy == UpdatePolicyType::OnGlobalAny {
                    InputMatcher::parse(&key)
                } else {
                    InputMatcher::Exact(key)
                }
            })
            .collect(),
    }
}

impl AggregatorRunner {
    /// Runner storing its results in `database`.
    pub fn new(database: Arc<dyn Database>, clock: Arc<dyn Clock>, null_handling: NullHandling) -> Self {
        Self {
            database,
            clock,
            null_handling,
            downstream: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Forward aggregated results to another sink as well.
    #[must_use]
    pub fn with_downstream(mut self, downstream: Arc<dyn QualityObjectSink>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Register an aggregator; its sources decide when it fires.
    pub fn add_aggregator(
        &mut self,
        name: impl Into<String>,
        config: AggregatorConfig,
        mut aggregator: Box<dyn AggregatorInterface>,
    ) -> Result<(), QcError> {
        let name = name.into();
        let null_handling = self.null_handling;
        guarded(|| aggregator.configure(&config.aggregator_parameters, null_handling)).map_err(|err| {
            QcError::Configuration(format!("aggregator '{name}' failed to configure: {err:#}"))
        })?;

        let matchers = config
            .data_source
            .iter()
            .filter(|source| matches!(source.kind, DataSourceType::Check | DataSourceType::Aggregator))
            .flat_map(|source| input_matchers(source, config.policy))
            .collect();
        let inner = self.inner.get_mut();
        inner.policies.add_policy(name.clone(), config.policy, matchers);
        info!(aggregator = %name, policy = %config.policy, "aggregator registered");
        inner.aggregators.insert(
            name,
            AggregatorSlot {
                config,
                aggregator,
                counters: AggregatorCounters::default(),
            },
        );
        Ok(())
    }

    pub async fn counters(&self, aggregator: &str) -> Option<AggregatorCounters> {
        self.inner
            .lock()
            .await
            .aggregators
            .get(aggregator)
            .map(|slot| slot.counters)
    }

    /// Results the store refused.
    pub async fn storage_failures(&self) -> u64 {
        self.inner.lock().await.storage_failures
    }

    pub async fn start_of_activity(&self) {
        let mut inner = self.inner.lock().await;
        inner.policies.reset();
        inner.cache.clear();
    }

    /// Aggregate a batch of quality objects.
    ///
    /// Aggregators are evaluated repeatedly until none is ready, so that an
    /// aggregator reading another aggregator sees its result in the same
    /// batch. Each aggregator fires at most once per batch.
    pub async fn process(&self, qualities: Vec<QualityObject>) -> Result<Vec<QualityObject>, QcError> {
        let results = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            for qo in qualities {
                let key = cache_key(&qo);
                inner.policies.update_object_revision(key.clone());
                inner.cache.insert(key, qo);
            }

            let mut results = Vec::new();
            for _ in 0..=inner.aggregators.len() {
                let ready: Vec<String> = inner
                    .aggregators
                    .keys()
                    .filter(|name| inner.policies.is_ready(name))
                    .cloned()
                    .collect();
                if ready.is_empty() {
                    break;
                }
                for name in ready {
                    let produced = self.fire(inner, &name);
                    inner.policies.update_actor_revision(&name);
                    for qo in produced {
                        let key = cache_key(&qo);
                        inner.policies.update_object_revision(key.clone());
                        inner.cache.insert(key, qo.clone());
                        results.push(qo);
                    }
                }
            }
            inner.policies.update_global_revision();

            for qo in &results {
                if let Err(err) = self.database.store_qo(qo).await {
                    inner.storage_failures += 1;
                    error!(object = %qo.full_path(), error = %err, "failed to store aggregated quality");
                }
            }
            results
        };

        if let Some(downstream) = &self.downstream {
            if !results.is_empty() {
                downstream.publish_qualities(results.clone()).await?;
            }
        }
        Ok(results)
    }

    fn fire(&self, inner: &mut Inner, name: &str) -> Vec<QualityObject> {
        let invocations: Vec<Vec<String>> = match inner.policies.policy(name) {
            Some(UpdatePolicyType::OnEachSeparately) => inner
                .policies
                .updated_inputs(name)
                .into_iter()
                .map(|key| vec![key])
                .collect(),
            Some(_) => {
                let mut keys = inner.policies.available_inputs(name);
                keys.extend(inner.policies.missing_inputs(name));
                vec![keys]
            }
            None => return Vec::new(),
        };

        let Some(slot) = inner.aggregators.get_mut(name) else {
            return Vec::new();
        };
        let mut produced = Vec::new();
        for keys in invocations {
            let mut inputs = BTreeMap::new();
            for key in &keys {
                match inner.cache.get(key) {
                    Some(qo) => {
                        inputs.insert(key.clone(), qo.clone());
                    }
                    None => break,
                }
            }
            if inputs.len() != keys.len() || inputs.is_empty() {
                slot.counters.missing_inputs += 1;
                debug!(aggregator = %name, "input missing, invocation skipped");
                continue;
            }

            let qualities = match guarded(|| slot.aggregator.aggregate(&inputs)) {
                Ok(qualities) => qualities,
                Err(err) => {
                    slot.counters.exceptions += 1;
                    warn!(aggregator = %name, error = %err, "aggregation failed");
                    continue;
                }
            };
            slot.counters.fired += 1;

            let cycle = inputs.values().map(QualityObject::cycle_number).max().unwrap_or(0);
            let validity = inputs
                .values()
                .filter_map(QualityObject::validity)
                .reduce(|a, b| a.union(&b));
            let activity = inputs
                .values()
                .next()
                .map(|qo| qo.activity().clone())
                .unwrap_or_default();
            let now = self.clock.now();

            for (quality_name, quality) in qualities {
                let mut qo = QualityObject::new(
                    quality,
                    name,
                    slot.config.detector_name.clone(),
                    slot.config.policy.as_str(),
                    keys.clone(),
                )
                .with_monitor_object(quality_name);
                qo.stamp(&activity, cycle, validity.or(Some(ValidityInterval::instant(now))), now);
                debug!(aggregator = %name, quality = %qo.quality(), object = %qo.name(), "aggregated");
                produced.push(qo);
            }
        }
        produced
    }
}

#[async_trait]
impl QualityObjectSink for AggregatorRunner {
    async fn publish_qualities(&self, qualities: Vec<QualityObject>) -> Result<(), QcError> {
        self.process(qualities).await.map(|_| ())
    }
}

impl std::fmt::Debug for AggregatorRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorRunner")
            .field("null_handling", &self.null_handling)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Activity, Quality};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::database::InMemoryDatabase;

    struct Worst {
        null_handling: NullHandling,
    }

    impl AggregatorInterface for Worst {
        fn configure(&mut self, _parameters: &BTreeMap<String, String>, null_handling: NullHandling) -> anyhow::Result<()> {
            self.null_handling = null_handling;
            Ok(())
        }

        fn aggregate(&self, inputs: &BTreeMap<String, QualityObject>) -> anyhow::Result<BTreeMap<String, Quality>> {
            let quality = Quality::aggregate(inputs.values().map(QualityObject::quality), self.null_handling);
            Ok(BTreeMap::from([("summary".to_string(), quality)]))
        }
    }

    fn config(sources: Vec<DataSourceSpec>) -> AggregatorConfig {
        AggregatorConfig {
            active: true,
            class_name: "Worst".into(),
            module_name: "builtin".into(),
            detector_name: "TST".into(),
            policy: UpdatePolicyType::OnAny,
            data_source: sources,
            aggregator_parameters: BTreeMap::new(),
        }
    }

    fn qo(check: &str, quality: Quality) -> QualityObject {
        let mut qo = QualityObject::new(quality, check, "TST", "OnAny", vec![]);
        qo.stamp(&Activity::new(3, "PHYSICS"), 2, None, chrono::Utc::now());
        qo
    }

    fn runner(null_handling: NullHandling) -> (AggregatorRunner, Arc<InMemoryDatabase>) {
        let database = Arc::new(InMemoryDatabase::new());
        let mut runner = AggregatorRunner::new(database.clone(), Arc::new(ManualClock::default()), null_handling);
        runner
            .add_aggregator(
                "Summary",
                config(vec![
                    DataSourceSpec::check("A", ObjectSelection::All),
                    DataSourceSpec::check("B", ObjectSelection::All),
                ]),
                Box::new(Worst {
                    null_handling: NullHandling::Worst,
                }),
            )
            .unwrap();
        (runner, database)
    }

    #[tokio::test]
    async fn test_worst_quality_wins() {
        let (runner, database) = runner(NullHandling::Worst);
        let results = runner
            .process(vec![qo("A", Quality::good()), qo("B", Quality::medium())])
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].quality(), &Quality::medium());
        assert_eq!(results[0].full_path(), "TST/QO/Summary/summary");
        assert_eq!(results[0].cycle_number(), 2);
        assert_eq!(results[0].activity().number, 3);
        assert_eq!(database.version_count().await, 1);
    }

    #[tokio::test]
    async fn test_null_handling_configurable() {
        let (ignoring, _) = runner(NullHandling::Ignore);
        let results = ignoring
            .process(vec![qo("A", Quality::null()), qo("B", Quality::good())])
            .await
            .unwrap();
        assert_eq!(results[0].quality(), &Quality::good());

        let (strict, _) = runner(NullHandling::Worst);
        let results = strict
            .process(vec![qo("A", Quality::null()), qo("B", Quality::good())])
            .await
            .unwrap();
        assert!(results[0].quality().is_null());
    }

    #[tokio::test]
    async fn test_aggregator_of_aggregator_in_same_batch() {
        let (mut runner, _) = runner(NullHandling::Worst);
        runner
            .add_aggregator(
                "Global",
                config(vec![DataSourceSpec {
                    kind: DataSourceType::Aggregator,
                    name: "Summary".into(),
                    mos: ObjectSelection::All,
                    qos: ObjectSelection::names(&["summary"]),
                }]),
                Box::new(Worst {
                    null_handling: NullHandling::Worst,
                }),
            )
            .unwrap();

        let results = runner.process(vec![qo("A", Quality::bad())]).await.unwrap();
        let paths: Vec<String> = results.iter().map(QualityObject::full_path).collect();
        assert_eq!(paths, vec!["TST/QO/Summary/summary", "TST/QO/Global/summary"]);
        assert!(results.iter().all(|qo| qo.quality() == &Quality::bad()));
        assert_eq!(runner.counters("Global").await.unwrap().fired, 1);
    }
}
