//! Check runner: evaluates checks over published cycles.
//!
//! For every received cycle the runner caches the objects, lets the update
//! policies decide which checks fire, dispatches on the accepted payload
//! kind, runs the checks in isolation and publishes one quality object per
//! invocation. Objects of the cycle are stored once, after beautification,
//! followed by the quality objects.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::guard::guarded;
use super::update_policy::{InputMatcher, UpdatePolicyManager};
use crate::domain::errors::QcError;
use crate::domain::models::{
    Activity, CheckConfig, DataSourceSpec, FlagKind, MonitorObject, ObjectSelection, Quality,
    QualityObject, UpdatePolicyType, ValidityInterval,
};
use crate::domain::ports::{
    CheckInterface, Clock, Database, MonitorObjectSink, PublishedCycle, QualityObjectSink,
};

/// Per-check statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckCounters {
    /// Invocations that produced a quality object.
    pub fired: u64,
    /// Invocations skipped because a declared input was never produced.
    pub missing_inputs: u64,
    /// Runs where the check failed
    pub exceptions: u64,
    /// Inputs the check declined because of their type
    pub wrong_type: u64,
}

struct CheckSlot {
    config: CheckConfig,
    check: Box<dyn CheckInterface>,
    counters: CheckCounters,
}

#[derive(Default)]
struct Inner {
    checks: BTreeMap<String, CheckSlot>,
    policies: UpdatePolicyManager,
    /// Latest object per `<task>/<name>`.
    cache: BTreeMap<String, MonitorObject>,
    /// Detector of every known producer, used to find objects in the database.
    producers: HashMap<String, String>,
    activity: Activity,
    storage_failures: u64,
}

/// Runs every configured check against incoming cycles
pub struct CheckRunner {
    database: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    downstream: Option<Arc<dyn QualityObjectSink>>,
    inner: Mutex<Inner>,
}

/// Cache keys selected by one data source
fn input_matchers(source: &DataSourceSpec, policy: UpdatePolicyType) -> Vec<InputMatcher> {
    match &source.mos {
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

fn wrong_type_quality(check: &dyn CheckInterface, inputs: &BTreeMap<String, MonitorObject>) -> Option<Quality> {
    let accepted = check.accepted_type();
    inputs
        .values()
        .find(|mo| !mo.payload().is_a(accepted))
        .map(|_| Quality::null().with_flag(FlagKind::WrongType, format!("expected {}", accepted.description())))
}

impl CheckRunner {
    /// Runner storing results in `database`, stamped by `clock`.
    pub fn new(database: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            database,
            clock,
            downstream: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Forward produced quality objects, e.g. to an aggregator runner
    #[must_use]
    pub fn with_downstream(mut self, downstream: Arc<dyn QualityObjectSink>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Configure a check and register its update policy
    pub fn add_check(
        &mut self,
        name: impl Into<String>,
        config: CheckConfig,
        mut check: Box<dyn CheckInterface>,
    ) -> Result<(), QcError> {
        let name = name.into();
        guarded(|| check.configure(&config.check_parameters)).map_err(|err| {
            QcError::Configuration(format!("check '{name}' failed to configure: {err:#}"))
        })?;

        let inner = self.inner.get_mut();
        let matchers = config
            .data_source
            .iter()
            .flat_map(|source| input_matchers(source, config.policy))
            .collect();
        inner.policies.add_policy(name.clone(), config.policy, matchers);
        info!(check = %name, policy = %config.policy, class = %config.class_name, "check registered");
        inner.checks.insert(
            name,
            CheckSlot {
                config,
                check,
                counters: CheckCounters::default(),
            },
        );
        Ok(())
    }

    /// Declare the detector a task publishes under, so that inputs missing
    /// from the cache can be looked up in the database.
    pub async fn register_producer(&self, task: impl Into<String>, detector: impl Into<String>) {
        self.inner
            .lock()
            .await
            .producers
            .insert(task.into(), detector.into());
    }

    pub async fn check_names(&self) -> Vec<String> {
        self.inner.lock().await.checks.keys().cloned().collect()
    }

    /// Counters of one check.
    pub async fn counters(&self, check: &str) -> Option<CheckCounters> {
        self.inner.lock().await.checks.get(check).map(|slot| slot.counters)
    }

    pub async fn all_counters(&self) -> BTreeMap<String, CheckCounters> {
        self.inner
            .lock()
            .await
            .checks
            .iter()
            .map(|(name, slot)| (name.clone(), slot.counters))
            .collect()
    }

    /// Results the store refused.
    pub async fn storage_failures(&self) -> u64 {
        self.inner.lock().await.storage_failures
    }

    /// Forget cached objects and notify every check
    pub async fn start_of_activity(&self, activity: &Activity) {
        let mut inner = self.inner.lock().await;
        inner.policies.reset();
        inner.cache.clear();
        inner.activity = activity.clone();
        for (name, slot) in &mut inner.checks {
            let result = guarded(|| {
                slot.check.start_of_activity(activity);
                Ok(())
            });
            if let Err(err) = result {
                slot.counters.exceptions += 1;
                warn!(check = %name, error = %err, "start_of_activity failed");
            }
        }
    }

    pub async fn end_of_activity(&self, activity: &Activity) {
        let mut inner = self.inner.lock().await;
        for (name, slot) in &mut inner.checks {
            let result = guarded(|| {
                slot.check.end_of_activity(activity);
                Ok(())
            });
            if let Err(err) = result {
                slot.counters.exceptions += 1;
                warn!(check = %name, error = %err, "end_of_activity failed");
            }
        }
    }

    /// Evaluate the checks for one cycle and publish the results.
    ///
    /// Plugin faults and storage errors are logged and counted; only a
    /// failure of the downstream sink is returned.
    pub async fn process(&self, cycle: PublishedCycle) -> Result<Vec<QualityObject>, QcError> {
        let qualities = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;

            let mut batch = Vec::with_capacity(cycle.objects.len());
            for object in cycle.objects {
                let key = object.cache_key();
                inner
                    .producers
                    .entry(object.task_name().to_string())
                    .or_insert_with(|| object.detector().to_string());
                inner.activity = object.activity().clone();
                inner.policies.update_object_revision(key.clone());
                inner.cache.insert(key.clone(), object);
                batch.push(key);
            }

            let mut qualities = Vec::new();
            let names: Vec<String> = inner.checks.keys().cloned().collect();
            for name in names {
                if !inner.policies.is_ready(&name) {
                    continue;
                }
                let invocations = Self::invocations(inner, &name);
                for keys in invocations {
                    if let Some(qo) = self.invoke(inner, &name, keys).await {
                        qualities.push(qo);
                    }
                }
                inner.policies.update_actor_revision(&name);
            }
            inner.policies.update_global_revision();

            for key in &batch {
                let Some(object) = inner.cache.get(key) else {
                    continue;
                };
                if let Err(err) = self.database.store_mo(object).await {
                    inner.storage_failures += 1;
                    error!(object = %object.full_path(), error = %err, "failed to store monitor object");
                }
            }
            for qo in &qualities {
                if let Err(err) = self.database.store_qo(qo).await {
                    inner.storage_failures += 1;
                    error!(object = %qo.full_path(), error = %err, "failed to store quality object");
                }
            }
            debug!(
                task = %cycle.task_name,
                cycle = cycle.cycle_number,
                objects = batch.len(),
                qualities = qualities.len(),
                "cycle checked"
            );
            qualities
        };

        if let Some(downstream) = &self.downstream {
            if !qualities.is_empty() {
                downstream.publish_qualities(qualities.clone()).await?;
            }
        }
        Ok(qualities)
    }

    /// Input key sets of each invocation a ready check makes in this batch
    fn invocations(inner: &Inner, name: &str) -> Vec<Vec<String>> {
        match inner.policies.policy(name) {
            Some(UpdatePolicyType::OnEachSeparately) => inner
                .policies
                .updated_inputs(name)
                .into_iter()
                .map(|key| vec![key])
                .collect(),
            Some(_) => {
                let mut keys = inner.policies.available_inputs(name);
                keys.extend(inner.policies.missing_inputs(name));
                keys.sort();
                keys.dedup();
                vec![keys]
            }
            None => Vec::new(),
        }
    }

    /// Latest version of an input: the cache, else the database
    async fn gather(&self, inner: &mut Inner, key: &str) -> Option<MonitorObject> {
        if let Some(object) = inner.cache.get(key) {
            return Some(object.clone());
        }
        let (task, name) = key.split_once('/')?;
        let detector = inner.producers.get(task)?;
        let path = format!("{detector}/MO/{task}");
        match self.database.retrieve_mo(&path, name, None, &inner.activity).await {
            Ok(Some(object)) => {
                debug!(object = %key, "input loaded from database");
                inner.cache.insert(key.to_string(), object.clone());
                Some(object)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(object = %key, error = %err, "failed to load input from database");
                None
            }
        }
    }

    async fn invoke(&self, inner: &mut Inner, name: &str, keys: Vec<String>) -> Option<QualityObject> {
        if keys.is_empty() {
            return None;
        }

        let mut inputs = BTreeMap::new();
        for key in &keys {
            let Some(object) = self.gather(inner, key).await else {
                if let Some(slot) = inner.checks.get_mut(name) {
                    slot.counters.missing_inputs += 1;
                }
                debug!(check = %name, object = %key, "input missing, invocation skipped");
                return None;
            };
            inputs.insert(object.name().to_string(), object);
        }

        let slot = inner.checks.get_mut(name)?;
        let mut beautify = slot.config.data_source.len() == 1;
        let quality = if let Some(quality) = wrong_type_quality(slot.check.as_ref(), &inputs) {
            slot.counters.wrong_type += 1;
            warn!(check = %name, reason = ?quality.flags().first().map(|f| f.reason.clone()), "wrong input type");
            beautify = false;
            quality
        } else {
            match guarded(|| slot.check.check(&inputs)) {
                Ok(quality) => quality,
                Err(err) => {
                    slot.counters.exceptions += 1;
                    warn!(check = %name, error = %err, "check failed");
                    beautify = false;
                    Quality::null().with_flag(FlagKind::CheckException, err.to_string())
                }
            }
        };
        slot.counters.fired += 1;

        for key in &keys {
            let Some(object) = inner.cache.get_mut(key) else {
                continue;
            };
            if beautify {
                if let Err(err) = guarded(|| slot.check.beautify(object, &quality)) {
                    slot.counters.exceptions += 1;
                    warn!(check = %name, object = %key, error = %err, "beautify failed");
                }
            }
            object.set_check_quality(name, quality.clone());
        }

        let cycle = inputs.values().map(MonitorObject::cycle_number).max().unwrap_or(0);
        let validity = inputs
            .values()
            .filter_map(MonitorObject::validity)
            .reduce(|a, b| a.union(&b));
        let activity = inputs
            .values()
            .next()
            .map_or_else(|| inner.activity.clone(), |mo| mo.activity().clone());

        let mut qo = QualityObject::new(
            quality,
            name,
            slot.config.detector_name.clone(),
            slot.config.policy.as_str(),
            keys,
        );
        if inputs.len() == 1 {
            if let Some(object) = inputs.keys().next() {
                qo = qo.with_monitor_object(object.clone());
            }
        }
        let now = self.clock.now();
        qo.stamp(&activity, cycle, validity.or(Some(ValidityInterval::instant(now))), now);
        debug!(check = %name, quality = %qo.quality(), cycle, "check fired");
        Some(qo)
    }
}

#[async_trait]
impl MonitorObjectSink for CheckRunner {
    async fn publish(&self, cycle: PublishedCycle) -> Result<(), QcError> {
        self.process(cycle).await.map(|_| ())
    }
}

impl std::fmt::Debug for CheckRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRunner")
            .field("has_downstream", &self.downstream.is_some())
            .finish_non_exhaustive()
    }
}
