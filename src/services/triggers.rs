//! Runtime trigger sources for post-processing tasks.
//!
//! A [`TriggerSource`] turns a configured [`TriggerSpec`] into trigger
//! occurrences. Sources are polled; run and control events are pushed in
//! with [`TriggerSource::notify`] and fire on the next poll.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::domain::errors::QcError;
use crate::domain::models::{Activity, Trigger, TriggerSpec, TriggerType};
use crate::domain::ports::Database;

/// One configured trigger with its firing state
#[derive(Debug, Clone)]
pub struct TriggerSource {
    spec: TriggerSpec,
    fired_once: bool,
    /// Next due time of a periodic trigger.
    next_due: DateTime<Utc>,
    /// Newest version already reported by a new-object trigger.
    last_seen: DateTime<Utc>,
    pending: VecDeque<Trigger>,
}

impl TriggerSource {
    /// Arm a trigger at `now`. Periodic triggers are due immediately, then
    /// once per period; new-object triggers only report versions newer
    /// than `now`.
    pub fn new(spec: TriggerSpec, now: DateTime<Utc>) -> Self {
        Self {
            spec,
            fired_once: false,
            next_due: now,
            last_seen: now,
            pending: VecDeque::new(),
        }
    }

    pub const fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    /// Push an externally observed event; kept if this source reacts to it
    pub fn notify(&mut self, event: TriggerType, at: DateTime<Utc>, activity: &Activity) {
        if self.spec.trigger_type() == event && self.is_event_driven() {
            self.pending.push_back(Trigger::new(event, at, activity.clone()));
        }
    }

    const fn is_event_driven(&self) -> bool {
        matches!(
            self.spec,
            TriggerSpec::StartOfRun
                | TriggerSpec::EndOfRun
                | TriggerSpec::StartOfFill
                | TriggerSpec::EndOfFill
                | TriggerSpec::UserOrControl
        )
    }

    /// Check whether the trigger fires at `now`.
    ///
    /// Returns a `No` trigger when nothing happened.
    pub async fn poll(&mut self, now: DateTime<Utc>, activity: &Activity, database: &dyn Database) -> Trigger {
        if let Some(trigger) = self.pending.pop_front() {
            return trigger;
        }

        match &self.spec {
            TriggerSpec::Once => {
                if self.fired_once {
                    return Trigger::none(now);
                }
                self.fired_once = true;
                Trigger::new(TriggerType::Once, now, activity.clone()).last()
            }
            TriggerSpec::Always => Trigger::new(TriggerType::Always, now, activity.clone()),
            TriggerSpec::Periodic(period) => {
                if now < self.next_due {
                    return Trigger::none(now);
                }
                let step = Duration::from_std(*period).unwrap_or_else(|_| Duration::seconds(1));
                let mut next = self.next_due + step;
                while next <= now {
                    next += step;
                }
                self.next_due = next;
                Trigger::new(TriggerType::Periodic, now, activity.clone())
            }
            TriggerSpec::NewObject { path, name } => {
                let versions = match database.list_versions(path, name).await {
                    Ok(versions) => versions,
                    Err(err) => {
                        warn!(path = %path, name = %name, error = %err, "cannot look for new object versions");
                        return Trigger::none(now);
                    }
                };
                let newest = versions
                    .iter()
                    .filter(|version| version.timestamp <= now && version.activity.matches(activity))
                    .map(|version| version.timestamp)
                    .max();
                match newest {
                    Some(timestamp) if timestamp > self.last_seen => {
                        self.last_seen = timestamp;
                        debug!(path = %path, name = %name, %timestamp, "new object version");
                        let mut trigger = Trigger::new(TriggerType::NewObject, timestamp, activity.clone());
                        trigger.object_path = Some(format!("{path}/{name}"));
                        trigger
                    }
                    _ => Trigger::none(now),
                }
            }
            TriggerSpec::StartOfRun
            | TriggerSpec::EndOfRun
            | TriggerSpec::StartOfFill
            | TriggerSpec::EndOfFill
            | TriggerSpec::UserOrControl => Trigger::none(now),
        }
    }
}

/// The triggers of one callback kind; fires if any source fires
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    sources: Vec<TriggerSource>,
}

impl TriggerSet {
    /// Parse configured trigger strings and arm them at `now`
    pub fn parse(specs: &[String], now: DateTime<Utc>) -> Result<Self, QcError> {
        let sources = specs
            .iter()
            .map(|spec| spec.parse::<TriggerSpec>().map(|spec| TriggerSource::new(spec, now)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { sources })
    }

    /// Re-arm every source at `now`, keeping the configured specs
    pub fn rearm(&mut self, now: DateTime<Utc>) {
        for source in &mut self.sources {
            *source = TriggerSource::new(source.spec.clone(), now);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Forward a lifecycle event to every source.
    pub fn notify(&mut self, event: TriggerType, at: DateTime<Utc>, activity: &Activity) {
        for source in &mut self.sources {
            source.notify(event, at, activity);
        }
    }

    /// First firing source, in configuration order
    pub async fn poll(&mut self, now: DateTime<Utc>, activity: &Activity, database: &dyn Database) -> Trigger {
        for source in &mut self.sources {
            let trigger = source.poll(now, activity, database).await;
            if trigger.fired() {
                return trigger;
            }
        }
        Trigger::none(now)
    }
}
