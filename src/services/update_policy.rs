//! Revision-based update policies for checks and aggregators.
//!
//! Every received object is stamped with the current global revision. An
//! actor (a check or an aggregator) remembers the revision at which it last
//! fired, so "updated" means "object revision newer than the actor's". The
//! global revision advances once per processed batch, which makes a batch
//! the unit in which each actor fires at most once.

use glob::Pattern;
use std::collections::{BTreeMap, HashMap};

use crate::domain::models::UpdatePolicyType;

/// How an actor selects its inputs among the known objects
#[derive(Debug, Clone)]
pub enum InputMatcher {
    /// One declared object, e.g. `Task/h1`.
    Exact(String),
    /// Every object whose key matches, e.g. `Task/*`.
    Pattern(Pattern),
}

impl InputMatcher {
    /// Parse a glob; keys without wildcards stay exact.
    pub fn parse(key: &str) -> Self {
        if key.contains(['*', '?', '[']) {
            if let Ok(pattern) = Pattern::new(key) {
                return Self::Pattern(pattern);
            }
        }
        Self::Exact(key.to_string())
    }

    /// Whether `key` is covered by this matcher.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Pattern(pattern) => pattern.matches(key),
        }
    }
}

#[derive(Debug, Clone)]
struct ActorPolicy {
    policy: UpdatePolicyType,
    inputs: Vec<InputMatcher>,
    revision: u64,
}

/// Tracks object and actor revisions and decides who fires
#[derive(Debug, Clone)]
pub struct UpdatePolicyManager {
    global_revision: u64,
    object_revisions: HashMap<String, u64>,
    actors: BTreeMap<String, ActorPolicy>,
}

impl Default for UpdatePolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatePolicyManager {
    pub fn new() -> Self {
        Self {
            global_revision: 1,
            object_revisions: HashMap::new(),
            actors: BTreeMap::new(),
        }
    }

    /// Register `actor` with its policy and the inputs it waits for.
    pub fn add_policy(&mut self, actor: impl Into<String>, policy: UpdatePolicyType, inputs: Vec<InputMatcher>) {
        self.actors.insert(
            actor.into(),
            ActorPolicy {
                policy,
                inputs,
                revision: 0,
            },
        );
    }

    pub fn policy(&self, actor: &str) -> Option<UpdatePolicyType> {
        self.actors.get(actor).map(|a| a.policy)
    }

    /// Revision of the most recent update seen by any actor.
    pub const fn global_revision(&self) -> u64 {
        self.global_revision
    }

    /// Record that an object was received in the current batch
    pub fn update_object_revision(&mut self, key: impl Into<String>) {
        self.object_revisions.insert(key.into(), self.global_revision);
    }

    /// Record that an actor fired in the current batch
    pub fn update_actor_revision(&mut self, actor: &str) {
        if let Some(policy) = self.actors.get_mut(actor) {
            policy.revision = self.global_revision;
        }
    }

    /// Close the current batch
    pub fn update_global_revision(&mut self) {
        self.global_revision += 1;
    }

    /// Forget every object, e.g. at the start of an activity
    pub fn reset(&mut self) {
        self.object_revisions.clear();
        for actor in self.actors.values_mut() {
            actor.revision = 0;
        }
        self.global_revision = 1;
    }

    /// Known object keys selected by the actor, sorted
    pub fn available_inputs(&self, actor: &str) -> Vec<String> {
        let Some(policy) = self.actors.get(actor) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = self
            .object_revisions
            .keys()
            .filter(|key| policy.inputs.iter().any(|m| m.matches(key)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Selected objects received since the actor last fired, sorted
    pub fn updated_inputs(&self, actor: &str) -> Vec<String> {
        let Some(policy) = self.actors.get(actor) else {
            return Vec::new();
        };
        let mut keys: Vec<String> = self
            .object_revisions
            .iter()
            .filter(|(key, revision)| {
                **revision > policy.revision && policy.inputs.iter().any(|m| m.matches(key))
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Declared exact inputs that were never received
    pub fn missing_inputs(&self, actor: &str) -> Vec<String> {
        let Some(policy) = self.actors.get(actor) else {
            return Vec::new();
        };
        policy
            .inputs
            .iter()
            .filter_map(|m| match m {
                InputMatcher::Exact(key) if !self.object_revisions.contains_key(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether the actor's policy is satisfied in the current batch
    pub fn is_ready(&self, actor: &str) -> bool {
        let Some(policy) = self.actors.get(actor) else {
            return false;
        };
        let available = self.available_inputs(actor);
        let updated = self.updated_inputs(actor);

        match policy.policy {
            UpdatePolicyType::OnAny
            | UpdatePolicyType::OnEachSeparately
            | UpdatePolicyType::OnGlobalAny => !updated.is_empty(),
            UpdatePolicyType::OnAll => {
                !available.is_empty()
                    && self.missing_inputs(actor).is_empty()
                    && updated.len() == available.len()
            }
            UpdatePolicyType::OnAnyNonZero => {
                !available.is_empty() && self.missing_inputs(actor).is_empty() && !updated.is_empty()
            }
        }
    }
}
