//! Properties of the per-task object registry.

use std::collections::BTreeSet;

use proptest::prelude::*;
use test_strategy::proptest;

use quality_control::domain::models::{Histogram1D, ObjectsManager, PublicationPolicy};
use quality_control::QcError;

/// Property: a name is registered at most once, whatever the order of attempts
#[proptest]
fn prop_names_stay_unique(#[strategy(prop::collection::vec("[a-d]{1,2}", 0..30))] attempts: Vec<String>) {
    let mut objects = ObjectsManager::new("Task", "TST");
    let mut seen = BTreeSet::new();
    for name in &attempts {
        let result = objects.start_publishing(Histogram1D::new(name.clone(), 4, 0.0, 1.0), PublicationPolicy::Forever);
        if seen.insert(name.clone()) {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(matches!(result, Err(QcError::DuplicateObjectName(ref n)) if n == name));
        }
    }
    prop_assert_eq!(objects.len(), seen.len());
    prop_assert_eq!(objects.names().into_iter().collect::<BTreeSet<_>>(), seen);
}

/// Property: a stopped name can be published again
#[proptest]
fn prop_stop_frees_the_name(#[strategy("[a-z]{1,8}")] name: String) {
    let mut objects = ObjectsManager::new("Task", "TST");
    objects
        .start_publishing(Histogram1D::new(name.clone(), 4, 0.0, 1.0), PublicationPolicy::Forever)
        .unwrap();
    objects.stop_publishing(&name).unwrap();
    prop_assert!(!objects.is_being_published(&name));
    prop_assert!(objects
        .start_publishing(Histogram1D::new(name.clone(), 4, 0.0, 1.0), PublicationPolicy::Once)
        .is_ok());
}
