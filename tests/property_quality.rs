//! Properties of quality aggregation and of versioned retrieval.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use test_strategy::proptest;

use quality_control::domain::models::quality::NULL_LEVEL;
use quality_control::domain::models::{
    Activity, FlagKind, Graph, MonitorObject, NullHandling, Quality, ValidityInterval,
};
use quality_control::domain::ports::Database;
use quality_control::infrastructure::database::InMemoryDatabase;

fn quality() -> impl Strategy<Value = Quality> {
    (0_u32..=3, any::<bool>()).prop_map(|(level, flagged)| {
        let quality = Quality::from_level(level).expect("predefined level");
        if flagged {
            quality.with_flag(FlagKind::Unknown, format!("level {level}"))
        } else {
            quality
        }
    })
}

proptest! {
    /// Property: aggregation does not depend on input order
    #[test]
    fn prop_aggregation_order_independent(
        qualities in prop::collection::vec(quality(), 0..12),
        ignore_null in any::<bool>(),
    ) {
        let handling = if ignore_null { NullHandling::Ignore } else { NullHandling::Worst };
        let forward = Quality::aggregate(&qualities, handling);
        let backward = Quality::aggregate(qualities.iter().rev(), handling);
        prop_assert_eq!(forward, backward);
    }

    /// Property: no input is worse than the aggregate
    #[test]
    fn prop_aggregate_is_worst(qualities in prop::collection::vec(quality(), 1..12)) {
        let result = Quality::aggregate(&qualities, NullHandling::Worst);
        for quality in &qualities {
            prop_assert!(!quality.is_worse_than(&result), "{} worse than {}", quality, result);
        }
        prop_assert!(qualities.contains(&result));
    }
}

/// Property: every input flag survives aggregation
#[proptest]
fn prop_flags_are_collected(#[strategy(prop::collection::vec(quality(), 0..12))] qualities: Vec<Quality>) {
    let expected: usize = qualities.iter().map(|q| q.flags().len()).sum();
    let result = Quality::aggregate(&qualities, NullHandling::Ignore);
    prop_assert_eq!(result.flags().len(), expected);
}

/// Property: ignoring Null yields Null only when every input is Null
#[proptest]
fn prop_ignore_null_decides_when_possible(
    #[strategy(prop::collection::vec(quality(), 0..12))] qualities: Vec<Quality>,
) {
    let result = Quality::aggregate(&qualities, NullHandling::Ignore);
    let decided = qualities.iter().filter(|q| !q.is_null()).map(Quality::level).max();
    match decided {
        Some(level) => prop_assert_eq!(result.level(), level),
        None => prop_assert_eq!(result.level(), NULL_LEVEL),
    }
}

/// Property: retrieval returns the newest version at or before the timestamp
#[proptest(ProptestConfig::with_cases(32))]
fn prop_retrieval_picks_newest_before(
    #[strategy(prop::collection::btree_set(0_i64..1_000, 1..10))] offsets: std::collections::BTreeSet<i64>,
    #[strategy(0_i64..1_100)] query_offset: i64,
) {
    let database = InMemoryDatabase::new();
    let t0 = Utc::now() - Duration::seconds(2_000);
    let found = tokio_test::block_on(async {
        for offset in &offsets {
            let at = t0 + Duration::seconds(*offset);
            let mut graph = Graph::new("g");
            graph.add_point(*offset as f64, 0.0);
            let mut mo = MonitorObject::new(graph.into(), "Task", "TST");
            mo.stamp(&Activity::new(1, "PHYSICS"), 0, ValidityInterval::instant(at), at);
            database.store_mo(&mo).await.unwrap();
        }
        database
            .retrieve_mo("TST/MO/Task", "g", Some(t0 + Duration::seconds(query_offset)), &Activity::any())
            .await
            .unwrap()
    });

    let expected = offsets.range(..=query_offset).next_back().copied();
    let found = found.map(|mo| mo.payload().as_graph().unwrap().points()[0].x as i64);
    prop_assert_eq!(found, expected);
}
