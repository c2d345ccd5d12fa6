use std::collections::BTreeMap;

use crate::domain::models::{NullHandling, Quality, QualityObject};

/// Contract of an Aggregator: reduce quality objects into named qualities.
pub trait AggregatorInterface: Send + Sync {
    fn configure(
        &mut self,
        parameters: &BTreeMap<String, String>,
        null_handling: NullHandling,
    ) -> anyhow::Result<()>;

    /// Inputs are keyed by `<check>/<name>`; results by quality name.
    fn aggregate(
        &self,
        inputs: &BTreeMap<String, QualityObject>,
    ) -> anyhow::Result<BTreeMap<String, Quality>>;
}
