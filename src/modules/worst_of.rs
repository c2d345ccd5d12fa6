//! Aggregator reducing its inputs to the single worst quality.

use std::collections::BTreeMap;

use crate::domain::models::{NullHandling, Quality, QualityObject};
use crate::domain::ports::AggregatorInterface;

const DEFAULT_RESULT_NAME: &str = "summary";

/// Worst input wins; flags of every input are carried over with the input
/// name prepended.
#[derive(Debug, Clone)]
pub struct WorstOfAggregator {
    result_name: String,
    null_handling: NullHandling,
}

impl Default for WorstOfAggregator {
    fn default() -> Self {
        Self {
            result_name: DEFAULT_RESULT_NAME.to_string(),
            null_handling: NullHandling::default(),
        }
    }
}

impl AggregatorInterface for WorstOfAggregator {
    fn configure(&mut self, parameters: &BTreeMap<String, String>, null_handling: NullHandling) -> anyhow::Result<()> {
        self.result_name = parameters
            .get("resultName")
            .map_or(DEFAULT_RESULT_NAME, |name| name.trim())
            .to_string();
        if self.result_name.is_empty() {
            anyhow::bail!("resultName must not be empty");
        }
        self.null_handling = null_handling;
        Ok(())
    }

    fn aggregate(&self, inputs: &BTreeMap<String, QualityObject>) -> anyhow::Result<BTreeMap<String, Quality>> {
        let mut result = Quality::aggregate(inputs.values().map(QualityObject::quality), self.null_handling);

        // Re-attribute flags to the object that raised them
        let mut attributed = Quality::new(result.level(), result.name());
        for (key, qo) in inputs {
            for flag in qo.quality().flags() {
                attributed.add_flag(flag.kind.clone(), format!("{key}: {}", flag.reason));
            }
        }
        if !inputs.is_empty() {
            result = attributed;
        }
        result.add_metadata("inputs", inputs.len().to_string());

        Ok(BTreeMap::from([(self.result_name.clone(), result)]))
    }
}
