//! Activity: one run of the experiment.

use serde::{Deserialize, Serialize};
use std::fmt;

fn default_provenance() -> String {
    "qc".to_string()
}

/// Run identity under which every object is stored.
///
/// Used as a query filter too: a zero run number or an empty string field
/// matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Run number
    #[serde(default)]
    pub number: u32,

    /// Run type such as PHYSICS, TECHNICAL or COSMICS
    #[serde(default, rename = "type")]
    pub run_type: String,

    /// Data-taking period, e.g. LHC23a
    #[serde(default)]
    pub period_name: String,

    /// Reconstruction pass
    #[serde(default)]
    pub pass_name: String,

    /// Origin of the objects: "qc" for online, "qc_mc" for simulation
    #[serde(default = "default_provenance")]
    pub provenance: String,
}

impl Activity {
    /// Activity of run `number`, with the default provenance.
    pub fn new(number: u32, run_type: impl Into<String>) -> Self {
        Self {
            number,
            run_type: run_type.into(),
            ..Self::default()
        }
    }

    /// A filter matching every activity.
    pub fn any() -> Self {
        Self {
            number: 0,
            run_type: String::new(),
            period_name: String::new(),
            pass_name: String::new(),
            provenance: String::new(),
        }
    }

    #[must_use]
    pub fn with_period(mut self, period_name: impl Into<String>) -> Self {
        self.period_name = period_name.into();
        self
    }

    #[must_use]
    pub fn with_pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass_name = pass_name.into();
        self
    }

    #[must_use]
    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = provenance.into();
        self
    }

    /// Whether this activity satisfies `filter`, treating unset filter fields as wildcards.
    pub fn matches(&self, filter: &Self) -> bool {
        fn field_matches(value: &str, wanted: &str) -> bool {
            wanted.is_empty() || value == wanted
        }

        (filter.number == 0 || self.number == filter.number)
            && field_matches(&self.run_type, &filter.run_type)
            && field_matches(&self.period_name, &filter.period_name)
            && field_matches(&self.pass_name, &filter.pass_name)
            && field_matches(&self.provenance, &filter.provenance)
    }

    /// Number of fields that a filter pins down; used to pick the strictest of several.
    pub fn specificity(&self) -> usize {
        usize::from(self.number != 0)
            + [
                &self.run_type,
                &self.period_name,
                &self.pass_name,
                &self.provenance,
            ]
            .iter()
            .filter(|field| !field.is_empty())
            .count()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            number: 0,
            run_type: String::new(),
            period_name: String::new(),
            pass_name: String::new(),
            provenance: default_provenance(),
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} ({})", self.number, self.run_type)?;
        if !self.period_name.is_empty() {
            write!(f, " period {}", self.period_name)?;
        }
        if !self.pass_name.is_empty() {
            write!(f, " pass {}", self.pass_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matching() {
        let activity = Activity::new(42, "PHYSICS").with_period("LHC22a").with_pass("apass1");

        assert!(activity.matches(&Activity::any()));
        assert!(activity.matches(&Activity::new(42, "")));
        assert!(activity.matches(&Activity::any().with_period("LHC22a")));
        assert!(!activity.matches(&Activity::new(43, "")));
        assert!(!activity.matches(&Activity::new(0, "COSMICS")));
    }

    #[test]
    fn test_specificity() {
        assert_eq!(Activity::any().specificity(), 0);
        assert_eq!(Activity::new(1, "PHYSICS").specificity(), 3);
    }

    #[test]
    fn test_deserialize_config_shape() {
        let yaml = "number: 7\ntype: TECHNICAL\nperiodName: LHC23x\npassName: cpass0\n";
        let activity: Activity = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(activity.number, 7);
        assert_eq!(activity.run_type, "TECHNICAL");
        assert_eq!(activity.period_name, "LHC23x");
        assert_eq!(activity.provenance, "qc");
    }
}
