//! Threshold checks over 1D histograms.

use std::collections::BTreeMap;

use anyhow::Context;

use crate::domain::models::quality::{BAD_LEVEL, GOOD_LEVEL};
use crate::domain::models::{Decoration, FlagKind, MonitorObject, NullHandling, PayloadKind, Quality};
use crate::domain::ports::CheckInterface;

fn parameter<T>(parameters: &BTreeMap<String, String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match parameters.get(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value '{value}' for parameter '{key}'")),
        None => Ok(default),
    }
}

fn color(quality: &Quality) -> &'static str {
    match quality.level() {
        GOOD_LEVEL => "green",
        BAD_LEVEL => "red",
        _ if quality.is_null() => "gray",
        _ => "orange",
    }
}

/// Keep the worst of two verdicts, collecting flags and metadata of both
fn worst(current: Option<Quality>, next: Quality) -> Quality {
    let Some(current) = current else {
        return next;
    };
    let mut result = Quality::aggregate([&current, &next], NullHandling::Worst);
    for (key, value) in current.metadata().iter().chain(next.metadata()) {
        result.add_metadata(key.clone(), value.clone());
    }
    result
}

/// Judges the fraction of channels (bins) whose content lies in `[min, max]`.
///
/// Parameters: `min`, `max`, `minGoodFraction` (inclusive, default 0.9) and
/// optionally `minMediumFraction`, below which the verdict is Bad instead
/// of Medium.
#[derive(Debug, Clone)]
pub struct ThresholdFractionCheck {
    min: f64,
    max: f64,
    min_good_fraction: f64,
    min_medium_fraction: Option<f64>,
}

impl Default for ThresholdFractionCheck {
    fn default() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            min_good_fraction: 0.9,
            min_medium_fraction: None,
        }
    }
}

impl ThresholdFractionCheck {
    /// Fraction of in-range bins whose content lies in `[min, max]`
    pub fn good_fraction(&self, contents: &[f64]) -> f64 {
        if contents.is_empty() {
            return 0.0;
        }
        let good = contents
            .iter()
            .filter(|content| (self.min..=self.max).contains(*content))
            .count();
        good as f64 / contents.len() as f64
    }

    fn judge(&self, object: &MonitorObject) -> Quality {
        let Some(histogram) = object.payload().histogram1d_view() else {
            return Quality::null().with_flag(FlagKind::WrongType, "expected 1D histogram");
        };
        let fraction = self.good_fraction(histogram.in_range());
        let mut quality = if fraction >= self.min_good_fraction {
            Quality::good()
        } else if self.min_medium_fraction.is_some_and(|medium| fraction >= medium) {
            Quality::medium().with_flag(
                FlagKind::Unknown,
                format!("{}: {:.1}% of channels in range", object.name(), fraction * 100.0),
            )
        } else {
            Quality::bad().with_flag(
                FlagKind::Unknown,
                format!("{}: only {:.1}% of channels in range", object.name(), fraction * 100.0),
            )
        };
        quality.add_metadata(format!("{}.goodFraction", object.name()), format!("{fraction:.4}"));
        quality
    }
}

impl CheckInterface for ThresholdFractionCheck {
    fn configure(&mut self, parameters: &BTreeMap<String, String>) -> anyhow::Result<()> {
        self.min = parameter(parameters, "min", f64::NEG_INFINITY)?;
        self.max = parameter(parameters, "max", f64::INFINITY)?;
        self.min_good_fraction = parameter(parameters, "minGoodFraction", 0.9)?;
        self.min_medium_fraction = parameters
            .get("minMediumFraction")
            .map(|value| value.trim().parse::<f64>())
            .transpose()
            .context("invalid value for parameter 'minMediumFraction'")?;
        if self.min > self.max {
            anyhow::bail!("min ({}) is above max ({})", self.min, self.max);
        }
        if !(0.0..=1.0).contains(&self.min_good_fraction) {
            anyhow::bail!("minGoodFraction must be within [0, 1], got {}", self.min_good_fraction);
        }
        Ok(())
    }

    fn check(&self, objects: &BTreeMap<String, MonitorObject>) -> anyhow::Result<Quality> {
        let mut result = None;
        for object in objects.values() {
            result = Some(worst(result, self.judge(object)));
        }
        Ok(result.unwrap_or_else(Quality::null))
    }

    fn beautify(&self, object: &mut MonitorObject, quality: &Quality) -> anyhow::Result<()> {
        let color = color(quality).to_string();
        if self.min.is_finite() {
            object.decorate(
                "threshold_min",
                Decoration::Line {
                    value: self.min,
                    vertical: false,
                    color: color.clone(),
                },
            );
        }
        if self.max.is_finite() {
            object.decorate(
                "threshold_max",
                Decoration::Line {
                    value: self.max,
                    vertical: false,
                    color: color.clone(),
                },
            );
        }
        object.decorate(
            "threshold_caption",
            Decoration::Caption {
                text: format!("Quality: {quality}"),
                color,
            },
        );
        Ok(())
    }

    fn accepted_type(&self) -> PayloadKind {
        PayloadKind::Histogram1D
    }
}

/// Judges the histogram mean against `[meanMin, meanMax]`.
///
/// An empty histogram yields Null with a "no detector data" flag.
#[derive(Debug, Clone)]
pub struct MeanThresholdCheck {
    mean_min: f64,
    mean_max: f64,
}

impl Default for MeanThresholdCheck {
    fn default() -> Self {
        Self {
            mean_min: f64::NEG_INFINITY,
            mean_max: f64::INFINITY,
        }
    }
}

impl CheckInterface for MeanThresholdCheck {
    fn configure(&mut self, parameters: &BTreeMap<String, String>) -> anyhow::Result<()> {
        self.mean_min = parameter(parameters, "meanMin", f64::NEG_INFINITY)?;
        self.mean_max = parameter(parameters, "meanMax", f64::INFINITY)?;
        if self.mean_min > self.mean_max {
            anyhow::bail!("meanMin ({}) is above meanMax ({})", self.mean_min, self.mean_max);
        }
        Ok(())
    }

    fn check(&self, objects: &BTreeMap<String, MonitorObject>) -> anyhow::Result<Quality> {
        let mut result = None;
        for object in objects.values() {
            let histogram = object
                .payload()
                .histogram1d_view()
                .with_context(|| format!("'{}' has no 1D histogram view", object.name()))?;
            let quality = if histogram.integral() == 0.0 {
                Quality::null().with_flag(FlagKind::NoDetectorData, format!("'{}' is empty", object.name()))
            } else {
                let mean = histogram.mean();
                if (self.mean_min..=self.mean_max).contains(&mean) {
                    Quality::good()
                } else {
                    Quality::bad().with_flag(
                        FlagKind::Unknown,
                        format!(
                            "mean of '{}' is {mean:.3}, outside [{}, {}]",
                            object.name(),
                            self.mean_min,
                            self.mean_max
                        ),
                    )
                }
            };
            result = Some(worst(result, quality));
        }
        Ok(result.unwrap_or_else(Quality::null))
    }

    fn beautify(&self, object: &mut MonitorObject, quality: &Quality) -> anyhow::Result<()> {
        let color = color(quality).to_string();
        for (key, value) in [("mean_min", self.mean_min), ("mean_max", self.mean_max)] {
            if value.is_finite() {
                object.decorate(
                    key,
                    Decoration::Line {
                        value,
                        vertical: true,
                        color: color.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    fn accepted_type(&self) -> PayloadKind {
        PayloadKind::Histogram1D
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Histogram1D;

    fn pedestals(out_of_range: usize) -> MonitorObject {
        let mut h = Histogram1D::new("pedestals", 100, 0.0, 100.0);
        for bin in 1..=100 {
            let content = if bin <= out_of_range { 10.0 } else { 75.0 };
            h.set_bin_content(bin, content);
        }
        MonitorObject::new(h.into(), "Pedestals", "TST")
    }

    fn configured(parameters: &[(&str, &str)]) -> ThresholdFractionCheck {
        let mut check = ThresholdFractionCheck::default();
        let parameters = parameters
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        check.configure(&parameters).unwrap();
        check
    }

    fn run(check: &dyn CheckInterface, object: MonitorObject) -> Quality {
        check
            .check(&BTreeMap::from([(object.name().to_string(), object)]))
            .unwrap()
    }

    #[test]
    fn test_fraction_threshold_is_inclusive() {
        let check = configured(&[("min", "50"), ("max", "100"), ("minGoodFraction", "0.9")]);
        assert_eq!(run(&check, pedestals(10)), Quality::good());
        assert_eq!(run(&check, pedestals(11)), Quality::bad());
        assert_eq!(run(&check, pedestals(0)), Quality::good());
    }

    #[test]
    fn test_medium_band() {
        let check = configured(&[("min", "50"), ("max", "100"), ("minMediumFraction", "0.5")]);
        assert_eq!(run(&check, pedestals(30)), Quality::medium());
        assert_eq!(run(&check, pedestals(60)), Quality::bad());
    }

    #[test]
    fn test_invalid_parameters() {
        let mut check = ThresholdFractionCheck::default();
        let bad = BTreeMap::from([("min".to_string(), "abc".to_string())]);
        assert!(check.configure(&bad).is_err());
        let inverted = BTreeMap::from([
            ("min".to_string(), "10".to_string()),
            ("max".to_string(), "1".to_string()),
        ]);
        assert!(check.configure(&inverted).is_err());
    }

    #[test]
    fn test_beautify_is_idempotent() {
        let check = configured(&[("min", "50"), ("max", "100")]);
        let mut object = pedestals(0);
        let quality = run(&check, object.clone());
        check.beautify(&mut object, &quality).unwrap();
        let once = object.clone();
        check.beautify(&mut object, &quality).unwrap();
        assert_eq!(once, object);
        assert_eq!(object.decorations().len(), 3);
    }

    #[test]
    fn test_mean_threshold() {
        let mut check = MeanThresholdCheck::default();
        check
            .configure(&BTreeMap::from([
                ("meanMin".to_string(), "40".to_string()),
                ("meanMax".to_string(), "60".to_string()),
            ]))
            .unwrap();

        let mut h = Histogram1D::new("h", 100, 0.0, 100.0);
        h.fill(49.5);
        assert_eq!(run(&check, MonitorObject::new(h.into(), "T", "TST")), Quality::good());

        let mut h = Histogram1D::new("h", 100, 0.0, 100.0);
        h.fill(90.5);
        assert_eq!(run(&check, MonitorObject::new(h.into(), "T", "TST")), Quality::bad());

        let empty = Histogram1D::new("h", 100, 0.0, 100.0);
        let quality = run(&check, MonitorObject::new(empty.into(), "T", "TST"));
        assert!(quality.is_null());
        assert!(quality.has_flag(&FlagKind::NoDetectorData));
    }
}
