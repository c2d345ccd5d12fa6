//! Ratio histograms merged through their components.
//!
//! A ratio payload never merges ratios directly: numerator and denominator
//! are merged bin-wise, and the visible ratio is recomputed from them.

use serde::{Deserialize, Serialize};

use super::histogram::Histogram1D;
use crate::domain::errors::MergeError;

/// Efficiency-like quotient of two 1D histograms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioHistogram {
    pub name: String,
    #[serde(default)]
    pub title: String,
    numerator: Histogram1D,
    denominator: Histogram1D,
    ratio: Histogram1D,
    /// Visible value given to bins whose denominator is zero, so they can be
    /// told apart from bins with an empty numerator. Presentation only.
    #[serde(default)]
    empty_bin_marker: Option<f64>,
}

impl RatioHistogram {
    /// Binned ratio over `[min, max)`, with empty numerator and denominator.
    pub fn new(name: impl Into<String>, bins: usize, min: f64, max: f64) -> Self {
        let name = name.into();
        let mut ratio = Self {
            numerator: Histogram1D::new(format!("{name}_num"), bins, min, max),
            denominator: Histogram1D::new(format!("{name}_den"), bins, min, max),
            ratio: Histogram1D::new(name.clone(), bins, min, max),
            title: String::new(),
            name,
            empty_bin_marker: None,
        };
        ratio.update();
        ratio
    }

    /// Build from existing components, which must share a binning.
    pub fn from_parts(
        name: impl Into<String>,
        numerator: Histogram1D,
        denominator: Histogram1D,
    ) -> Result<Self, MergeError> {
        if numerator.axis != denominator.axis {
            return Err(MergeError::AxisMismatch(
                "numerator and denominator binnings differ".to_string(),
            ));
        }
        let name = name.into();
        let axis = numerator.axis;
        let mut ratio = Self {
            ratio: Histogram1D::new(name.clone(), axis.bins, axis.min, axis.max),
            numerator,
            denominator,
            title: String::new(),
            name,
            empty_bin_marker: None,
        };
        ratio.update();
        Ok(ratio)
    }

    /// Count one candidate at `x`, and one success if `passed`. The visible
    /// ratio of the touched bin is refreshed.
    pub fn fill(&mut self, x: f64, passed: bool) {
        self.denominator.fill(x);
        if passed {
            self.numerator.fill(x);
        }
        self.update_bin(self.denominator.axis.find_bin(x));
        self.ratio.set_entries(self.denominator.entries());
    }

    pub const fn numerator(&self) -> &Histogram1D {
        &self.numerator
    }

    pub const fn denominator(&self) -> &Histogram1D {
        &self.denominator
    }

    /// Mutable components; call [`RatioHistogram::update`] after editing them.
    pub fn components_mut(&mut self) -> (&mut Histogram1D, &mut Histogram1D) {
        (&mut self.numerator, &mut self.denominator)
    }

    /// The visible ratio, current after fills, merges and [`RatioHistogram::update`].
    pub const fn ratio(&self) -> &Histogram1D {
        &self.ratio
    }

    pub const fn empty_bin_marker(&self) -> Option<f64> {
        self.empty_bin_marker
    }

    pub fn set_empty_bin_marker(&mut self, marker: Option<f64>) {
        self.empty_bin_marker = marker;
        self.update();
    }

    /// Recompute the visible ratio from numerator and denominator.
    pub fn update(&mut self) {
        for bin in 0..=self.numerator.bins() + 1 {
            self.update_bin(bin);
        }
        self.ratio.set_entries(self.denominator.entries());
    }

    fn update_bin(&mut self, bin: usize) {
        let num = self.numerator.bin_content(bin);
        let den = self.denominator.bin_content(bin);
        if den == 0.0 {
            self.ratio
                .set_bin_content(bin, self.empty_bin_marker.unwrap_or(0.0));
            self.ratio.set_bin_error(bin, 0.0);
        } else {
            let value = num / den;
            let error = if num == 0.0 {
                0.0
            } else {
                let rel_num = self.numerator.bin_error(bin) / num;
                let rel_den = self.denominator.bin_error(bin) / den;
                value.abs() * rel_num.hypot(rel_den)
            };
            self.ratio.set_bin_content(bin, value);
            self.ratio.set_bin_error(bin, error);
        }
    }

    pub fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        self.numerator.merge(&other.numerator)?;
        self.denominator.merge(&other.denominator)?;
        self.update();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.numerator.reset();
        self.denominator.reset();
        self.update();
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.numerator.approx_eq(&other.numerator, tolerance)
            && self.denominator.approx_eq(&other.denominator, tolerance)
    }
}
