//! Binned payloads: 1D and 2D histograms and profiles.
//!
//! Bin numbering follows the usual convention: bin 0 is the underflow,
//! bins `1..=bins` are in range and bin `bins + 1` is the overflow.
//! Every histogram keeps the sum of squared weights per bin so that bin
//! errors survive merging.

use serde::{Deserialize, Serialize};

use crate::domain::errors::MergeError;

/// Uniform binning over `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Number of in-range bins
    pub bins: usize,
    /// Lower edge, inclusive
    pub min: f64,
    /// Upper edge, exclusive
    pub max: f64,
}

impl Axis {
    /// Uniform axis of `bins` bins over `[min, max)`.
    pub const fn new(bins: usize, min: f64, max: f64) -> Self {
        Self { bins, min, max }
    }

    /// Bin index for `x`, including under/overflow.
    pub fn find_bin(&self, x: f64) -> usize {
        if x.is_nan() || x < self.min {
            0
        } else if x >= self.max {
            self.bins + 1
        } else {
            let width = (self.max - self.min) / self.bins as f64;
            (((x - self.min) / width) as usize).min(self.bins.saturating_sub(1)) + 1
        }
    }

    /// Width of one bin.
    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    /// Center of an in-range bin (1-based).
    pub fn bin_center(&self, bin: usize) -> f64 {
        self.min + (bin as f64 - 0.5) * self.bin_width()
    }

    fn check_compatible(&self, other: &Self) -> Result<(), MergeError> {
        if self == other {
            Ok(())
        } else {
            Err(MergeError::AxisMismatch(format!(
                "{} bins [{}, {}) vs {} bins [{}, {})",
                self.bins, self.min, self.max, other.bins, other.min, other.max
            )))
        }
    }
}

fn add_assign(target: &mut [f64], source: &[f64]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t += s;
    }
}

fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

/// One-dimensional histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    /// Name the object is published under
    pub name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Binning
    pub axis: Axis,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    entries: f64,
}

impl Histogram1D {
    /// Empty histogram; at least one bin is always allocated.
    pub fn new(name: impl Into<String>, bins: usize, min: f64, max: f64) -> Self {
        let bins = bins.max(1);
        Self {
            name: name.into(),
            title: String::new(),
            axis: Axis::new(bins, min, max),
            contents: vec![0.0; bins + 2],
            sumw2: vec![0.0; bins + 2],
            entries: 0.0,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add one unit-weight entry at `x`.
    pub fn fill(&mut self, x: f64) {
        self.fill_weighted(x, 1.0);
    }

    /// Add one entry of `weight` at `x`.
    pub fn fill_weighted(&mut self, x: f64, weight: f64) {
        let bin = self.axis.find_bin(x);
        if let (Some(content), Some(sumw2)) = (self.contents.get_mut(bin), self.sumw2.get_mut(bin)) {
            *content += weight;
            *sumw2 += weight * weight;
        }
        self.entries += 1.0;
    }

    /// Set a bin's content, treating it as Poisson-distributed (error = sqrt(content)).
    pub fn set_bin_content(&mut self, bin: usize, content: f64) {
        if let Some(slot) = self.contents.get_mut(bin) {
            *slot = content;
            self.sumw2[bin] = content.abs();
        }
    }

    /// Override a bin's error.
    pub fn set_bin_error(&mut self, bin: usize, error: f64) {
        if let Some(slot) = self.sumw2.get_mut(bin) {
            *slot = error * error;
        }
    }

    pub fn set_entries(&mut self, entries: f64) {
        self.entries = entries;
    }

    /// Content of a bin, including under/overflow; 0 outside the axis.
    pub fn bin_content(&self, bin: usize) -> f64 {
        self.contents.get(bin).copied().unwrap_or(0.0)
    }

    /// Error of a bin, the square root of its sum of squared weights.
    pub fn bin_error(&self, bin: usize) -> f64 {
        self.sumw2.get(bin).copied().unwrap_or(0.0).sqrt()
    }

    pub const fn bins(&self) -> usize {
        self.axis.bins
    }

    pub const fn entries(&self) -> f64 {
        self.entries
    }

    /// In-range bin contents, without under/overflow.
    pub fn in_range(&self) -> &[f64] {
        &self.contents[1..=self.axis.bins]
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.in_range().iter().sum()
    }

    /// Content-weighted mean of in-range bin centers.
    pub fn mean(&self) -> f64 {
        let sum = self.integral();
        if sum == 0.0 {
            return 0.0;
        }
        (1..=self.axis.bins)
            .map(|bin| self.contents[bin] * self.axis.bin_center(bin))
            .sum::<f64>()
            / sum
    }

    /// Content-weighted standard deviation of in-range bin centers.
    pub fn std_dev(&self) -> f64 {
        let sum = self.integral();
        if sum == 0.0 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = (1..=self.axis.bins)
            .map(|bin| {
                let delta = self.axis.bin_center(bin) - mean;
                self.contents[bin] * delta * delta
            })
            .sum::<f64>()
            / sum;
        variance.max(0.0).sqrt()
    }

    /// Add another histogram with the same binning, bin by bin.
    pub fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        self.axis.check_compatible(&other.axis)?;
        add_assign(&mut self.contents, &other.contents);
        add_assign(&mut self.sumw2, &other.sumw2);
        self.entries += other.entries;
        Ok(())
    }

    /// Clear contents, errors and entries.
    pub fn reset(&mut self) {
        self.contents.iter_mut().for_each(|c| *c = 0.0);
        self.sumw2.iter_mut().for_each(|c| *c = 0.0);
        self.entries = 0.0;
    }

    /// Bin-wise comparison within a relative tolerance.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.axis == other.axis
            && close(self.entries, other.entries, tolerance)
            && self
                .contents
                .iter()
                .zip(&other.contents)
                .chain(self.sumw2.iter().zip(&other.sumw2))
                .all(|(a, b)| close(*a, *b, tolerance))
    }
}

/// Two-dimensional histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    /// Name the object is published under
    pub name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Binning along x
    pub x_axis: Axis,
    /// Binning along y
    pub y_axis: Axis,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
    entries: f64,
}

impl Histogram2D {
    /// Empty histogram over the two axes.
    pub fn new(name: impl Into<String>, x_axis: Axis, y_axis: Axis) -> Self {
        let x_axis = Axis::new(x_axis.bins.max(1), x_axis.min, x_axis.max);
        let y_axis = Axis::new(y_axis.bins.max(1), y_axis.min, y_axis.max);
        let cells = (x_axis.bins + 2) * (y_axis.bins + 2);
        Self {
            name: name.into(),
            title: String::new(),
            x_axis,
            y_axis,
            contents: vec![0.0; cells],
            sumw2: vec![0.0; cells],
            entries: 0.0,
        }
    }

    const fn index(&self, x_bin: usize, y_bin: usize) -> usize {
        y_bin * (self.x_axis.bins + 2) + x_bin
    }

    /// Add one unit-weight entry at `(x, y)`.
    pub fn fill(&mut self, x: f64, y: f64) {
        self.fill_weighted(x, y, 1.0);
    }

    pub fn fill_weighted(&mut self, x: f64, y: f64, weight: f64) {
        let idx = self.index(self.x_axis.find_bin(x), self.y_axis.find_bin(y));
        self.contents[idx] += weight;
        self.sumw2[idx] += weight * weight;
        self.entries += 1.0;
    }

    pub fn set_bin_content(&mut self, x_bin: usize, y_bin: usize, content: f64) {
        if x_bin <= self.x_axis.bins + 1 && y_bin <= self.y_axis.bins + 1 {
            let idx = self.index(x_bin, y_bin);
            self.contents[idx] = content;
            self.sumw2[idx] = content.abs();
        }
    }

    pub fn bin_content(&self, x_bin: usize, y_bin: usize) -> f64 {
        if x_bin <= self.x_axis.bins + 1 && y_bin <= self.y_axis.bins + 1 {
            self.contents[self.index(x_bin, y_bin)]
        } else {
            0.0
        }
    }

    pub const fn entries(&self) -> f64 {
        self.entries
    }

    /// Sum of in-range cell contents.
    pub fn integral(&self) -> f64 {
        (1..=self.y_axis.bins)
            .flat_map(|y| (1..=self.x_axis.bins).map(move |x| (x, y)))
            .map(|(x, y)| self.contents[self.index(x, y)])
            .sum()
    }

    /// Projection onto the x axis (in-range y bins only).
    pub fn projection_x(&self, name: impl Into<String>) -> Histogram1D {
        let mut projection =
            Histogram1D::new(name, self.x_axis.bins, self.x_axis.min, self.x_axis.max);
        for x in 0..=self.x_axis.bins + 1 {
            let (content, sumw2) = (1..=self.y_axis.bins)
                .map(|y| self.index(x, y))
                .fold((0.0, 0.0), |(c, e), idx| {
                    (c + self.contents[idx], e + self.sumw2[idx])
                });
            projection.contents[x] = content;
            projection.sumw2[x] = sumw2;
        }
        projection.entries = self.entries;
        projection
    }

    /// Add another histogram with the same binning, cell by cell.
    pub fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        self.x_axis.check_compatible(&other.x_axis)?;
        self.y_axis.check_compatible(&other.y_axis)?;
        add_assign(&mut self.contents, &other.contents);
        add_assign(&mut self.sumw2, &other.sumw2);
        self.entries += other.entries;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.contents.iter_mut().for_each(|c| *c = 0.0);
        self.sumw2.iter_mut().for_each(|c| *c = 0.0);
        self.entries = 0.0;
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.x_axis == other.x_axis
            && self.y_axis == other.y_axis
            && close(self.entries, other.entries, tolerance)
            && self
                .contents
                .iter()
                .zip(&other.contents)
                .chain(self.sumw2.iter().zip(&other.sumw2))
                .all(|(a, b)| close(*a, *b, tolerance))
    }
}

/// Profile: per-bin mean of a y quantity as a function of x
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile1D {
    /// Name the object is published under
    pub name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Binning along x
    pub axis: Axis,
    sum_w: Vec<f64>,
    sum_wy: Vec<f64>,
    sum_wy2: Vec<f64>,
    entries: f64,
}

impl Profile1D {
    pub fn new(name: impl Into<String>, bins: usize, min: f64, max: f64) -> Self {
        let bins = bins.max(1);
        Self {
            name: name.into(),
            title: String::new(),
            axis: Axis::new(bins, min, max),
            sum_w: vec![0.0; bins + 2],
            sum_wy: vec![0.0; bins + 2],
            sum_wy2: vec![0.0; bins + 2],
            entries: 0.0,
        }
    }

    /// Accumulate `y` in the bin of `x`.
    pub fn fill(&mut self, x: f64, y: f64) {
        let bin = self.axis.find_bin(x);
        self.sum_w[bin] += 1.0;
        self.sum_wy[bin] += y;
        self.sum_wy2[bin] += y * y;
        self.entries += 1.0;
    }

    /// Mean of y in the bin, 0 when the bin is empty.
    pub fn bin_mean(&self, bin: usize) -> f64 {
        match self.sum_w.get(bin) {
            Some(&w) if w > 0.0 => self.sum_wy[bin] / w,
            _ => 0.0,
        }
    }

    /// Standard error on the bin mean.
    pub fn bin_error(&self, bin: usize) -> f64 {
        match self.sum_w.get(bin) {
            Some(&w) if w > 0.0 => {
                let mean = self.sum_wy[bin] / w;
                let variance = (self.sum_wy2[bin] / w - mean * mean).max(0.0);
                (variance / w).sqrt()
            }
            _ => 0.0,
        }
    }

    pub const fn entries(&self) -> f64 {
        self.entries
    }

    /// The profile seen as a histogram of bin means.
    pub fn to_histogram(&self) -> Histogram1D {
        let mut histogram =
            Histogram1D::new(self.name.clone(), self.axis.bins, self.axis.min, self.axis.max);
        for bin in 0..=self.axis.bins + 1 {
            histogram.contents[bin] = self.bin_mean(bin);
            histogram.sumw2[bin] = self.bin_error(bin).powi(2);
        }
        histogram.entries = self.entries;
        histogram
    }

    /// Add the accumulated sums of another profile with the same binning.
    pub fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        self.axis.check_compatible(&other.axis)?;
        add_assign(&mut self.sum_w, &other.sum_w);
        add_assign(&mut self.sum_wy, &other.sum_wy);
        add_assign(&mut self.sum_wy2, &other.sum_wy2);
        self.entries += other.entries;
        Ok(())
    }

    pub fn reset(&mut self) {
        for values in [&mut self.sum_w, &mut self.sum_wy, &mut self.sum_wy2] {
            values.iter_mut().for_each(|v| *v = 0.0);
        }
        self.entries = 0.0;
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.axis == other.axis
            && close(self.entries, other.entries, tolerance)
            && [
                (&self.sum_w, &other.sum_w),
                (&self.sum_wy, &other.sum_wy),
                (&self.sum_wy2, &other.sum_wy2),
            ]
            .iter()
            .all(|(a, b)| a.iter().zip(b.iter()).all(|(x, y)| close(*x, *y, tolerance)))
    }
}
