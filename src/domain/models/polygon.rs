//! Histograms with arbitrary polygonal bins.

use serde::{Deserialize, Serialize};

use crate::domain::errors::MergeError;

/// One polygonal bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonBin {
    /// Polygon outline, not explicitly closed
    pub vertices: Vec<(f64, f64)>,
    /// Sum of weights
    pub content: f64,
    /// Sum of squared weights
    pub sumw2: f64,
}

impl PolygonBin {
    /// Even-odd rule point-in-polygon test.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = self.vertices[i];
            let (xj, yj) = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Histogram whose bins are polygons, e.g. a detector map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolygonHistogram {
    /// Name the object is published under
    pub name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    bins: Vec<PolygonBin>,
    overflow: f64,
    entries: f64,
}

impl PolygonHistogram {
    /// Histogram without bins; add them with [`PolygonHistogram::add_bin`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a bin; returns its 0-based index.
    pub fn add_bin(&mut self, vertices: Vec<(f64, f64)>) -> usize {
        self.bins.push(PolygonBin {
            vertices,
            content: 0.0,
            sumw2: 0.0,
        });
        self.bins.len() - 1
    }

    /// Fill the first bin containing the point; points outside every bin go to overflow.
    pub fn fill(&mut self, x: f64, y: f64) -> Option<usize> {
        self.entries += 1.0;
        match self.bins.iter().position(|bin| bin.contains(x, y)) {
            Some(index) => {
                self.bins[index].content += 1.0;
                self.bins[index].sumw2 += 1.0;
                Some(index)
            }
            None => {
                self.overflow += 1.0;
                None
            }
        }
    }

    pub fn bins(&self) -> &[PolygonBin] {
        &self.bins
    }

    pub fn bin_content(&self, index: usize) -> f64 {
        self.bins.get(index).map_or(0.0, |bin| bin.content)
    }

    pub const fn overflow(&self) -> f64 {
        self.overflow
    }

    pub const fn entries(&self) -> f64 {
        self.entries
    }

    pub fn integral(&self) -> f64 {
        self.bins.iter().map(|bin| bin.content).sum()
    }

    /// Add contents of a histogram with identical bins.
    pub fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        let same_layout = self.bins.len() == other.bins.len()
            && self
                .bins
                .iter()
                .zip(&other.bins)
                .all(|(a, b)| a.vertices == b.vertices);
        if !same_layout {
            return Err(MergeError::ShapeMismatch(format!(
                "polygon layouts of '{}' differ",
                self.name
            )));
        }
        for (mine, theirs) in self.bins.iter_mut().zip(&other.bins) {
            mine.content += theirs.content;
            mine.sumw2 += theirs.sumw2;
        }
        self.overflow += other.overflow;
        self.entries += other.entries;
        Ok(())
    }

    pub fn reset(&mut self) {
        for bin in &mut self.bins {
            bin.content = 0.0;
            bin.sumw2 = 0.0;
        }
        self.overflow = 0.0;
        self.entries = 0.0;
    }
}
