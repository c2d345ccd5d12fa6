//! Graphs and canvases.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::payload::{Mergeable, Payload};
use crate::domain::errors::MergeError;

/// A point of a graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    /// Abscissa, typically a timestamp or run number
    pub x: f64,
    /// Ordinate
    pub y: f64,
}

fn point_order(a: &GraphPoint, b: &GraphPoint) -> Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

/// Ordered set of (x, y) points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Name the object is published under
    pub name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    points: Vec<GraphPoint>,
}

impl Graph {
    /// Empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            points: Vec::new(),
        }
    }

    /// Append a point.
    pub fn add_point(&mut self, x: f64, y: f64) {
        self.points.push(GraphPoint { x, y });
    }

    pub fn points(&self) -> &[GraphPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Most recently added point.
    pub fn last(&self) -> Option<&GraphPoint> {
        self.points.last()
    }

    /// Mean of the y values, 0 for an empty graph.
    pub fn mean_y(&self) -> f64 {
        if self.points.is_empty() {
            0.0
        } else {
            self.points.iter().map(|p| p.y).sum::<f64>() / self.points.len() as f64
        }
    }

    /// Union of both point sets, kept sorted so that merge order does not matter.
    pub fn merge(&mut self, other: &Self) {
        self.points.extend_from_slice(&other.points);
        self.points.sort_by(point_order);
    }

    /// Remove every point.
    pub fn reset(&mut self) {
        self.points.clear();
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        let mut mine = self.points.clone();
        let mut theirs = other.points.clone();
        mine.sort_by(point_order);
        theirs.sort_by(point_order);
        mine.len() == theirs.len()
            && mine.iter().zip(&theirs).all(|(a, b)| {
                (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance
            })
    }
}

/// A container of drawable payloads.
///
/// The canvas owns its payloads in an arena; pads refer to them by index,
/// so the same payload is never aliased by two owners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    /// Name the object is published under
    pub name: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    objects: Vec<Payload>,
    pads: Vec<Vec<usize>>,
}

impl Canvas {
    /// Empty canvas with `pads` pads, at least one.
    pub fn new(name: impl Into<String>, pads: usize) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            objects: Vec::new(),
            pads: vec![Vec::new(); pads.max(1)],
        }
    }

    /// Add a payload to the arena and draw it on `pad`. Returns its index.
    pub fn draw(&mut self, pad: usize, payload: Payload) -> usize {
        let index = self.objects.len();
        self.objects.push(payload);
        if pad >= self.pads.len() {
            self.pads.resize(pad + 1, Vec::new());
        }
        self.pads[pad].push(index);
        index
    }

    pub fn objects(&self) -> &[Payload] {
        &self.objects
    }

    pub fn object_mut(&mut self, index: usize) -> Option<&mut Payload> {
        self.objects.get_mut(index)
    }

    /// Payloads drawn on a pad, in drawing order.
    pub fn pad(&self, pad: usize) -> impl Iterator<Item = &Payload> {
        self.pads
            .get(pad)
            .into_iter()
            .flatten()
            .filter_map(|&index| self.objects.get(index))
    }

    /// Merge payloads position by position; both canvases must have the same layout.
    pub fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        if self.objects.len() != other.objects.len() {
            return Err(MergeError::ShapeMismatch(format!(
                "canvas '{}' holds {} objects, other holds {}",
                self.name,
                self.objects.len(),
                other.objects.len()
            )));
        }
        for (mine, theirs) in self.objects.iter_mut().zip(&other.objects) {
            mine.merge(theirs)?;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.objects.iter_mut().for_each(Mergeable::reset);
    }
}
