//! Monitor object payloads.
//!
//! Payloads form a closed set of variants. Checks declare the kind they
//! accept as a [`PayloadKind`]; the runner matches on the variant instead
//! of comparing class names. `Other` is the escape hatch for objects the
//! framework only transports.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use super::graph::{Canvas, Graph};
use super::histogram::{Histogram1D, Histogram2D, Profile1D};
use super::polygon::PolygonHistogram;
use super::ratio::RatioHistogram;
use crate::domain::errors::{MergeError, QcError};

/// Payloads that can be combined with a partial copy of themselves.
///
/// Implementations must be associative and commutative up to numerical
/// tolerance. Copying is `Clone`.
pub trait Mergeable {
    /// Combine `other` into `self`; fails when the two are not compatible.
    fn merge(&mut self, other: &Self) -> Result<(), MergeError>;
    /// Return to the empty state, keeping binning and name.
    fn reset(&mut self);
}

/// Discriminant of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// One-dimensional histogram
    Histogram1D,
    /// Two-dimensional histogram
    Histogram2D,
    /// Profile histogram
    Profile,
    /// Point graph
    Graph,
    /// Container of drawables
    Canvas,
    /// Ratio of two histograms
    Ratio,
    /// Histogram with polygonal bins
    Polygon,
    /// Anything the framework does not interpret
    Other,
}

impl PayloadKind {
    /// Short name used in configuration and storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Histogram1D => "histogram1d",
            Self::Histogram2D => "histogram2d",
            Self::Profile => "profile",
            Self::Graph => "graph",
            Self::Canvas => "canvas",
            Self::Ratio => "ratio",
            Self::Polygon => "polygon",
            Self::Other => "other",
        }
    }

    /// Human readable name used in flags and errors.
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Histogram1D => "1D histogram",
            Self::Histogram2D => "2D histogram",
            Self::Profile => "profile",
            Self::Graph => "graph",
            Self::Canvas => "canvas",
            Self::Ratio => "ratio histogram",
            Self::Polygon => "polygon histogram",
            Self::Other => "opaque object",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = QcError;

    /// Accepts both the short names and the usual histogram class names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "histogram1d" | "TH1" | "TH1F" | "TH1D" | "TH1I" => Ok(Self::Histogram1D),
            "histogram2d" | "TH2" | "TH2F" | "TH2D" | "TH2I" => Ok(Self::Histogram2D),
            "profile" | "TProfile" => Ok(Self::Profile),
            "graph" | "TGraph" => Ok(Self::Graph),
            "canvas" | "TCanvas" => Ok(Self::Canvas),
            "ratio" | "TEfficiency" => Ok(Self::Ratio),
            "polygon" | "TH2Poly" => Ok(Self::Polygon),
            "other" | "TObject" => Ok(Self::Other),
            _ => Err(QcError::Configuration(format!("unknown payload kind '{s}'"))),
        }
    }
}

/// Opaque object the framework stores but does not interpret
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueObject {
    /// Name the object is published under
    pub name: String,
    /// Class of the object in the producing framework
    pub class_name: String,
    /// Serialized object
    pub data: Vec<u8>,
}

/// The scientific object wrapped by a monitor object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// One-dimensional histogram
    #[serde(rename = "histogram1d")]
    Histogram1D(Histogram1D),
    /// Two-dimensional histogram
    #[serde(rename = "histogram2d")]
    Histogram2D(Histogram2D),
    /// Profile histogram
    Profile(Profile1D),
    /// Point graph, e.g. a trend
    Graph(Graph),
    /// Container of other payloads
    Canvas(Canvas),
    /// Ratio merged through its components
    Ratio(RatioHistogram),
    /// Histogram with polygonal bins
    Polygon(PolygonHistogram),
    /// Stored as is; neither interpreted nor mergeable
    Other(OpaqueObject),
}

impl Payload {
    /// Discriminant of the payload.
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::Histogram1D(_) => PayloadKind::Histogram1D,
            Self::Histogram2D(_) => PayloadKind::Histogram2D,
            Self::Profile(_) => PayloadKind::Profile,
            Self::Graph(_) => PayloadKind::Graph,
            Self::Canvas(_) => PayloadKind::Canvas,
            Self::Ratio(_) => PayloadKind::Ratio,
            Self::Polygon(_) => PayloadKind::Polygon,
            Self::Other(_) => PayloadKind::Other,
        }
    }

    /// Name the payload is published under.
    pub fn name(&self) -> &str {
        match self {
            Self::Histogram1D(h) => &h.name,
            Self::Histogram2D(h) => &h.name,
            Self::Profile(p) => &p.name,
            Self::Graph(g) => &g.name,
            Self::Canvas(c) => &c.name,
            Self::Ratio(r) => &r.name,
            Self::Polygon(p) => &p.name,
            Self::Other(o) => &o.name,
        }
    }

    /// Rename the payload.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        match self {
            Self::Histogram1D(h) => h.name = name,
            Self::Histogram2D(h) => h.name = name,
            Self::Profile(p) => p.name = name,
            Self::Graph(g) => g.name = name,
            Self::Canvas(c) => c.name = name,
            Self::Ratio(r) => r.name = name,
            Self::Polygon(p) => p.name = name,
            Self::Other(o) => o.name = name,
        }
    }

    /// Whether this payload can be used where `kind` is expected.
    ///
    /// Profiles and ratios also count as 1D histograms, since both have a
    /// 1D histogram view.
    pub fn is_a(&self, kind: PayloadKind) -> bool {
        let own = self.kind();
        own == kind
            || (kind == PayloadKind::Histogram1D
                && matches!(own, PayloadKind::Profile | PayloadKind::Ratio))
    }

    /// 1D histogram view of the payload, when it has one.
    pub fn histogram1d_view(&self) -> Option<Cow<'_, Histogram1D>> {
        match self {
            Self::Histogram1D(h) => Some(Cow::Borrowed(h)),
            Self::Profile(p) => Some(Cow::Owned(p.to_histogram())),
            Self::Ratio(r) => Some(Cow::Borrowed(r.ratio())),
            _ => None,
        }
    }

    /// Number of fills, where the payload tracks them.
    pub fn entries(&self) -> Option<f64> {
        match self {
            Self::Histogram1D(h) => Some(h.entries()),
            Self::Histogram2D(h) => Some(h.entries()),
            Self::Profile(p) => Some(p.entries()),
            Self::Graph(g) => Some(g.len() as f64),
            Self::Ratio(r) => Some(r.denominator().entries()),
            Self::Polygon(p) => Some(p.entries()),
            Self::Canvas(_) | Self::Other(_) => None,
        }
    }

    pub const fn as_histogram1d(&self) -> Option<&Histogram1D> {
        match self {
            Self::Histogram1D(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_histogram1d_mut(&mut self) -> Option<&mut Histogram1D> {
        match self {
            Self::Histogram1D(h) => Some(h),
            _ => None,
        }
    }

    pub const fn as_histogram2d(&self) -> Option<&Histogram2D> {
        match self {
            Self::Histogram2D(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_histogram2d_mut(&mut self) -> Option<&mut Histogram2D> {
        match self {
            Self::Histogram2D(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_profile_mut(&mut self) -> Option<&mut Profile1D> {
        match self {
            Self::Profile(p) => Some(p),
            _ => None,
        }
    }

    pub const fn as_graph(&self) -> Option<&Graph> {
        match self {
            Self::Graph(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_graph_mut(&mut self) -> Option<&mut Graph> {
        match self {
            Self::Graph(g) => Some(g),
            _ => None,
        }
    }

    pub const fn as_ratio(&self) -> Option<&RatioHistogram> {
        match self {
            Self::Ratio(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_ratio_mut(&mut self) -> Option<&mut RatioHistogram> {
        match self {
            Self::Ratio(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_polygon_mut(&mut self) -> Option<&mut PolygonHistogram> {
        match self {
            Self::Polygon(p) => Some(p),
            _ => None,
        }
    }

    /// Bin-wise comparison within a relative tolerance. Opaque payloads compare exactly.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        match (self, other) {
            (Self::Histogram1D(a), Self::Histogram1D(b)) => a.approx_eq(b, tolerance),
            (Self::Histogram2D(a), Self::Histogram2D(b)) => a.approx_eq(b, tolerance),
            (Self::Profile(a), Self::Profile(b)) => a.approx_eq(b, tolerance),
            (Self::Graph(a), Self::Graph(b)) => a.approx_eq(b, tolerance),
            (Self::Ratio(a), Self::Ratio(b)) => a.approx_eq(b, tolerance),
            (Self::Canvas(a), Self::Canvas(b)) => {
                a.objects().len() == b.objects().len()
                    && a.objects()
                        .iter()
                        .zip(b.objects())
                        .all(|(x, y)| x.approx_eq(y, tolerance))
            }
            _ => self == other,
        }
    }
}

impl Mergeable for Payload {
    fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        match (self, other) {
            (Self::Histogram1D(a), Self::Histogram1D(b)) => a.merge(b),
            (Self::Histogram2D(a), Self::Histogram2D(b)) => a.merge(b),
            (Self::Profile(a), Self::Profile(b)) => a.merge(b),
            (Self::Graph(a), Self::Graph(b)) => {
                a.merge(b);
                Ok(())
            }
            (Self::Canvas(a), Self::Canvas(b)) => a.merge(b),
            (Self::Ratio(a), Self::Ratio(b)) => a.merge(b),
            (Self::Polygon(a), Self::Polygon(b)) => a.merge(b),
            (Self::Other(a), _) => Err(MergeError::NotMergeable(a.name.clone())),
            (this, other) => Err(MergeError::KindMismatch {
                expected: this.kind().description().to_string(),
                found: other.kind().description().to_string(),
            }),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Histogram1D(h) => h.reset(),
            Self::Histogram2D(h) => h.reset(),
            Self::Profile(p) => p.reset(),
            Self::Graph(g) => g.reset(),
            Self::Canvas(c) => c.reset(),
            Self::Ratio(r) => r.reset(),
            Self::Polygon(p) => p.reset(),
            Self::Other(_) => {}
        }
    }
}

macro_rules! impl_payload_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_payload_from!(
    Histogram1D(Histogram1D),
    Histogram2D(Histogram2D),
    Profile(Profile1D),
    Graph(Graph),
    Canvas(Canvas),
    Ratio(RatioHistogram),
    Polygon(PolygonHistogram),
    Other(OpaqueObject),
);
