//! Cycles and validity intervals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Time range an object is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityInterval {
    /// First instant of validity
    pub start: DateTime<Utc>,
    /// Last instant of validity, inclusive
    pub end: DateTime<Utc>,
}

impl ValidityInterval {
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Zero-length interval at `at`.
    pub fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Smallest interval covering both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Bookkeeping for the cycle currently open in a task runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    /// Cycle number within the activity, starting at 1
    pub number: u64,
    /// Clock time at which the cycle opened
    pub started_at: DateTime<Utc>,
    /// Messages delivered during the cycle
    pub messages: u64,
    /// Messages whose processing failed
    pub failures: u64,
}

impl CycleInfo {
    pub const fn new(number: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            number,
            started_at,
            messages: 0,
            failures: 0,
        }
    }

    /// Fraction of messages whose processing failed.
    pub fn failure_rate(&self) -> f64 {
        if self.messages == 0 {
            0.0
        } else {
            self.failures as f64 / self.messages as f64
        }
    }
}
