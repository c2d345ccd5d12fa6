use chrono::{DateTime, Utc};

/// Source of the current time, injectable for deterministic runs
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
