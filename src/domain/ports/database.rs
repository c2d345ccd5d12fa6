use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Activity, MonitorObject, QualityObject};

/// Kind of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Monitor object
    Mo,
    /// Quality object
    Qo,
}

impl ObjectKind {
    /// Name stored in the `kind` column.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mo => "mo",
            Self::Qo => "qo",
        }
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mo" => Ok(Self::Mo),
            "qo" => Ok(Self::Qo),
            _ => Err(DatabaseError::InvalidKey(format!("unknown object kind '{s}'"))),
        }
    }
}

/// Header of one stored version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    /// Unique id of the version
    pub id: Uuid,
    /// Monitor or quality object
    pub kind: ObjectKind,
    /// Folder, e.g. `TST/MO/Task`
    pub path: String,
    /// Object name within the folder
    pub name: String,
    /// Time the version is valid from
    pub timestamp: DateTime<Utc>,
    /// Activity the version belongs to
    pub activity: Activity,
    /// Metadata stored with the version
    pub metadata: BTreeMap<String, String>,
}

/// Versioned object store keyed by (path, name, timestamp, activity).
///
/// Writes are append-only. Retrieval returns the most recent version at or
/// before the requested timestamp whose activity matches the filter; unset
/// filter fields match anything. `None` asks for the newest version without
/// a time bound, so stores written under an injected clock stay readable.
#[async_trait]
pub trait Database: Send + Sync {
    /// Store a monitor object under `<detector>/MO/<task>/<name>`
    async fn store_mo(&self, mo: &MonitorObject) -> Result<(), DatabaseError>;

    /// Store a quality object under `<detector>/QO/<check>/<name>`
    async fn store_qo(&self, qo: &QualityObject) -> Result<(), DatabaseError>;

    /// Retrieve the monitor object valid at `timestamp`
    async fn retrieve_mo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<MonitorObject>, DatabaseError>;

    /// Retrieve the quality object valid at `timestamp`
    async fn retrieve_qo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<QualityObject>, DatabaseError>;

    /// All stored versions of an object, newest first
    async fn list_versions(&self, path: &str, name: &str) -> Result<Vec<ObjectVersion>, DatabaseError>;

    /// Distinct full object paths starting with `prefix`
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, DatabaseError>;
}

/// Split `<path>/<name>` at the last slash.
pub fn split_object_path(full_path: &str) -> Result<(&str, &str), DatabaseError> {
    full_path
        .rsplit_once('/')
        .filter(|(path, name)| !path.is_empty() && !name.is_empty())
        .ok_or_else(|| DatabaseError::InvalidKey(full_path.to_string()))
}

/// Timestamp an object is stored at: its creation time, or now.
pub fn storage_timestamp(created_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    created_at.unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_object_path() {
        assert_eq!(split_object_path("TST/MO/Task/h1").unwrap(), ("TST/MO/Task", "h1"));
        assert!(split_object_path("h1").is_err());
        assert!(split_object_path("TST/").is_err());
    }
}
