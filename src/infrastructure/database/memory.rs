use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::DatabaseError;
use crate::domain::models::{Activity, MonitorObject, QualityObject};
use crate::domain::ports::database::{storage_timestamp, Database, ObjectKind, ObjectVersion};

#[derive(Debug, Clone)]
enum StoredBody {
    Mo(Box<MonitorObject>),
    Qo(Box<QualityObject>),
}

#[derive(Debug, Clone)]
struct StoredVersion {
    header: ObjectVersion,
    body: StoredBody,
}

type ObjectKey = (ObjectKind, String, String);

/// In-process object store
///
/// Versions are kept in insertion order per (kind, path, name). Used by
/// tests and by `implementation: memory` configurations.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    objects: RwLock<BTreeMap<ObjectKey, Vec<StoredVersion>>>,
}

impl InMemoryDatabase {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored versions, all objects included
    pub async fn version_count(&self) -> usize {
        self.objects.read().await.values().map(Vec::len).sum()
    }

    async fn insert(&self, header: ObjectVersion, body: StoredBody) {
        let key = (header.kind, header.path.clone(), header.name.clone());
        tracing::trace!(kind = header.kind.as_str(), path = %header.path, name = %header.name, "object stored");
        self.objects
            .write()
            .await
            .entry(key)
            .or_default()
            .push(StoredVersion { header, body });
    }

    /// Latest version at or before `timestamp` (unbounded when `None`)
    /// matching `activity`; later insertions win ties.
    async fn find(
        &self,
        kind: ObjectKind,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Option<StoredBody> {
        let objects = self.objects.read().await;
        let versions = objects.get(&(kind, path.to_string(), name.to_string()))?;

        versions
            .iter()
            .filter(|v| timestamp.map_or(true, |at| v.header.timestamp <= at) && v.header.activity.matches(activity))
            .fold(None, |best: Option<&StoredVersion>, v| match best {
                Some(b) if b.header.timestamp > v.header.timestamp => Some(b),
                _ => Some(v),
            })
            .map(|v| v.body.clone())
    }
}

fn header(
    kind: ObjectKind,
    path: String,
    name: &str,
    created_at: Option<DateTime<Utc>>,
    activity: &Activity,
    metadata: &BTreeMap<String, String>,
) -> ObjectVersion {
    ObjectVersion {
        id: Uuid::new_v4(),
        kind,
        path,
        name: name.to_string(),
        timestamp: storage_timestamp(created_at),
        activity: activity.clone(),
        metadata: metadata.clone(),
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn store_mo(&self, mo: &MonitorObject) -> Result<(), DatabaseError> {
        let header = header(
            ObjectKind::Mo,
            mo.path(),
            mo.name(),
            mo.created_at(),
            mo.activity(),
            mo.metadata(),
        );
        self.insert(header, StoredBody::Mo(Box::new(mo.clone()))).await;
        Ok(())
    }

    async fn store_qo(&self, qo: &QualityObject) -> Result<(), DatabaseError> {
        let header = header(
            ObjectKind::Qo,
            qo.path(),
            qo.name(),
            qo.created_at(),
            qo.activity(),
            qo.metadata(),
        );
        self.insert(header, StoredBody::Qo(Box::new(qo.clone()))).await;
        Ok(())
    }

    async fn retrieve_mo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<MonitorObject>, DatabaseError> {
        Ok(match self.find(ObjectKind::Mo, path, name, timestamp, activity).await {
            Some(StoredBody::Mo(mo)) => Some(*mo),
            _ => None,
        })
    }

    async fn retrieve_qo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<QualityObject>, DatabaseError> {
        Ok(match self.find(ObjectKind::Qo, path, name, timestamp, activity).await {
            Some(StoredBody::Qo(qo)) => Some(*qo),
            _ => None,
        })
    }

    async fn list_versions(&self, path: &str, name: &str) -> Result<Vec<ObjectVersion>, DatabaseError> {
        let objects = self.objects.read().await;
        let mut versions: Vec<(usize, ObjectVersion)> = [ObjectKind::Mo, ObjectKind::Qo]
            .iter()
            .filter_map(|kind| objects.get(&(*kind, path.to_string(), name.to_string())))
            .flatten()
            .enumerate()
            .map(|(seq, v)| (seq, v.header.clone()))
            .collect();
        versions.sort_by(|(seq_a, a), (seq_b, b)| {
            b.timestamp.cmp(&a.timestamp).then(seq_b.cmp(seq_a))
        });
        Ok(versions.into_iter().map(|(_, v)| v).collect())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        let objects = self.objects.read().await;
        let mut paths: Vec<String> = objects
            .keys()
            .map(|(_, path, name)| format!("{path}/{name}"))
            .filter(|full| full.starts_with(prefix))
            .collect();
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Graph, Quality, ValidityInterval};
    use chrono::Duration;

    fn graph_mo(points: usize, run: u32, at: DateTime<Utc>) -> MonitorObject {
        let mut g = Graph::new("trend");
        for i in 0..points {
            g.add_point(i as f64, 1.0);
        }
        let mut mo = MonitorObject::new(g.into(), "PP", "TST");
        mo.stamp(&Activity::new(run, "PHYSICS"), 0, ValidityInterval::instant(at), at);
        mo
    }

    #[tokio::test]
    async fn test_latest_version_wins() {
        let db = InMemoryDatabase::new();
        let t0 = Utc::now() - Duration::seconds(60);
        db.store_mo(&graph_mo(1, 1, t0)).await.unwrap();
        db.store_mo(&graph_mo(3, 1, t0 + Duration::seconds(20))).await.unwrap();
        db.store_mo(&graph_mo(2, 1, t0 + Duration::seconds(10))).await.unwrap();

        let mo = db
            .retrieve_mo("TST/MO/PP", "trend", None, &Activity::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mo.payload().as_graph().unwrap().len(), 3);

        let mid = db
            .retrieve_mo("TST/MO/PP", "trend", Some(t0 + Duration::seconds(15)), &Activity::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mid.payload().as_graph().unwrap().len(), 2);
        assert_eq!(db.version_count().await, 3);
    }

    #[tokio::test]
    async fn test_same_timestamp_last_write_wins() {
        let db = InMemoryDatabase::new();
        let t0 = Utc::now() - Duration::seconds(5);
        db.store_mo(&graph_mo(1, 1, t0)).await.unwrap();
        db.store_mo(&graph_mo(4, 1, t0)).await.unwrap();

        let mo = db
            .retrieve_mo("TST/MO/PP", "trend", Some(t0), &Activity::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mo.payload().as_graph().unwrap().len(), 4);

        let versions = db.list_versions("TST/MO/PP", "trend").await.unwrap();
        assert_eq!(versions.len(), 2);
    }

    #[tokio::test]
    async fn test_kinds_do_not_collide() {
        let db = InMemoryDatabase::new();
        let mut qo = QualityObject::new(Quality::good(), "trend", "TST", "OnAny", vec![]);
        qo.stamp(&Activity::new(1, "PHYSICS"), 0, None, Utc::now() - Duration::seconds(1));
        db.store_qo(&qo).await.unwrap();

        assert!(db
            .retrieve_mo("TST/QO/trend", "trend", None, &Activity::any())
            .await
            .unwrap()
            .is_none());
        assert!(db
            .retrieve_qo("TST/QO/trend", "trend", None, &Activity::any())
            .await
            .unwrap()
            .is_some());
        assert_eq!(db.list_objects("TST/QO").await.unwrap(), vec!["TST/QO/trend/trend".to_string()]);
    }
}
