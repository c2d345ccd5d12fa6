use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::utils::{like_prefix, millis_to_datetime};
use crate::domain::errors::DatabaseError;
use crate::domain::models::{Activity, MonitorObject, QualityObject};
use crate::domain::ports::database::{
    split_object_path, storage_timestamp, Database, ObjectKind, ObjectVersion,
};

/// SQLite implementation of the object store
///
/// Provides async database operations with:
/// - An append-only `objects` table, one row per stored version
/// - JSON serialization for object bodies and metadata
/// - Activity columns so retrieval can filter without decoding bodies
pub struct SqliteDatabase {
    pool: SqlitePool,
}

struct NewRow<'a> {
    kind: ObjectKind,
    path: String,
    name: &'a str,
    timestamp: DateTime<Utc>,
    activity: &'a Activity,
    metadata: &'a BTreeMap<String, String>,
}

impl SqliteDatabase {
    /// Create a new SqliteDatabase
    ///
    /// # Arguments
    /// * `pool` - SQLite connection pool with migrations applied
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert<T: Serialize + Sync>(&self, row: NewRow<'_>, body: &T) -> Result<(), DatabaseError> {
        let body_json = serde_json::to_string(body)?;
        let metadata_json = serde_json::to_string(row.metadata)?;
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r"
            INSERT INTO objects (
                id, kind, path, name, timestamp,
                run_number, run_type, period_name, pass_name, provenance,
                metadata, body, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&id)
        .bind(row.kind.as_str())
        .bind(&row.path)
        .bind(row.name)
        .bind(row.timestamp.timestamp_millis())
        .bind(i64::from(row.activity.number))
        .bind(&row.activity.run_type)
        .bind(&row.activity.period_name)
        .bind(&row.activity.pass_name)
        .bind(&row.activity.provenance)
        .bind(&metadata_json)
        .bind(&body_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(kind = row.kind.as_str(), path = %row.path, name = row.name, "object stored");
        Ok(())
    }

    async fn retrieve<T: DeserializeOwned>(
        &self,
        kind: ObjectKind,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<T>, DatabaseError> {
        let at = timestamp.map_or(i64::MAX, |t| t.timestamp_millis());

        // Unset filter fields (0 or empty) act as wildcards
        let row = sqlx::query(
            r"
            SELECT body FROM objects
            WHERE kind = ? AND path = ? AND name = ? AND timestamp <= ?
              AND (? = 0 OR run_number = ?)
              AND (? = '' OR run_type = ?)
              AND (? = '' OR period_name = ?)
              AND (? = '' OR pass_name = ?)
              AND (? = '' OR provenance = ?)
            ORDER BY timestamp DESC, seq DESC
            LIMIT 1
            ",
        )
        .bind(kind.as_str())
        .bind(path)
        .bind(name)
        .bind(at)
        .bind(i64::from(activity.number))
        .bind(i64::from(activity.number))
        .bind(&activity.run_type)
        .bind(&activity.run_type)
        .bind(&activity.period_name)
        .bind(&activity.period_name)
        .bind(&activity.pass_name)
        .bind(&activity.pass_name)
        .bind(&activity.provenance)
        .bind(&activity.provenance)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<T, DatabaseError> {
            let body: String = row.try_get("body")?;
            Ok(serde_json::from_str(&body)?)
        })
        .transpose()
    }

    fn version_from_row(row: &SqliteRow) -> Result<ObjectVersion, DatabaseError> {
        let id: String = row.try_get("id")?;
        let kind: String = row.try_get("kind")?;
        let timestamp: i64 = row.try_get("timestamp")?;
        let run_number: i64 = row.try_get("run_number")?;
        let metadata: String = row.try_get("metadata")?;

        Ok(ObjectVersion {
            id: Uuid::parse_str(&id).map_err(|e| DatabaseError::InvalidKey(e.to_string()))?,
            kind: kind.parse()?,
            path: row.try_get("path")?,
            name: row.try_get("name")?,
            timestamp: millis_to_datetime(timestamp)?,
            activity: Activity {
                number: u32::try_from(run_number).unwrap_or_default(),
                run_type: row.try_get("run_type")?,
                period_name: row.try_get("period_name")?,
                pass_name: row.try_get("pass_name")?,
                provenance: row.try_get("provenance")?,
            },
            metadata: serde_json::from_str(&metadata)?,
        })
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn store_mo(&self, mo: &MonitorObject) -> Result<(), DatabaseError> {
        let row = NewRow {
            kind: ObjectKind::Mo,
            path: mo.path(),
            name: mo.name(),
            timestamp: storage_timestamp(mo.created_at()),
            activity: mo.activity(),
            metadata: mo.metadata(),
        };
        self.insert(row, mo).await
    }

    async fn store_qo(&self, qo: &QualityObject) -> Result<(), DatabaseError> {
        let row = NewRow {
            kind: ObjectKind::Qo,
            path: qo.path(),
            name: qo.name(),
            timestamp: storage_timestamp(qo.created_at()),
            activity: qo.activity(),
            metadata: qo.metadata(),
        };
        self.insert(row, qo).await
    }

    async fn retrieve_mo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<MonitorObject>, DatabaseError> {
        self.retrieve(ObjectKind::Mo, path, name, timestamp, activity)
            .await
    }

    async fn retrieve_qo(
        &self,
        path: &str,
        name: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<QualityObject>, DatabaseError> {
        self.retrieve(ObjectKind::Qo, path, name, timestamp, activity)
            .await
    }

    async fn list_versions(&self, path: &str, name: &str) -> Result<Vec<ObjectVersion>, DatabaseError> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, path, name, timestamp,
                   run_number, run_type, period_name, pass_name, provenance, metadata
            FROM objects
            WHERE path = ? AND name = ?
            ORDER BY timestamp DESC, seq DESC
            ",
        )
        .bind(path)
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::version_from_row).collect()
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r"
            SELECT DISTINCT path, name FROM objects
            WHERE (path || '/' || name) LIKE ? ESCAPE '\'
            ORDER BY path, name
            ",
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(path, name)| format!("{path}/{name}"))
            .collect())
    }
}

impl SqliteDatabase {
    /// Retrieve by full `<path>/<name>` key
    pub async fn retrieve_mo_by_key(
        &self,
        full_path: &str,
        timestamp: Option<DateTime<Utc>>,
        activity: &Activity,
    ) -> Result<Option<MonitorObject>, DatabaseError> {
        let (path, name) = split_object_path(full_path)?;
        self.retrieve_mo(path, name, timestamp, activity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Histogram1D, Quality, ValidityInterval};
    use crate::infrastructure::database::DatabaseConnection;
    use chrono::Duration;

    async fn setup_test_db() -> SqliteDatabase {
        let conn = DatabaseConnection::new("sqlite::memory:", 1)
            .await
            .expect("failed to create test database");
        conn.migrate().await.expect("failed to run migrations");
        SqliteDatabase::new(conn.pool().clone())
    }

    fn mo_at(entries: usize, run: u32, at: DateTime<Utc>) -> MonitorObject {
        let mut h = Histogram1D::new("h1", 10, 0.0, 10.0);
        for _ in 0..entries {
            h.fill(1.5);
        }
        let mut mo = MonitorObject::new(h.into(), "Task", "TST");
        mo.stamp(&Activity::new(run, "PHYSICS"), 1, ValidityInterval::instant(at), at);
        mo
    }

    #[tokio::test]
    async fn test_store_and_retrieve_latest() {
        let db = setup_test_db().await;
        let t0 = Utc::now() - Duration::seconds(10);
        db.store_mo(&mo_at(1, 1, t0)).await.unwrap();
        db.store_mo(&mo_at(2, 1, t0 + Duration::seconds(5))).await.unwrap();

        let latest = db
            .retrieve_mo("TST/MO/Task", "h1", None, &Activity::default())
            .await
            .unwrap()
            .expect("object should exist");
        assert_eq!(latest.payload().entries(), Some(2.0));

        let older = db
            .retrieve_mo("TST/MO/Task", "h1", Some(t0 + Duration::seconds(1)), &Activity::default())
            .await
            .unwrap()
            .expect("older version should exist");
        assert_eq!(older.payload().entries(), Some(1.0));

        let before = db
            .retrieve_mo("TST/MO/Task", "h1", Some(t0 - Duration::seconds(1)), &Activity::default())
            .await
            .unwrap();
        assert!(before.is_none());
    }

    #[tokio::test]
    async fn test_activity_filter() {
        let db = setup_test_db().await;
        let t0 = Utc::now() - Duration::seconds(10);
        db.store_mo(&mo_at(1, 100, t0)).await.unwrap();
        db.store_mo(&mo_at(2, 200, t0 + Duration::seconds(1))).await.unwrap();

        let run100 = db
            .retrieve_mo("TST/MO/Task", "h1", None, &Activity::new(100, ""))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run100.activity().number, 100);
        assert!(db
            .retrieve_mo("TST/MO/Task", "h1", None, &Activity::new(300, ""))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_qo_roundtrip_and_listing() {
        let db = setup_test_db().await;
        let mut qo = QualityObject::new(Quality::medium(), "Check", "TST", "OnAny", vec!["Task/h1".into()]);
        qo.stamp(&Activity::new(1, "PHYSICS"), 1, None, Utc::now() - Duration::seconds(1));
        db.store_qo(&qo).await.unwrap();
        db.store_mo(&mo_at(1, 1, Utc::now() - Duration::seconds(1))).await.unwrap();

        let back = db
            .retrieve_qo("TST/QO/Check", "Check", None, &Activity::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.quality(), &Quality::medium());

        let all = db.list_objects("TST/").await.unwrap();
        assert_eq!(all, vec!["TST/MO/Task/h1".to_string(), "TST/QO/Check/Check".to_string()]);
        assert_eq!(db.list_objects("TST/QO").await.unwrap().len(), 1);

        let versions = db.list_versions("TST/QO/Check", "Check").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].kind, ObjectKind::Qo);
        assert_eq!(versions[0].activity.number, 1);
    }

    #[tokio::test]
    async fn test_retrieve_by_key() {
        let db = setup_test_db().await;
        db.store_mo(&mo_at(3, 1, Utc::now() - Duration::seconds(1))).await.unwrap();
        let mo = db
            .retrieve_mo_by_key("TST/MO/Task/h1", None, &Activity::any())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mo.name(), "h1");
        assert!(db.retrieve_mo_by_key("h1", None, &Activity::any()).await.is_err());
    }
}
