//! SQLite-backed [`RecordStore`].
//!
//! Tables are created by [`migrate::apply`](crate::migrate::apply) when the
//! store is opened, so `herb init` is optional.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use super::RecordStore;
use crate::config::RecordsConfig;
use crate::db;
use crate::migrate;
use crate::models::{Constitution, DiagnosisRecord};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and ensure the schema exists.
    pub async fn open(config: &RecordsConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_user_constitution(&self, user_id: &str) -> Result<Option<Constitution>> {
        let row = sqlx::query("SELECT constitution FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|r| {
            let label: String = r.get("constitution");
            match label.parse() {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(user_id, label = %label, error = %e, "unrecognised stored constitution");
                    None
                }
            }
        }))
    }

    async fn register_user(&self, user_id: &str, constitution: Constitution) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO users (user_id, constitution, registered_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(constitution.label())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO diagnoses (recorded_at, user_id, symptom, label, summary)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.recorded_at)
        .bind(&record.user_id)
        .bind(&record.symptom)
        .bind(&record.label)
        .bind(&record.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<DiagnosisRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT recorded_at, user_id, symptom, label, summary
            FROM diagnoses
            WHERE user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records: Vec<DiagnosisRecord> = rows
            .iter()
            .map(|row| DiagnosisRecord {
                recorded_at: row.get("recorded_at"),
                user_id: row.get("user_id"),
                symptom: row.get("symptom"),
                label: row.get("label"),
                summary: row.get("summary"),
            })
            .collect();
        records.reverse();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let config = RecordsConfig {
            db_path: tmp.path().join("data").join("herb.sqlite"),
            ..RecordsConfig::default()
        };
        let store = SqliteStore::open(&config).await.unwrap();
        (tmp, store)
    }

    fn record(user: &str, symptom: &str) -> DiagnosisRecord {
        DiagnosisRecord {
            recorded_at: "2026-03-01 10:00:00".into(),
            user_id: user.into(),
            symptom: symptom.into(),
            label: "AI diagnosis complete".into(),
            summary: format!("advice for {}", symptom),
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let (_tmp, store) = store().await;
        assert_eq!(store.get_user_constitution("kim").await.unwrap(), None);
        assert!(store.register_user("kim", Constitution::Taeeumin).await.unwrap());
        assert!(!store.register_user("kim", Constitution::Soeumin).await.unwrap());
        assert_eq!(
            store.get_user_constitution("kim").await.unwrap(),
            Some(Constitution::Taeeumin)
        );
    }

    #[tokio::test]
    async fn test_history_is_recent_and_ordered() {
        let (_tmp, store) = store().await;
        for s in ["cough", "fever", "fatigue"] {
            store.save_diagnosis(&record("kim", s)).await.unwrap();
        }
        store.save_diagnosis(&record("lee", "rash")).await.unwrap();

        let history = store.history("kim", 2).await.unwrap();
        let symptoms: Vec<&str> = history.iter().map(|r| r.symptom.as_str()).collect();
        assert_eq!(symptoms, vec!["fever", "fatigue"]);
        assert_eq!(store.history("lee", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let config = RecordsConfig {
            db_path: tmp.path().join("herb.sqlite"),
            ..RecordsConfig::default()
        };
        let first = SqliteStore::open(&config).await.unwrap();
        first.register_user("han", Constitution::Unknown).await.unwrap();
        first.pool().close().await;

        let second = SqliteStore::open(&config).await.unwrap();
        assert_eq!(
            second.get_user_constitution("han").await.unwrap(),
            Some(Constitution::Unknown)
        );
    }
}
