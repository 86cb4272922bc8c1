use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::RecordsConfig;
use crate::db;

/// Create the record tables for the configured SQLite database.
pub async fn run_migrations(config: &RecordsConfig) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the record tables on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per user; never updated after insert
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            constitution TEXT NOT NULL,
            registered_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only diagnosis log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS diagnoses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at TEXT NOT NULL,
            user_id TEXT NOT NULL,
            symptom TEXT NOT NULL,
            label TEXT NOT NULL,
            summary TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_diagnoses_user_id ON diagnoses(user_id, id)")
        .execute(pool)
        .await?;

    Ok(())
}
