//! Session and record storage.
//!
//! The [`RecordStore`] trait covers everything the clinic persists: each
//! user's constitution and an append-only log of diagnoses. Nothing is ever
//! updated or deleted through this interface.
//!
//! | Backend | Type | Use |
//! |---------|------|-----|
//! | `sqlite` | [`SqliteStore`] | Default, local file |
//! | `sheets` | [`SheetsStore`] | Shared Google spreadsheet |
//! | `memory` | [`MemoryStore`] | Tests and `--ephemeral` runs |

pub mod memory;
pub mod sheets;
pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RecordsConfig;
use crate::google_auth::{ServiceAccountAuth, ServiceAccountKey, SHEETS_SCOPES};
use crate::models::{Constitution, DiagnosisRecord};
use crate::secrets::{Secrets, DEFAULT_SERVICE_ACCOUNT_FILE, GOOGLE_SERVICE_ACCOUNT_FILE};

pub use memory::MemoryStore;
pub use sheets::SheetsStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The saved constitution for `user_id`, if the user is registered.
    async fn get_user_constitution(&self, user_id: &str) -> Result<Option<Constitution>>;

    /// Register a new user. Returns `false` (and changes nothing) when the
    /// user already exists.
    async fn register_user(&self, user_id: &str, constitution: Constitution) -> Result<bool>;

    /// Append one diagnosis row.
    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<()>;

    /// The most recent `limit` diagnoses for `user_id`, oldest first.
    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<DiagnosisRecord>>;
}

/// Keep the last `limit` items, preserving order.
pub(crate) fn tail<T>(mut rows: Vec<T>, limit: usize) -> Vec<T> {
    if rows.len() > limit {
        rows.drain(..rows.len() - limit);
    }
    rows
}

/// Open the configured backend.
pub async fn open_store(config: &RecordsConfig, secrets: &Secrets) -> Result<Arc<dyn RecordStore>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::open(config).await?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sheets" => {
            let key_path = PathBuf::from(
                secrets
                    .get(GOOGLE_SERVICE_ACCOUNT_FILE)
                    .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT_FILE.to_string()),
            );
            let key = ServiceAccountKey::from_file(&key_path)?;
            let auth = ServiceAccountAuth::new(key, SHEETS_SCOPES, config.timeout_secs)?;
            Ok(Arc::new(SheetsStore::new(config, Arc::new(auth))?))
        }
        other => bail!("Unknown records backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        assert_eq!(tail(vec![1, 2, 3, 4], 2), vec![3, 4]);
        assert_eq!(tail(vec![1, 2], 5), vec![1, 2]);
        assert_eq!(tail(vec![1, 2], 0), Vec::<i32>::new());
    }
}
