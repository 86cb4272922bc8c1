//! In-memory [`RecordStore`] for tests and ephemeral sessions.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{tail, RecordStore};
use crate::models::{Constitution, DiagnosisRecord};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, Constitution>>,
    diagnoses: RwLock<Vec<DiagnosisRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every diagnosis row, in insertion order.
    pub fn all_diagnoses(&self) -> Vec<DiagnosisRecord> {
        self.diagnoses.read().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_user_constitution(&self, user_id: &str) -> Result<Option<Constitution>> {
        Ok(self.users.read().unwrap().get(user_id).copied())
    }

    async fn register_user(&self, user_id: &str, constitution: Constitution) -> Result<bool> {
        let mut users = self.users.write().unwrap();
        if users.contains_key(user_id) {
            return Ok(false);
        }
        users.insert(user_id.to_string(), constitution);
        Ok(true)
    }

    async fn save_diagnosis(&self, record: &DiagnosisRecord) -> Result<()> {
        self.diagnoses.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<DiagnosisRecord>> {
        let rows = self
            .diagnoses
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        Ok(tail(rows, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_once() {
        let store = MemoryStore::new();
        assert!(store.register_user("park", Constitution::Soyangin).await.unwrap());
        assert!(!store.register_user("park", Constitution::Taeyangin).await.unwrap());
        assert_eq!(
            store.get_user_constitution("park").await.unwrap(),
            Some(Constitution::Soyangin)
        );
        assert_eq!(store.get_user_constitution("choi").await.unwrap(), None);
    }
}
