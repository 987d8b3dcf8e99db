//! In-memory cooldown store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{CooldownRecord, CooldownStore, CoordinationError};

/// Cooldown records held in a process-local map.
#[derive(Default)]
pub struct InMemoryCooldownStore {
    records: Mutex<HashMap<String, u64>>,
}

impl InMemoryCooldownStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored record.
    #[must_use]
    pub fn records(&self) -> Vec<CooldownRecord> {
        self.records
            .lock()
            .iter()
            .map(|(key, next)| CooldownRecord {
                key: key.clone(),
                next_allowed_ms: *next,
            })
            .collect()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, CoordinationError> {
        Ok(self.records.lock().get(key).copied())
    }

    async fn upsert_max(&self, key: &str, candidate_ms: u64) -> Result<u64, CoordinationError> {
        let mut records = self.records.lock();
        let entry = records.entry(key.to_string()).or_insert(candidate_ms);
        *entry = (*entry).max(candidate_ms);
        Ok(*entry)
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        Ok(self.records.lock().remove(key).is_some())
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, next| *next > now_ms);
        Ok(before.saturating_sub(records.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_keeps_maximum() {
        let store = InMemoryCooldownStore::new();
        assert_eq!(store.upsert_max("k", 100).await.unwrap(), 100);
        assert_eq!(store.upsert_max("k", 50).await.unwrap(), 100);
        assert_eq!(store.upsert_max("k", 150).await.unwrap(), 150);
        assert_eq!(store.get("k").await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryCooldownStore::new();
        store.upsert_max("old", 10).await.unwrap();
        store.upsert_max("new", 1_000).await.unwrap();

        assert_eq!(store.purge_expired(500).await.unwrap(), 1);
        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "new");
    }
}
