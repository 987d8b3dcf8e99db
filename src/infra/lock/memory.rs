//! In-memory lock store.
//!
//! Shared by every `DistributedLock` holding the same `Arc`, which makes it
//! suitable for single-process deployments and for simulating a fleet in
//! tests. Each operation runs under one mutex, so the check-and-write is
//! atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{CoordinationError, LockRecord, LockStore};
use crate::util::LockToken;

/// Lock records held in a process-local map.
#[derive(Default)]
pub struct InMemoryLockStore {
    records: Mutex<HashMap<String, LockRecord>>,
}

impl InMemoryLockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_insert(&self, record: LockRecord, now_ms: u64) -> Result<bool, CoordinationError> {
        let mut records = self.records.lock();
        if records
            .get(&record.key)
            .is_some_and(|existing| existing.is_valid_at(now_ms))
        {
            return Ok(false);
        }
        records.insert(record.key.clone(), record);
        Ok(true)
    }

    async fn delete_if_owned(&self, key: &str, token: &LockToken) -> Result<bool, CoordinationError> {
        let mut records = self.records.lock();
        if records.get(key).is_some_and(|r| r.token == *token) {
            records.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn extend_if_owned(
        &self,
        key: &str,
        token: &LockToken,
        expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<bool, CoordinationError> {
        let mut records = self.records.lock();
        match records.get_mut(key) {
            Some(record) if record.token == *token && record.is_valid_at(now_ms) => {
                record.expires_at_ms = record.expires_at_ms.max(expires_at_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, CoordinationError> {
        Ok(self.records.lock().get(key).cloned())
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.is_valid_at(now_ms));
        Ok(before.saturating_sub(records.len()))
    }
}
