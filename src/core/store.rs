//! Persistence abstractions shared by every process in the fleet.
//!
//! Every mutating method is a single atomic operation at the storage layer.
//! Callers never read-then-write; the conditional logic lives inside the
//! store so two processes cannot interleave between the check and the write.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::CoordinationError;
use crate::util::LockToken;

/// Persisted lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique resource name.
    pub key: String,
    /// Ownership proof of the current holder.
    pub token: LockToken,
    /// Expiry in milliseconds since epoch.
    pub expires_at_ms: u64,
}

impl LockRecord {
    /// A record is valid while `now < expires_at`.
    #[must_use]
    pub const fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Persisted cooldown row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRecord {
    /// Throttle key.
    pub key: String,
    /// Earliest permitted time in milliseconds since epoch.
    pub next_allowed_ms: u64,
}

/// Abstraction for lock storage backends.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Insert `record` unless a record for the same key is still valid at
    /// `now_ms`. An expired record is replaced. Returns whether the caller
    /// now holds the lock.
    async fn try_insert(&self, record: LockRecord, now_ms: u64) -> Result<bool, CoordinationError>;

    /// Delete the record for `key` only if its token equals `token`.
    async fn delete_if_owned(&self, key: &str, token: &LockToken) -> Result<bool, CoordinationError>;

    /// Move `expires_at` to `expires_at_ms` only if the record is owned by
    /// `token` and still valid at `now_ms`.
    async fn extend_if_owned(
        &self,
        key: &str,
        token: &LockToken,
        expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<bool, CoordinationError>;

    /// Fetch the current record, expired or not.
    async fn get(&self, key: &str) -> Result<Option<LockRecord>, CoordinationError>;

    /// Remove every record expired at `now_ms`; returns how many were removed.
    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError>;
}

/// Abstraction for cooldown storage backends.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Fetch the stored next-allowed time.
    async fn get(&self, key: &str) -> Result<Option<u64>, CoordinationError>;

    /// Store `max(existing, candidate_ms)` and return the value now stored.
    async fn upsert_max(&self, key: &str, candidate_ms: u64) -> Result<u64, CoordinationError>;

    /// Remove the record; returns whether one existed.
    async fn delete(&self, key: &str) -> Result<bool, CoordinationError>;

    /// Remove records whose window closed before `now_ms`.
    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError>;
}
