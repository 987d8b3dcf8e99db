//! TTL-based distributed lock for singleton work across a fleet.
//!
//! A holder that crashes without releasing blocks others for at most one TTL:
//! once `expires_at` passes, the next `acquire` replaces the stale record.
//! Jobs whose duration is unpredictable should call [`DistributedLock::renew`]
//! well inside the TTL.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{CoordinationError, LockRecord, LockStore};
use crate::util::{duration_ms, Clock, LockToken, SystemClock};

/// Number of ownership mismatches between two operational alerts.
pub const DEFAULT_MISMATCH_ALERT_THRESHOLD: u64 = 3;

/// Mutual exclusion primitive built on a shared [`LockStore`].
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    mismatches: Arc<AtomicU64>,
    mismatch_alert_threshold: u64,
}

impl DistributedLock {
    /// Create a lock manager over `store` using the system clock.
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            mismatches: Arc::new(AtomicU64::new(0)),
            mismatch_alert_threshold: DEFAULT_MISMATCH_ALERT_THRESHOLD,
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Raise an alert every `threshold` ownership mismatches; zero disables it.
    #[must_use]
    pub const fn with_mismatch_alert_threshold(mut self, threshold: u64) -> Self {
        self.mismatch_alert_threshold = threshold;
        self
    }

    /// Try to take the lock for `ttl`.
    ///
    /// Returns `Ok(None)` when another holder has a valid record. Callers
    /// must skip this cycle rather than retry in a loop.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached; the caller must not run the guarded work.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CoordinationError> {
        let now = self.clock.now_ms();
        let token = LockToken::generate();
        let record = LockRecord {
            key: key.to_string(),
            token: token.clone(),
            expires_at_ms: now.saturating_add(duration_ms(ttl)),
        };

        match self.store.try_insert(record, now).await {
            Ok(true) => {
                tracing::info!(lock = key, ttl_ms = duration_ms(ttl), "acquired distributed lock");
                Ok(Some(token))
            }
            Ok(false) => {
                tracing::debug!(lock = key, "lock busy, skipping");
                Ok(None)
            }
            Err(e) => {
                tracing::error!(lock = key, error = %e, "failed to acquire lock");
                Err(e)
            }
        }
    }

    /// Release the lock if `token` still owns it. Releasing twice, or after
    /// another holder took over, is a no-op that returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached. The record then expires on its own.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool, CoordinationError> {
        let released = self.store.delete_if_owned(key, token).await.map_err(|e| {
            tracing::error!(lock = key, error = %e, "failed to release lock");
            e
        })?;

        if released {
            tracing::info!(lock = key, "released distributed lock");
        } else {
            self.classify_miss(key, token, "release").await;
        }
        Ok(released)
    }

    /// Push the expiry of a held lock to `now + ttl`.
    ///
    /// Returns `Ok(false)` if the token no longer owns a valid record.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn renew(
        &self,
        key: &str,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let now = self.clock.now_ms();
        let expires_at = now.saturating_add(duration_ms(ttl));
        let renewed = self
            .store
            .extend_if_owned(key, token, expires_at, now)
            .await
            .map_err(|e| {
                tracing::error!(lock = key, error = %e, "failed to renew lock");
                e
            })?;

        if renewed {
            tracing::debug!(lock = key, expires_at_ms = expires_at, "renewed distributed lock");
        } else {
            self.classify_miss(key, token, "renew").await;
        }
        Ok(renewed)
    }

    /// Whether a valid record currently exists for `key`.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn is_locked(&self, key: &str) -> Result<bool, CoordinationError> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .get(key)
            .await?
            .is_some_and(|record| record.is_valid_at(now)))
    }

    /// Delete expired records. Expired records never block acquisition, so
    /// this only keeps the table small.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn purge_expired(&self) -> Result<usize, CoordinationError> {
        let removed = self.store.purge_expired(self.clock.now_ms()).await?;
        if removed > 0 {
            tracing::info!(removed, "purged expired locks");
        }
        Ok(removed)
    }

    /// Total ownership mismatches seen by this instance.
    #[must_use]
    pub fn ownership_mismatches(&self) -> u64 {
        self.mismatches.load(Ordering::Acquire)
    }

    /// Distinguish "already gone" from "someone else holds it". The read is
    /// for logging only; no write depends on it.
    async fn classify_miss(&self, key: &str, token: &LockToken, op: &str) {
        let now = self.clock.now_ms();
        match self.store.get(key).await {
            Ok(Some(record)) if record.token != *token && record.is_valid_at(now) => {
                self.record_mismatch(key, op);
            }
            Ok(Some(record)) if record.token == *token => {
                // Our own record, but expired.
                tracing::warn!(lock = key, op, "lock expired before {op}");
                self.record_mismatch(key, op);
            }
            Ok(_) => {
                tracing::debug!(lock = key, op, "lock already released");
            }
            Err(e) => {
                tracing::warn!(lock = key, op, error = %e, "could not inspect lock after {op} miss");
            }
        }
    }

    fn record_mismatch(&self, key: &str, op: &str) {
        let count = self.mismatches.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!(
            lock = key,
            op,
            error = %CoordinationError::LockOwnershipMismatch(key.to_string()),
            "stale lock token"
        );
        if self.mismatch_alert_threshold > 0 && count % self.mismatch_alert_threshold == 0 {
            tracing::error!(
                lock = key,
                mismatches = count,
                "recurring lock ownership mismatches; TTL may be shorter than job duration or clocks are skewed"
            );
        }
    }
}
