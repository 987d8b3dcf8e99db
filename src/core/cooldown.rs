//! Per-key throttle windows that survive restarts and span replicas.

use std::sync::Arc;
use std::time::Duration;

use crate::core::{CooldownStore, CoordinationError};
use crate::util::{duration_ms, Clock, SystemClock};

/// Throttle primitive built on a shared [`CooldownStore`].
#[derive(Clone)]
pub struct CooldownManager {
    store: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
}

impl CooldownManager {
    /// Create a manager over `store` using the system clock.
    pub fn new(store: Arc<dyn CooldownStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// True while the stored next-allowed time is in the future.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached. Callers must treat that as "do not proceed".
    pub async fn is_cooldown_active(&self, key: &str) -> Result<bool, CoordinationError> {
        let now = self.clock.now_ms();
        let active = self
            .store
            .get(key)
            .await
            .map_err(|e| {
                tracing::error!(cooldown = key, error = %e, "failed to read cooldown");
                e
            })?
            .is_some_and(|next_allowed| next_allowed > now);
        if active {
            tracing::debug!(cooldown = key, "cooldown active");
        }
        Ok(active)
    }

    /// Extend the window for `key` to at least `now + duration`. A longer
    /// window already stored by another process is kept.
    ///
    /// Returns the next-allowed time now in effect.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn set_cooldown(&self, key: &str, duration: Duration) -> Result<u64, CoordinationError> {
        let candidate = self.clock.now_ms().saturating_add(duration_ms(duration));
        let stored = self.store.upsert_max(key, candidate).await.map_err(|e| {
            tracing::error!(cooldown = key, error = %e, "failed to set cooldown");
            e
        })?;
        if stored > candidate {
            tracing::debug!(cooldown = key, next_allowed_ms = stored, "kept longer existing cooldown");
        } else {
            tracing::info!(cooldown = key, next_allowed_ms = stored, "cooldown set");
        }
        Ok(stored)
    }

    /// Remove the window for `key`.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn clear_cooldown(&self, key: &str) -> Result<bool, CoordinationError> {
        let removed = self.store.delete(key).await?;
        if removed {
            tracing::info!(cooldown = key, "cleared cooldown");
        }
        Ok(removed)
    }

    /// Stored next-allowed time, if any.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn next_allowed_at(&self, key: &str) -> Result<Option<u64>, CoordinationError> {
        self.store.get(key).await
    }

    /// Time left before `key` is allowed again; zero when not throttled.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn remaining(&self, key: &str) -> Result<Duration, CoordinationError> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .get(key)
            .await?
            .map_or(Duration::ZERO, |next| {
                Duration::from_millis(next.saturating_sub(now))
            }))
    }

    /// Drop records whose window already closed.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the store cannot be
    /// reached.
    pub async fn purge_expired(&self) -> Result<usize, CoordinationError> {
        self.store.purge_expired(self.clock.now_ms()).await
    }
}
