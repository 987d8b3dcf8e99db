//! Application-owned handle to the coordination primitives.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CoordinationConfig;
use crate::core::{CancelRegistry, CancelReport, CooldownManager, DistributedLock};
use crate::runtime::{Scheduler, Throttle};
use crate::util::UserId;

/// Registry, lock and cooldown manager for one process.
///
/// Built once at startup (see [`crate::builders`]) and cloned into every
/// handler that needs it. Call [`CoordinationContext::shutdown`] before the
/// process exits.
#[derive(Clone)]
pub struct CoordinationContext {
    registry: CancelRegistry,
    lock: DistributedLock,
    cooldowns: CooldownManager,
    config: Arc<CoordinationConfig>,
}

impl CoordinationContext {
    /// Assemble a context from its parts.
    #[must_use]
    pub fn new(
        registry: CancelRegistry,
        lock: DistributedLock,
        cooldowns: CooldownManager,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            registry,
            lock,
            cooldowns,
            config: Arc::new(config),
        }
    }

    /// Cancellation registry.
    #[must_use]
    pub const fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    /// Distributed lock.
    #[must_use]
    pub const fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Cooldown manager.
    #[must_use]
    pub const fn cooldowns(&self) -> &CooldownManager {
        &self.cooldowns
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Throttle pacing at most once per `interval`, with the configured
    /// rate-limit backoff.
    #[must_use]
    pub fn throttle(&self, interval: Duration) -> Throttle {
        Throttle::new(
            self.cooldowns.clone(),
            interval,
            self.config.cooldown.rate_limit_backoff(),
        )
    }

    /// Scheduler whose runs are registered under `operator_id`.
    #[must_use]
    pub fn scheduler(&self, operator_id: UserId) -> Scheduler {
        Scheduler::new(self.clone(), operator_id)
    }

    /// Cancel every tracked user's work and drop all bookkeeping.
    pub async fn shutdown(&self) -> Vec<CancelReport> {
        let users = self.registry.users();
        tracing::info!(users = users.len(), "shutting down coordination context");
        let mut reports = Vec::with_capacity(users.len());
        for user_id in users {
            reports.push(self.registry.cancel_all_for_user(user_id).await);
            self.registry.clear_user(user_id);
        }
        reports
    }
}
