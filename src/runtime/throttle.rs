//! Paced calls against downstream collaborators.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{CooldownManager, CoordinationError};

/// What the paced action reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    /// The action completed.
    Done(T),
    /// The downstream asked us to back off.
    RateLimited {
        /// Backoff requested by the downstream, if it said.
        retry_after: Option<Duration>,
    },
}

/// Result of [`Throttle::call`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottleOutcome<T> {
    /// The action ran and completed.
    Completed(T),
    /// The action ran and was rate limited; the key is cooling down.
    RateLimited {
        /// Next permitted time in milliseconds since epoch.
        next_allowed_ms: u64,
    },
    /// The key was cooling down; the action did not run.
    Skipped {
        /// Time left in the cooldown.
        remaining: Duration,
    },
}

/// Wraps a [`CooldownManager`] with a fixed pacing policy.
#[derive(Clone)]
pub struct Throttle {
    cooldowns: CooldownManager,
    interval: Duration,
    rate_limit_backoff: Duration,
}

impl Throttle {
    /// Pace actions at most once per `interval`. A zero interval only
    /// applies cooldowns after rate-limit responses.
    #[must_use]
    pub const fn new(cooldowns: CooldownManager, interval: Duration, rate_limit_backoff: Duration) -> Self {
        Self {
            cooldowns,
            interval,
            rate_limit_backoff,
        }
    }

    /// Run `action` unless `key` is cooling down, then update the cooldown.
    ///
    /// A busy cooldown means "skip this cycle"; this never waits it out.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the cooldown store
    /// cannot be reached, either before the action (it does not run) or
    /// after it (its output is not delivered, since the next caller could
    /// otherwise run unthrottled).
    pub async fn call<F, Fut, T>(&self, key: &str, action: F) -> Result<ThrottleOutcome<T>, CoordinationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        if self.cooldowns.is_cooldown_active(key).await? {
            let remaining = self.cooldowns.remaining(key).await?;
            tracing::debug!(key, remaining_ms = remaining.as_millis(), "cooldown active, skipping");
            return Ok(ThrottleOutcome::Skipped { remaining });
        }

        match action().await {
            CallOutcome::Done(output) => {
                if !self.interval.is_zero() {
                    self.cooldowns.set_cooldown(key, self.interval).await?;
                }
                Ok(ThrottleOutcome::Completed(output))
            }
            CallOutcome::RateLimited { retry_after } => {
                let backoff = retry_after.unwrap_or(self.rate_limit_backoff);
                let next_allowed_ms = self.cooldowns.set_cooldown(key, backoff).await?;
                tracing::warn!(key, backoff_ms = backoff.as_millis(), "rate limited by downstream");
                Ok(ThrottleOutcome::RateLimited { next_allowed_ms })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::InMemoryCooldownStore;
    use crate::util::ManualClock;
    use std::sync::Arc;

    fn throttle(clock: Arc<ManualClock>) -> Throttle {
        let cooldowns = CooldownManager::new(Arc::new(InMemoryCooldownStore::new())).with_clock(clock);
        Throttle::new(cooldowns, Duration::from_secs(1), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_paces_repeated_calls() {
        let clock = Arc::new(ManualClock::new(10_000));
        let throttle = throttle(Arc::clone(&clock));

        let first = throttle.call("broadcast", || async { CallOutcome::Done(1) }).await.unwrap();
        assert_eq!(first, ThrottleOutcome::Completed(1));

        let second = throttle.call("broadcast", || async { CallOutcome::Done(2) }).await.unwrap();
        assert!(matches!(second, ThrottleOutcome::Skipped { .. }));

        clock.advance(Duration::from_millis(1_500));
        let third = throttle.call("broadcast", || async { CallOutcome::Done(3) }).await.unwrap();
        assert_eq!(third, ThrottleOutcome::Completed(3));
    }

    #[tokio::test]
    async fn test_rate_limit_sets_backoff() {
        let clock = Arc::new(ManualClock::new(10_000));
        let throttle = throttle(Arc::clone(&clock));

        let outcome = throttle
            .call("sheets-api", || async {
                CallOutcome::<()>::RateLimited { retry_after: None }
            })
            .await
            .unwrap();
        assert_eq!(outcome, ThrottleOutcome::RateLimited { next_allowed_ms: 40_000 });

        clock.advance(Duration::from_secs(10));
        let skipped = throttle.call("sheets-api", || async { CallOutcome::Done(()) }).await.unwrap();
        assert_eq!(skipped, ThrottleOutcome::Skipped { remaining: Duration::from_secs(20) });
    }
}
