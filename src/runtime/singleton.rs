//! Run a body on at most one process at a time.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{CoordinationError, DistributedLock};
use crate::util::LockToken;

/// Result of a singleton run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingletonOutcome<T> {
    /// The lock was taken and the body ran.
    Ran(T),
    /// Another process holds the lock; this cycle was skipped.
    Skipped,
}

impl<T> SingletonOutcome<T> {
    /// Whether the body ran.
    #[must_use]
    pub const fn ran(&self) -> bool {
        matches!(self, Self::Ran(_))
    }

    /// Output of the body, if it ran.
    pub fn into_output(self) -> Option<T> {
        match self {
            Self::Ran(output) => Some(output),
            Self::Skipped => None,
        }
    }
}

/// Acquire `key` for `ttl`, run `body`, release.
///
/// A busy lock skips the body and logs; it never waits. A failed release is
/// logged and left to expire.
///
/// # Errors
///
/// [`CoordinationError::StorageUnavailable`] when the lock cannot be
/// acquired because the store is unreachable. The body does not run.
pub async fn run_singleton<F, Fut, T>(
    lock: &DistributedLock,
    key: &str,
    ttl: Duration,
    body: F,
) -> Result<SingletonOutcome<T>, CoordinationError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    run_singleton_renewing(lock, key, ttl, None, body).await
}

/// [`run_singleton`] that also renews the lock every `renew_every` while the
/// body runs, for jobs whose duration is unpredictable.
///
/// # Errors
///
/// See [`run_singleton`].
pub async fn run_singleton_renewing<F, Fut, T>(
    lock: &DistributedLock,
    key: &str,
    ttl: Duration,
    renew_every: Option<Duration>,
    body: F,
) -> Result<SingletonOutcome<T>, CoordinationError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(token) = lock.acquire(key, ttl).await? else {
        tracing::info!(lock = key, "singleton busy on another process, skipping cycle");
        return Ok(SingletonOutcome::Skipped);
    };

    let output = match renew_every {
        Some(every) if !every.is_zero() => run_with_renewal(lock, key, &token, ttl, every, body()).await,
        _ => body().await,
    };

    if let Err(e) = lock.release(key, &token).await {
        tracing::warn!(lock = key, error = %e, "release failed, lock will expire on its own");
    }
    Ok(SingletonOutcome::Ran(output))
}

async fn run_with_renewal<Fut>(
    lock: &DistributedLock,
    key: &str,
    token: &LockToken,
    ttl: Duration,
    every: Duration,
    body: Fut,
) -> Fut::Output
where
    Fut: Future,
{
    tokio::pin!(body);
    let start = tokio::time::Instant::now() + every;
    let mut ticker = tokio::time::interval_at(start, every);
    let mut held = true;

    loop {
        tokio::select! {
            output = &mut body => return output,
            _ = ticker.tick(), if held => match lock.renew(key, token, ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(lock = key, "lost singleton lock while running");
                    held = false;
                }
                Err(e) => tracing::warn!(lock = key, error = %e, "lock renewal failed"),
            },
        }
    }
}
