//! Cooperative cancellation checkpoints.
//!
//! Long-running loops call [`checkpoint`] once per unit of work (per retry,
//! per processed item, or per bounded slice of CPU-bound work). Network calls
//! go through [`guarded_call`] so a result that arrives after the user asked
//! to stop is dropped instead of acted on.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::core::{CancelRegistry, CoordinationError};
use crate::util::UserId;

/// Fail with [`CoordinationError::Cancelled`] if the user asked to stop,
/// otherwise yield to the scheduler once.
///
/// # Errors
///
/// [`CoordinationError::Cancelled`] when the user's cancellation flag is set.
pub async fn checkpoint(registry: &CancelRegistry, user_id: UserId) -> Result<(), CoordinationError> {
    ensure_not_cancelled(registry, user_id)?;
    tokio::task::yield_now().await;
    ensure_not_cancelled(registry, user_id)
}

/// Synchronous half of [`checkpoint`], for CPU-bound loops that must not
/// await.
///
/// # Errors
///
/// [`CoordinationError::Cancelled`] when the user's cancellation flag is set.
pub fn ensure_not_cancelled(registry: &CancelRegistry, user_id: UserId) -> Result<(), CoordinationError> {
    if registry.is_cancel_requested(user_id) {
        tracing::debug!(user_id, "cancellation observed at checkpoint");
        return Err(CoordinationError::Cancelled(user_id));
    }
    Ok(())
}

/// Run a network call between two checkpoints.
///
/// # Errors
///
/// [`CoordinationError::Cancelled`] if the flag was set before the call
/// started or while it was in flight. In the second case the call's output is
/// discarded.
pub async fn guarded_call<F>(
    registry: &CancelRegistry,
    user_id: UserId,
    call: F,
) -> Result<F::Output, CoordinationError>
where
    F: Future,
{
    checkpoint(registry, user_id).await?;
    let output = call.await;
    if registry.is_cancel_requested(user_id) {
        tracing::debug!(user_id, "discarding result of call finished after cancel");
        return Err(CoordinationError::Cancelled(user_id));
    }
    Ok(output)
}

/// Drive `fut` while polling the user's flag every `interval`; the future is
/// dropped as soon as a cancel is seen.
///
/// For work with no natural checkpoints of its own.
///
/// # Errors
///
/// [`CoordinationError::Cancelled`] when the flag is observed before `fut`
/// completes.
pub async fn with_cancellation_check<F>(
    registry: &CancelRegistry,
    user_id: UserId,
    fut: F,
    interval: Duration,
) -> Result<F::Output, CoordinationError>
where
    F: Future,
{
    tokio::pin!(fut);
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            output = &mut fut => return Ok(output),
            _ = ticker.tick() => ensure_not_cancelled(registry, user_id)?,
        }
    }
}
