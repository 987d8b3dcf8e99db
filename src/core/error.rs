//! Error types for coordination primitives.

use thiserror::Error;

use crate::util::UserId;

/// Errors produced by the cancellation registry, locks and cooldowns.
///
/// Only [`CoordinationError::StorageUnavailable`] is ever returned by lock and
/// cooldown operations; the other variants classify conditions that are
/// logged, reported in summaries, or used by the integration helpers.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Registry used incorrectly (double unregister, unknown job token).
    #[error("registry misuse for user {user_id}: {detail}")]
    RegistryMisuse {
        /// User whose entry was touched.
        user_id: UserId,
        /// What went wrong.
        detail: String,
    },
    /// Lock is held by another process this cycle.
    #[error("lock `{0}` is held by another holder")]
    LockContention(String),
    /// Release or renew presented a stale token.
    #[error("lock `{0}` is not owned by the presented token")]
    LockOwnershipMismatch(String),
    /// Operations did not settle within the cancellation grace period.
    #[error("{remaining} operation(s) for user {user_id} still running after grace period")]
    CancellationTimeout {
        /// User being cancelled.
        user_id: UserId,
        /// Number of tasks still running.
        remaining: usize,
    },
    /// Backing store for locks or cooldowns could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    /// Operation observed a cancellation request at a checkpoint.
    #[error("operation cancelled for user {0}")]
    Cancelled(UserId),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CoordinationError {
    /// Whether this error represents a cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
