//! Infrastructure adapters for lock and cooldown storage backends.

pub mod cooldown;
pub mod lock;

pub use cooldown::InMemoryCooldownStore;
pub use lock::InMemoryLockStore;
#[cfg(feature = "postgres")]
pub use cooldown::PostgresCooldownStore;
#[cfg(feature = "postgres")]
pub use lock::PostgresLockStore;

#[cfg(feature = "postgres")]
use crate::core::CoordinationError;

/// Postgres has no unsigned 64-bit integer; epoch milliseconds fit in `i64`.
#[cfg(feature = "postgres")]
pub(crate) fn to_db_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[cfg(feature = "postgres")]
pub(crate) fn from_db_ms(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}

#[cfg(feature = "postgres")]
#[allow(clippy::needless_pass_by_value)]
pub(crate) fn storage_error(e: sqlx::Error) -> CoordinationError {
    CoordinationError::StorageUnavailable(e.to_string())
}
