//! Builders to construct a coordination context from configuration.

use std::sync::Arc;

use crate::config::{CoordinationConfig, StoreBackendConfig};
use crate::core::{CancelRegistry, CooldownManager, CooldownStore, CoordinationError, DistributedLock, LockStore};
use crate::infra::{InMemoryCooldownStore, InMemoryLockStore};
use crate::runtime::CoordinationContext;
use crate::util::{Clock, SystemClock};

/// Build a context over caller-supplied stores and clock.
///
/// # Errors
///
/// [`CoordinationError::InvalidConfig`] when `cfg` fails validation.
pub fn build_context_with(
    cfg: CoordinationConfig,
    lock_store: Arc<dyn LockStore>,
    cooldown_store: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
) -> Result<CoordinationContext, CoordinationError> {
    cfg.validate().map_err(CoordinationError::InvalidConfig)?;

    let registry = CancelRegistry::with_clock(cfg.cancel.clone(), Arc::clone(&clock));
    let lock = DistributedLock::new(lock_store)
        .with_clock(Arc::clone(&clock))
        .with_mismatch_alert_threshold(cfg.lock.mismatch_alert_threshold);
    let cooldowns = CooldownManager::new(cooldown_store).with_clock(clock);

    Ok(CoordinationContext::new(registry, lock, cooldowns, cfg))
}

/// Build a context over in-memory stores.
///
/// # Errors
///
/// [`CoordinationError::InvalidConfig`] when `cfg` fails validation or
/// selects a database backend; use `connect_context` for those.
pub fn build_context(cfg: CoordinationConfig) -> Result<CoordinationContext, CoordinationError> {
    if !matches!(cfg.backend, StoreBackendConfig::InMemory) {
        return Err(CoordinationError::InvalidConfig(
            "database backends must be opened with connect_context".into(),
        ));
    }
    tracing::warn!("using in-memory lock and cooldown stores; not shared across processes");
    build_context_with(
        cfg,
        Arc::new(InMemoryLockStore::new()),
        Arc::new(InMemoryCooldownStore::new()),
        Arc::new(SystemClock),
    )
}

/// Build a context for the configured backend, connecting to the database
/// and applying migrations when one is selected.
///
/// # Errors
///
/// [`CoordinationError::InvalidConfig`] for an invalid configuration and
/// [`CoordinationError::StorageUnavailable`] when the database cannot be
/// reached.
#[cfg(feature = "postgres")]
pub async fn connect_context(cfg: CoordinationConfig) -> Result<CoordinationContext, CoordinationError> {
    use crate::infra::{storage_error, PostgresCooldownStore, PostgresLockStore};

    let (url, max_connections) = match &cfg.backend {
        StoreBackendConfig::Postgres { url, max_connections } => (url.clone(), *max_connections),
        StoreBackendConfig::InMemory => return build_context(cfg),
    };
    cfg.validate().map_err(CoordinationError::InvalidConfig)?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .map_err(storage_error)?;

    let locks = PostgresLockStore::new(pool.clone());
    let cooldowns = PostgresCooldownStore::new(pool);
    locks.run_migrations().await?;
    cooldowns.run_migrations().await?;
    tracing::info!(max_connections, "connected coordination stores to postgres");

    build_context_with(cfg, Arc::new(locks), Arc::new(cooldowns), Arc::new(SystemClock))
}
