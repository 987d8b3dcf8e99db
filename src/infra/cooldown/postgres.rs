//! Postgres-backed cooldown store.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::{CooldownStore, CoordinationError};
use crate::infra::{from_db_ms, storage_error, to_db_ms};

const UPSERT_MAX: &str = r"
INSERT INTO cooldowns (key, next_allowed_time, updated_at)
VALUES ($1, $2, NOW())
ON CONFLICT (key) DO UPDATE
    SET next_allowed_time = GREATEST(cooldowns.next_allowed_time, EXCLUDED.next_allowed_time),
        updated_at = NOW()
RETURNING next_allowed_time
";

const SELECT_ONE: &str = "SELECT next_allowed_time FROM cooldowns WHERE key = $1";

const DELETE_ONE: &str = "DELETE FROM cooldowns WHERE key = $1";

const PURGE_EXPIRED: &str = "DELETE FROM cooldowns WHERE next_allowed_time <= $1";

/// Cooldown store over a shared Postgres database.
#[derive(Clone)]
pub struct PostgresCooldownStore {
    pool: PgPool,
}

impl PostgresCooldownStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Migration statements for the `cooldowns` table.
    #[must_use]
    pub fn migrations() -> &'static [&'static str] {
        &[r"
CREATE TABLE IF NOT EXISTS cooldowns (
    key TEXT PRIMARY KEY,
    next_allowed_time BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"]
    }

    /// Apply [`Self::migrations`].
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when a statement fails.
    pub async fn run_migrations(&self) -> Result<(), CoordinationError> {
        for stmt in Self::migrations() {
            sqlx::raw_sql(stmt)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CooldownStore for PostgresCooldownStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, CoordinationError> {
        let value: Option<i64> = sqlx::query_scalar(SELECT_ONE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(value.map(from_db_ms))
    }

    async fn upsert_max(&self, key: &str, candidate_ms: u64) -> Result<u64, CoordinationError> {
        let stored: i64 = sqlx::query_scalar(UPSERT_MAX)
            .bind(key)
            .bind(to_db_ms(candidate_ms))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(from_db_ms(stored))
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        let result = sqlx::query(DELETE_ONE)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError> {
        let result = sqlx::query(PURGE_EXPIRED)
            .bind(to_db_ms(now_ms))
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
