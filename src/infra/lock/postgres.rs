//! Postgres-backed lock store.
//!
//! Each trait method maps to exactly one SQL statement. Acquisition relies on
//! the primary key plus a conditional `ON CONFLICT .. DO UPDATE .. WHERE`, so
//! the expiry check and the write happen in the same statement.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::{CoordinationError, LockRecord, LockStore};
use crate::infra::{from_db_ms, storage_error, to_db_ms};
use crate::util::LockToken;

const TRY_INSERT: &str = r"
INSERT INTO locks (key, token, expires_at)
VALUES ($1, $2, $3)
ON CONFLICT (key) DO UPDATE
    SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
    WHERE locks.expires_at <= $4
RETURNING key
";

const DELETE_IF_OWNED: &str = "DELETE FROM locks WHERE key = $1 AND token = $2";

const EXTEND_IF_OWNED: &str = r"
UPDATE locks SET expires_at = GREATEST(expires_at, $3)
WHERE key = $1 AND token = $2 AND expires_at > $4
";

const SELECT_ONE: &str = "SELECT key, token, expires_at FROM locks WHERE key = $1";

const PURGE_EXPIRED: &str = "DELETE FROM locks WHERE expires_at <= $1";

/// Lock store over a shared Postgres database.
#[derive(Clone)]
pub struct PostgresLockStore {
    pool: PgPool,
}

impl PostgresLockStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Migration statements for the `locks` table.
    #[must_use]
    pub fn migrations() -> &'static [&'static str] {
        &[r"
CREATE TABLE IF NOT EXISTS locks (
    key TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    expires_at BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_locks_expires_at ON locks (expires_at);
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
impl LockStore for PostgresLockStore {
    async fn try_insert(&self, record: LockRecord, now_ms: u64) -> Result<bool, CoordinationError> {
        let row: Option<(String,)> = sqlx::query_as(TRY_INSERT)
            .bind(&record.key)
            .bind(record.token.as_str())
            .bind(to_db_ms(record.expires_at_ms))
            .bind(to_db_ms(now_ms))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.is_some())
    }

    async fn delete_if_owned(&self, key: &str, token: &LockToken) -> Result<bool, CoordinationError> {
        let result = sqlx::query(DELETE_IF_OWNED)
            .bind(key)
            .bind(token.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend_if_owned(
        &self,
        key: &str,
        token: &LockToken,
        expires_at_ms: u64,
        now_ms: u64,
    ) -> Result<bool, CoordinationError> {
        let result = sqlx::query(EXTEND_IF_OWNED)
            .bind(key)
            .bind(token.as_str())
            .bind(to_db_ms(expires_at_ms))
            .bind(to_db_ms(now_ms))
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, CoordinationError> {
        let row: Option<(String, String, i64)> = sqlx::query_as(SELECT_ONE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.map(|(key, token, expires_at)| LockRecord {
            key,
            token: LockToken::from_raw(token),
            expires_at_ms: from_db_ms(expires_at),
        }))
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
