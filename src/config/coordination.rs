//! Coordination configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::DEFAULT_MISMATCH_ALERT_THRESHOLD;
use crate::util::UserId;

/// Backing store selection for locks and cooldowns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StoreBackendConfig {
    /// In-memory stores; single process only.
    #[default]
    InMemory,
    /// Shared Postgres database (requires the `postgres` feature).
    Postgres {
        /// Connection string.
        url: String,
        /// Maximum pool connections.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

const fn default_max_connections() -> u32 {
    5
}

/// Cancellation registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelConfig {
    /// Upper bound on how long `cancel_all_for_user` waits for tasks to settle.
    pub grace_period_ms: u64,
    /// How often settlement is re-checked during the grace period.
    pub poll_interval_ms: u64,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1_000,
            poll_interval_ms: 10,
        }
    }
}

impl CancelConfig {
    /// Grace period as a [`Duration`].
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Poll interval as a [`Duration`], never zero.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_ms == 0 {
            Duration::from_millis(1)
        } else {
            Duration::from_millis(self.poll_interval_ms)
        }
    }
}

/// Distributed lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// TTL used by scheduled jobs that do not set their own.
    pub default_ttl_secs: u64,
    /// Ownership mismatches between operational alerts.
    pub mismatch_alert_threshold: u64,
    /// How often the scheduler purges expired lock and cooldown records.
    pub purge_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            mismatch_alert_threshold: DEFAULT_MISMATCH_ALERT_THRESHOLD,
            purge_interval_secs: 3_600,
        }
    }
}

impl LockConfig {
    /// Default TTL as a [`Duration`].
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Maintenance period, never zero.
    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        if self.purge_interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.purge_interval_secs)
        }
    }
}

/// Cooldown settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Cooldown applied after a downstream rate-limit response that did not
    /// say how long to wait.
    pub rate_limit_backoff_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_backoff_secs: 60,
        }
    }
}

impl CooldownConfig {
    /// Fallback backoff as a [`Duration`].
    #[must_use]
    pub const fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

/// Root coordination configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Lock/cooldown backing store.
    pub backend: StoreBackendConfig,
    /// Cancellation registry settings.
    pub cancel: CancelConfig,
    /// Lock settings.
    pub lock: LockConfig,
    /// Cooldown settings.
    pub cooldown: CooldownConfig,
    /// Users allowed to cancel other users' operations.
    pub admins: Vec<UserId>,
}

impl CoordinationConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.cancel.grace_period_ms == 0 {
            return Err("cancel.grace_period_ms must be greater than 0".into());
        }
        if self.cancel.poll_interval_ms > self.cancel.grace_period_ms {
            return Err("cancel.poll_interval_ms must not exceed grace_period_ms".into());
        }
        if self.lock.default_ttl_secs == 0 {
            return Err("lock.default_ttl_secs must be greater than 0".into());
        }
        if self.lock.mismatch_alert_threshold == 0 {
            return Err("lock.mismatch_alert_threshold must be greater than 0".into());
        }
        if let StoreBackendConfig::Postgres { url, max_connections } = &self.backend {
            if url.trim().is_empty() {
                return Err("backend.url must not be empty".into());
            }
            if *max_connections == 0 {
                return Err("backend.max_connections must be greater than 0".into());
            }
        }
        Ok(())
    }

    /// Whether `user_id` may cancel other users' operations.
    #[must_use]
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `COORD_*` environment variables, loading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// | variable | field |
    /// |---|---|
    /// | `COORD_DATABASE_URL` | selects the Postgres backend |
    /// | `COORD_DB_MAX_CONNECTIONS` | `backend.max_connections` |
    /// | `COORD_CANCEL_GRACE_MS` | `cancel.grace_period_ms` |
    /// | `COORD_CANCEL_POLL_MS` | `cancel.poll_interval_ms` |
    /// | `COORD_LOCK_TTL_SECS` | `lock.default_ttl_secs` |
    /// | `COORD_LOCK_ALERT_THRESHOLD` | `lock.mismatch_alert_threshold` |
    /// | `COORD_RATE_LIMIT_BACKOFF_SECS` | `cooldown.rate_limit_backoff_secs` |
    /// | `COORD_ADMINS` | comma-separated `admins` |
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`Self::from_env`] against an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = lookup("COORD_DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            let max_connections =
                parse_var(&lookup, "COORD_DB_MAX_CONNECTIONS")?.unwrap_or_else(default_max_connections);
            cfg.backend = StoreBackendConfig::Postgres { url, max_connections };
        }
        if let Some(v) = parse_var(&lookup, "COORD_CANCEL_GRACE_MS")? {
            cfg.cancel.grace_period_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "COORD_CANCEL_POLL_MS")? {
            cfg.cancel.poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "COORD_LOCK_TTL_SECS")? {
            cfg.lock.default_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "COORD_LOCK_ALERT_THRESHOLD")? {
            cfg.lock.mismatch_alert_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "COORD_RATE_LIMIT_BACKOFF_SECS")? {
            cfg.cooldown.rate_limit_backoff_secs = v;
        }
        if let Some(raw) = lookup("COORD_ADMINS") {
            cfg.admins = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<UserId>()
                        .map_err(|e| format!("COORD_ADMINS entry `{s}` invalid: {e}"))
                })
                .collect::<Result<_, _>>()?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| format!("{name} invalid: {e}"))
        })
        .transpose()
}
