//! Tests for configuration validation

use std::collections::HashMap;

use prometheus_coordination::config::{CoordinationConfig, StoreBackendConfig};

#[test]
fn test_default_config_is_valid() {
    let cfg = CoordinationConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.backend, StoreBackendConfig::InMemory);
    assert_eq!(cfg.cancel.grace_period_ms, 1_000);
    assert_eq!(cfg.lock.default_ttl_secs, 300);
}

#[test]
fn test_zero_grace_period_is_invalid() {
    let mut cfg = CoordinationConfig::default();
    cfg.cancel.grace_period_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_poll_interval_longer_than_grace_is_invalid() {
    let mut cfg = CoordinationConfig::default();
    cfg.cancel.poll_interval_ms = 5_000;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_empty_database_url_is_invalid() {
    let cfg = CoordinationConfig {
        backend: StoreBackendConfig::Postgres {
            url: "  ".into(),
            max_connections: 5,
        },
        ..CoordinationConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_str() {
    let json = r#"{
        "backend": { "kind": "postgres", "url": "postgres://db/coord" },
        "cancel": { "grace_period_ms": 2000 },
        "admins": [1, 2]
    }"#;
    let cfg = CoordinationConfig::from_json_str(json).unwrap();
    assert_eq!(
        cfg.backend,
        StoreBackendConfig::Postgres {
            url: "postgres://db/coord".into(),
            max_connections: 5,
        }
    );
    assert_eq!(cfg.cancel.grace_period_ms, 2_000);
    assert_eq!(cfg.cancel.poll_interval_ms, 10);
    assert!(cfg.is_admin(2));
    assert!(!cfg.is_admin(3));
}

#[test]
fn test_from_json_str_rejects_invalid_values() {
    assert!(CoordinationConfig::from_json_str(r#"{"lock": {"default_ttl_secs": 0}}"#).is_err());
    assert!(CoordinationConfig::from_json_str("not json").is_err());
}

#[test]
fn test_from_lookup_reads_coord_variables() {
    let vars: HashMap<&str, &str> = [
        ("COORD_DATABASE_URL", "postgres://db/coord"),
        ("COORD_CANCEL_GRACE_MS", "2500"),
        ("COORD_LOCK_TTL_SECS", "600"),
        ("COORD_ADMINS", "10, 20,"),
    ]
    .into_iter()
    .collect();
    let cfg = CoordinationConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();

    assert!(matches!(cfg.backend, StoreBackendConfig::Postgres { .. }));
    assert_eq!(cfg.cancel.grace_period_ms, 2_500);
    assert_eq!(cfg.lock.default_ttl_secs, 600);
    assert_eq!(cfg.admins, vec![10, 20]);
}

#[test]
fn test_from_lookup_rejects_malformed_numbers() {
    let err = CoordinationConfig::from_lookup(|k| (k == "COORD_LOCK_TTL_SECS").then(|| "soon".to_string()))
        .unwrap_err();
    assert!(err.contains("COORD_LOCK_TTL_SECS"));
}
