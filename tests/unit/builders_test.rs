//! Tests for builder modules

use std::sync::Arc;
use std::time::Duration;

use prometheus_coordination::builders::{build_context, build_context_with};
use prometheus_coordination::config::CoordinationConfig;
use prometheus_coordination::infra::{InMemoryCooldownStore, InMemoryLockStore};
use prometheus_coordination::util::ManualClock;

#[test]
fn test_build_context_defaults() {
    let ctx = build_context(CoordinationConfig::default()).unwrap();
    assert_eq!(ctx.registry().tracked_users(), 0);
    assert_eq!(ctx.config().cancel.grace_period_ms, 1_000);
}

#[tokio::test]
async fn test_build_context_with_shares_clock() {
    let clock = Arc::new(ManualClock::new(5_000));
    let ctx = build_context_with(
        CoordinationConfig::default(),
        Arc::new(InMemoryLockStore::new()),
        Arc::new(InMemoryCooldownStore::new()),
        clock.clone(),
    )
    .unwrap();

    ctx.cooldowns().set_cooldown("pace", Duration::from_secs(1)).await.unwrap();
    assert!(ctx.cooldowns().is_cooldown_active("pace").await.unwrap());
    clock.advance(Duration::from_secs(2));
    assert!(!ctx.cooldowns().is_cooldown_active("pace").await.unwrap());
}
