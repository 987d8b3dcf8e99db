//! Tests for utility functions

use std::collections::HashSet;
use std::time::Duration;

use prometheus_coordination::util::{duration_ms, now_ms, Clock, JobToken, LockToken, ManualClock, SystemClock};

#[test]
fn test_lock_tokens_are_unique() {
    let tokens: HashSet<String> = (0..100).map(|_| LockToken::generate().as_str().to_string()).collect();
    assert_eq!(tokens.len(), 100);
}

#[test]
fn test_job_tokens_are_unique() {
    assert_ne!(JobToken::generate(), JobToken::generate());
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(0);
    clock.advance(Duration::from_millis(1_500));
    assert_eq!(clock.now_ms(), 1_500);
    clock.set(10);
    assert_eq!(clock.now_ms(), 10);
}

#[test]
fn test_system_clock_tracks_wall_time() {
    let before = now_ms();
    let seen = SystemClock.now_ms();
    assert!(seen >= before);
}

#[test]
fn test_duration_ms_saturates() {
    assert_eq!(duration_ms(Duration::from_secs(2)), 2_000);
    assert_eq!(duration_ms(Duration::MAX), u64::MAX);
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_coordination::util::init_tracing();
    prometheus_coordination::util::init_tracing();
    tracing::info!("tracing initialized");
}
