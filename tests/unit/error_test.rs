//! Tests for error types

use prometheus_coordination::core::CoordinationError;

#[test]
fn test_storage_unavailable_error() {
    let err = CoordinationError::StorageUnavailable("connection refused".to_string());
    assert_eq!(format!("{err}"), "storage unavailable: connection refused");
}

#[test]
fn test_cancellation_timeout_error() {
    let err = CoordinationError::CancellationTimeout {
        user_id: 42,
        remaining: 2,
    };
    assert_eq!(
        format!("{err}"),
        "2 operation(s) for user 42 still running after grace period"
    );
}

#[test]
fn test_cancelled_error() {
    let err = CoordinationError::Cancelled(7);
    assert!(err.is_cancelled());
    assert_eq!(format!("{err}"), "operation cancelled for user 7");
    assert!(!CoordinationError::LockContention("job-x".into()).is_cancelled());
}

#[test]
fn test_errors_convert_into_anyhow() {
    fn fails() -> prometheus_coordination::core::AppResult<()> {
        Err(CoordinationError::InvalidConfig("bad".into()))?
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<CoordinationError>().is_some());
}
