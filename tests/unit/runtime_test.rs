//! Tests for the cancel command

use prometheus_coordination::builders::build_context;
use prometheus_coordination::config::CoordinationConfig;
use prometheus_coordination::runtime::{handle_cancel_command, CancelCommandOutcome, CoordinationContext};

fn context() -> CoordinationContext {
    let mut cfg = CoordinationConfig::default();
    cfg.admins = vec![1];
    cfg.cancel.grace_period_ms = 500;
    build_context(cfg).unwrap()
}

#[tokio::test]
async fn test_nothing_to_cancel() {
    let ctx = context();
    let outcome = handle_cancel_command(&ctx, 5, &[]).await;
    assert_eq!(outcome, CancelCommandOutcome::NothingToCancel { target: 5 });
    assert!(!ctx.registry().is_cancel_requested(5));
}

#[tokio::test]
async fn test_self_cancel_clears_when_settled() {
    let ctx = context();
    let handle = ctx
        .registry()
        .spawn_registered(5, "broadcast", std::future::pending::<()>());
    tokio::task::yield_now().await;

    let outcome = handle_cancel_command(&ctx, 5, &[]).await;
    let CancelCommandOutcome::Cancelled { target, by_admin, report } = outcome else {
        panic!("expected a cancellation, got {outcome:?}");
    };
    assert_eq!(target, 5);
    assert!(!by_admin);
    assert_eq!(report.tasks_cancelled, 1);
    assert!(report.is_settled());
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(!ctx.registry().is_cancel_requested(5));
}

#[tokio::test]
async fn test_non_admin_cannot_target_others() {
    let ctx = context();
    let _flow = ctx.registry().register_flow(6, "enroll");
    let outcome = handle_cancel_command(&ctx, 5, &["6"]).await;
    assert_eq!(outcome, CancelCommandOutcome::Forbidden);
    assert!(!ctx.registry().is_cancel_requested(6));
}

#[tokio::test]
async fn test_admin_targets_other_user() {
    let ctx = context();
    ctx.registry().register_job(6, "export", || Ok(()));
    let outcome = handle_cancel_command(&ctx, 1, &["6"]).await;
    assert!(matches!(
        outcome,
        CancelCommandOutcome::Cancelled { target: 6, by_admin: true, .. }
    ));
    assert!(!outcome.needs_operator_attention());
}

#[tokio::test]
async fn test_admin_with_bad_argument() {
    let ctx = context();
    let outcome = handle_cancel_command(&ctx, 1, &["someone"]).await;
    assert_eq!(
        outcome,
        CancelCommandOutcome::InvalidTarget {
            raw: "someone".into()
        }
    );
}

#[tokio::test]
async fn test_context_throttle_uses_configured_backoff() {
    use prometheus_coordination::runtime::{CallOutcome, ThrottleOutcome};
    use std::time::Duration;

    let ctx = context();
    let throttle = ctx.throttle(Duration::ZERO);
    let outcome = throttle
        .call("crm", || async { CallOutcome::<()>::RateLimited { retry_after: None } })
        .await
        .unwrap();
    assert!(matches!(outcome, ThrottleOutcome::RateLimited { .. }));

    let remaining = ctx.cooldowns().remaining("crm").await.unwrap();
    assert!(remaining > Duration::from_secs(55));
    assert!(remaining <= Duration::from_secs(60));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeat_cancel_clears_flag_left_by_unsettled_cancel() {
    use prometheus_coordination::core::TaskHandle;
    use prometheus_coordination::runtime::CancellableOperation;
    use std::sync::{Arc, Barrier};

    let mut cfg = CoordinationConfig::default();
    cfg.cancel.grace_period_ms = 50;
    let ctx = build_context(cfg).unwrap();

    let release = Arc::new(Barrier::new(2));
    let gate = Arc::clone(&release);
    let blocking = tokio::task::spawn_blocking(move || {
        gate.wait();
    });
    let task_id = ctx.registry().register_task(
        7,
        TaskHandle::uninterruptible("pdf-render", blocking.abort_handle()),
    );

    let first = handle_cancel_command(&ctx, 7, &[]).await;
    assert!(first.needs_operator_attention());
    assert!(ctx.registry().is_cancel_requested(7));

    release.wait();
    blocking.await.unwrap();
    ctx.registry().unregister_task(7, task_id);

    let second = handle_cancel_command(&ctx, 7, &[]).await;
    assert_eq!(second, CancelCommandOutcome::NothingToCancel { target: 7 });
    assert!(!ctx.registry().is_cancel_requested(7));

    let op = CancellableOperation::begin(ctx.registry(), 7, "enroll");
    assert!(op.checkpoint().await.is_ok());
}
