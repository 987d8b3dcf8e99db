//! Integration tests for scheduled singleton jobs and context lifecycle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_coordination::builders::{build_context, build_context_with};
use prometheus_coordination::config::CoordinationConfig;
use prometheus_coordination::core::{AppResult, CooldownStore, CoordinationError};
use prometheus_coordination::infra::{InMemoryCooldownStore, InMemoryLockStore};
use prometheus_coordination::runtime::{JobRunOutcome, JobSpec, ScheduledJob};
use prometheus_coordination::util::ManualClock;

const OPERATOR: i64 = -1;

struct CountingJob(Arc<AtomicUsize>);

#[async_trait]
impl ScheduledJob for CountingJob {
    async fn run(&self) -> AppResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingJob;

#[async_trait]
impl ScheduledJob for FailingJob {
    async fn run(&self) -> AppResult<()> {
        anyhow::bail!("sheet not found")
    }
}

struct StuckJob;

#[async_trait]
impl ScheduledJob for StuckJob {
    async fn run(&self) -> AppResult<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Cooldown store whose writes land late.
struct SlowWrites {
    inner: InMemoryCooldownStore,
    delay: Duration,
}

/// Cooldown store whose first read misses the existing record.
struct StaleFirstRead {
    inner: Arc<InMemoryCooldownStore>,
    stale: AtomicBool,
}

#[async_trait]
impl CooldownStore for SlowWrites {
    async fn get(&self, key: &str) -> Result<Option<u64>, CoordinationError> {
        self.inner.get(key).await
    }

    async fn upsert_max(&self, key: &str, candidate_ms: u64) -> Result<u64, CoordinationError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert_max(key, candidate_ms).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        self.inner.delete(key).await
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError> {
        self.inner.purge_expired(now_ms).await
    }
}

#[async_trait]
impl CooldownStore for StaleFirstRead {
    async fn get(&self, key: &str) -> Result<Option<u64>, CoordinationError> {
        if self.stale.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn upsert_max(&self, key: &str, candidate_ms: u64) -> Result<u64, CoordinationError> {
        self.inner.upsert_max(key, candidate_ms).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CoordinationError> {
        self.inner.delete(key).await
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, CoordinationError> {
        self.inner.purge_expired(now_ms).await
    }
}

#[tokio::test]
async fn test_min_interval_survives_across_replicas() {
    let clock = Arc::new(ManualClock::new(0));
    let locks = Arc::new(InMemoryLockStore::new());
    let cooldowns = Arc::new(InMemoryCooldownStore::new());
    let replica = |_: usize| {
        build_context_with(CoordinationConfig::default(), locks.clone(), cooldowns.clone(), clock.clone())
            .unwrap()
            .scheduler(OPERATOR)
    };
    let (first, second) = (replica(0), replica(1));

    let runs = Arc::new(AtomicUsize::new(0));
    let job: Arc<dyn ScheduledJob> = Arc::new(CountingJob(Arc::clone(&runs)));
    let spec = JobSpec::new("daily-digest-job", Duration::from_secs(300))
        .with_min_interval(Duration::from_secs(3_600));

    assert_eq!(first.run_once(&spec, Arc::clone(&job)).await.unwrap(), JobRunOutcome::Completed);
    let again = second.run_once(&spec, Arc::clone(&job)).await.unwrap();
    assert!(matches!(again, JobRunOutcome::NotDue { .. }));

    clock.advance(Duration::from_secs(3_601));
    assert_eq!(second.run_once(&spec, job).await.unwrap(), JobRunOutcome::Completed);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_busy_lock_skips_run() {
    let ctx = build_context(CoordinationConfig::default()).unwrap();
    let spec = ctx.scheduler(OPERATOR).job_spec("pending-queue-sweep");
    assert_eq!(spec.lock_ttl, Duration::from_secs(300));
    let _held = ctx.lock().acquire("pending-queue-sweep", spec.lock_ttl).await.unwrap().unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let outcome = ctx
        .scheduler(OPERATOR)
        .run_once(&spec, Arc::new(CountingJob(Arc::clone(&runs))))
        .await
        .unwrap();
    assert_eq!(outcome, JobRunOutcome::Busy);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_job_is_reported_and_lock_released() {
    let ctx = build_context(CoordinationConfig::default()).unwrap();
    let spec = JobSpec::new("export", Duration::from_secs(300));
    let outcome = ctx.scheduler(OPERATOR).run_once(&spec, Arc::new(FailingJob)).await.unwrap();
    assert!(matches!(outcome, JobRunOutcome::Failed(reason) if reason.contains("sheet not found")));
    assert!(!ctx.lock().is_locked("export").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operator_can_abort_running_job() {
    let ctx = build_context(CoordinationConfig::default()).unwrap();
    let scheduler = ctx.scheduler(OPERATOR);
    let spec = JobSpec::new("broadcast", Duration::from_secs(300)).with_renewal(Duration::from_secs(60));

    let run = tokio::spawn(async move { scheduler.run_once(&spec, Arc::new(StuckJob)).await });
    while ctx.registry().live_task_count(OPERATOR) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let report = ctx.registry().cancel_all_for_user(OPERATOR).await;
    assert_eq!(report.tasks_cancelled, 1);
    assert_eq!(run.await.unwrap().unwrap(), JobRunOutcome::Aborted);
    assert!(!ctx.lock().is_locked("broadcast").await.unwrap());
}

#[tokio::test]
async fn test_shutdown_cancels_every_user() {
    let ctx = build_context(CoordinationConfig::default()).unwrap();
    let a = ctx.registry().spawn_registered(1, "a", std::future::pending::<()>());
    let b = ctx.registry().spawn_registered(2, "b", std::future::pending::<()>());

    let reports = ctx.shutdown().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.tasks_cancelled == 1 && r.is_settled()));
    assert!(a.await.unwrap_err().is_cancelled());
    assert!(b.await.unwrap_err().is_cancelled());
    assert_eq!(ctx.registry().tracked_users(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_purges_expired_records() {
    let clock = Arc::new(ManualClock::new(0));
    let locks = Arc::new(InMemoryLockStore::new());
    let mut cfg = CoordinationConfig::default();
    cfg.lock.purge_interval_secs = 60;
    let ctx = build_context_with(cfg, locks.clone(), Arc::new(InMemoryCooldownStore::new()), clock.clone()).unwrap();

    ctx.lock().acquire("stale", Duration::from_secs(1)).await.unwrap().unwrap();
    clock.advance(Duration::from_secs(5));

    let maintenance = ctx.scheduler(OPERATOR).spawn_maintenance();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(locks.is_empty());
    maintenance.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cooldown_is_written_before_lock_is_released() {
    let clock = Arc::new(ManualClock::new(0));
    let locks = Arc::new(InMemoryLockStore::new());
    let shared = Arc::new(SlowWrites {
        inner: InMemoryCooldownStore::new(),
        delay: Duration::from_millis(200),
    });
    let replica = || {
        build_context_with(CoordinationConfig::default(), locks.clone(), shared.clone(), clock.clone())
            .unwrap()
            .scheduler(OPERATOR)
    };
    let (first, second) = (replica(), replica());

    let runs = Arc::new(AtomicUsize::new(0));
    let job: Arc<dyn ScheduledJob> = Arc::new(CountingJob(Arc::clone(&runs)));
    let spec = JobSpec::new("daily-digest-job", Duration::from_secs(300))
        .with_min_interval(Duration::from_secs(24 * 3_600));

    let first_run = {
        let (spec, job) = (spec.clone(), Arc::clone(&job));
        tokio::spawn(async move { first.run_once(&spec, job).await })
    };
    while runs.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The first replica's cooldown write has not landed yet.
    let overlapping = second.run_once(&spec, Arc::clone(&job)).await.unwrap();
    assert_eq!(overlapping, JobRunOutcome::Busy);
    assert_eq!(first_run.await.unwrap().unwrap(), JobRunOutcome::Completed);

    let later = second.run_once(&spec, job).await.unwrap();
    assert!(matches!(later, JobRunOutcome::NotDue { .. }));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cooldown_is_rechecked_after_acquiring() {
    let clock = Arc::new(ManualClock::new(0));
    let locks = Arc::new(InMemoryLockStore::new());
    let cooldowns = Arc::new(InMemoryCooldownStore::new());
    let spec = JobSpec::new("daily-digest-job", Duration::from_secs(300))
        .with_min_interval(Duration::from_secs(24 * 3_600));
    let runs = Arc::new(AtomicUsize::new(0));
    let job: Arc<dyn ScheduledJob> = Arc::new(CountingJob(Arc::clone(&runs)));

    let first = build_context_with(CoordinationConfig::default(), locks.clone(), cooldowns.clone(), clock.clone())
        .unwrap()
        .scheduler(OPERATOR);
    assert_eq!(first.run_once(&spec, Arc::clone(&job)).await.unwrap(), JobRunOutcome::Completed);

    let stale = Arc::new(StaleFirstRead {
        inner: cooldowns,
        stale: AtomicBool::new(true),
    });
    let second = build_context_with(CoordinationConfig::default(), locks.clone(), stale, clock.clone())
        .unwrap()
        .scheduler(OPERATOR);
    let outcome = second.run_once(&spec, job).await.unwrap();
    assert!(matches!(outcome, JobRunOutcome::NotDue { .. }));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(locks.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_zero_period_keeps_schedule_alive() {
    let ctx = build_context(CoordinationConfig::default()).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let spec = JobSpec::new("pending-queue-sweep", Duration::from_secs(60));

    let periodic = ctx
        .scheduler(OPERATOR)
        .spawn_periodic(spec, Arc::new(CountingJob(Arc::clone(&runs))), Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!periodic.is_finished());
    assert!(runs.load(Ordering::SeqCst) >= 2);
    periodic.abort();
}
