//! Periodic singleton jobs.
//!
//! Every run goes through the same path: a minimum-interval cooldown (so a
//! redeploy does not re-run a daily job), the distributed lock (so only one
//! replica runs it), and a registry registration under the scheduler's
//! operator id (so an operator can abort it).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::{AppResult, CoordinationError};
use crate::runtime::{run_singleton_renewing, CoordinationContext, SingletonOutcome};
use crate::util::UserId;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Body of a scheduled job.
#[async_trait]
pub trait ScheduledJob: Send + Sync + 'static {
    /// Run once.
    async fn run(&self) -> AppResult<()>;
}

/// Scheduling parameters for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Stable job name; also the lock key.
    pub name: String,
    /// Lock TTL. Choose it longer than the job's worst-case duration or set
    /// `renew_every`.
    pub lock_ttl: Duration,
    /// Minimum time between two runs across the fleet.
    pub min_interval: Duration,
    /// Renew the lock at this period while the job runs.
    pub renew_every: Option<Duration>,
}

impl JobSpec {
    /// Job with the given lock TTL and no minimum interval.
    pub fn new(name: impl Into<String>, lock_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            lock_ttl,
            min_interval: Duration::ZERO,
            renew_every: None,
        }
    }

    /// Require at least `interval` between runs.
    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Renew the lock every `every` while running.
    #[must_use]
    pub const fn with_renewal(mut self, every: Duration) -> Self {
        self.renew_every = Some(every);
        self
    }

    fn cooldown_key(&self) -> String {
        format!("job:{}:last_run", self.name)
    }
}

/// Result of one scheduling attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRunOutcome {
    /// The minimum interval has not elapsed.
    NotDue {
        /// Time left before the job is due.
        remaining: Duration,
    },
    /// Another replica holds the job's lock.
    Busy,
    /// The job ran and returned `Ok`.
    Completed,
    /// The job ran and returned an error.
    Failed(String),
    /// An operator cancelled the run.
    Aborted,
}

/// Runs [`ScheduledJob`]s through the cooldown, the lock and the registry.
#[derive(Clone)]
pub struct Scheduler {
    ctx: CoordinationContext,
    operator_id: UserId,
}

impl Scheduler {
    /// Scheduler registering its runs under `operator_id`.
    #[must_use]
    pub const fn new(ctx: CoordinationContext, operator_id: UserId) -> Self {
        Self { ctx, operator_id }
    }

    /// Identity runs are registered under.
    #[must_use]
    pub const fn operator_id(&self) -> UserId {
        self.operator_id
    }

    /// Spec for `name` using the configured default lock TTL.
    pub fn job_spec(&self, name: impl Into<String>) -> JobSpec {
        JobSpec::new(name, self.ctx.config().lock.default_ttl())
    }

    /// Attempt one run of `job`.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::StorageUnavailable`] when the cooldown or lock
    /// store cannot be reached. Failures before the lock is taken skip the
    /// job; a failed cooldown write after it ran is still returned.
    pub async fn run_once(&self, spec: &JobSpec, job: Arc<dyn ScheduledJob>) -> Result<JobRunOutcome, CoordinationError> {
        let cooldowns = self.ctx.cooldowns();
        let key = spec.cooldown_key();
        if cooldowns.is_cooldown_active(&key).await? {
            let remaining = cooldowns.remaining(&key).await?;
            tracing::debug!(job = %spec.name, remaining_ms = remaining.as_millis(), "job not due");
            return Ok(JobRunOutcome::NotDue { remaining });
        }

        let registry = self.ctx.registry().clone();
        let operator_id = self.operator_id;
        let name = spec.name.clone();
        let (key, min_interval) = (key.as_str(), spec.min_interval);
        let outcome = run_singleton_renewing(self.ctx.lock(), &spec.name, spec.lock_ttl, spec.renew_every, || async move {
            // Another replica may have finished a run between the check above
            // and the acquire.
            if cooldowns.is_cooldown_active(key).await? {
                let remaining = cooldowns.remaining(key).await?;
                return Ok(JobRunOutcome::NotDue { remaining });
            }
            let handle = registry.spawn_registered(operator_id, name, async move { job.run().await });
            let outcome = match handle.await {
                Ok(Ok(())) => JobRunOutcome::Completed,
                Ok(Err(e)) => JobRunOutcome::Failed(format!("{e:#}")),
                Err(e) if e.is_cancelled() => JobRunOutcome::Aborted,
                Err(e) => JobRunOutcome::Failed(format!("job panicked: {e}")),
            };
            if !min_interval.is_zero() {
                cooldowns.set_cooldown(key, min_interval).await?;
            }
            Ok::<_, CoordinationError>(outcome)
        })
        .await?;

        let SingletonOutcome::Ran(outcome) = outcome else {
            return Ok(JobRunOutcome::Busy);
        };
        let outcome = outcome?;

        match &outcome {
            JobRunOutcome::Completed => tracing::info!(job = %spec.name, "scheduled job completed"),
            JobRunOutcome::Failed(reason) => tracing::warn!(job = %spec.name, %reason, "scheduled job failed"),
            JobRunOutcome::Aborted => tracing::warn!(job = %spec.name, "scheduled job aborted by operator"),
            JobRunOutcome::NotDue { .. } => tracing::debug!(job = %spec.name, "job ran elsewhere while acquiring"),
            JobRunOutcome::Busy => {}
        }
        Ok(outcome)
    }

    /// Attempt `job` every `period` until the returned handle is aborted.
    /// Storage failures skip the cycle. A zero period is raised to one
    /// millisecond.
    pub fn spawn_periodic(&self, spec: JobSpec, job: Arc<dyn ScheduledJob>, period: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = period.max(MIN_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.run_once(&spec, Arc::clone(&job)).await {
                    tracing::error!(job = %spec.name, error = %e, "skipping scheduled cycle");
                }
            }
        })
    }

    /// Purge expired lock and cooldown records every
    /// `lock.purge_interval_secs` until the returned handle is aborted.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let ctx = self.ctx.clone();
        let period = ctx.config().lock.purge_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = ctx.lock().purge_expired().await {
                    tracing::warn!(error = %e, "lock purge failed");
                }
                match ctx.cooldowns().purge_expired().await {
                    Ok(removed) if removed > 0 => tracing::debug!(removed, "purged expired cooldowns"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "cooldown purge failed"),
                }
            }
        })
    }
}
