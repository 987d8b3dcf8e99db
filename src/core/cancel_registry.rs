//! Process-local registry of cancellable operations per user.
//!
//! The registry tracks three kinds of registrations for each user:
//!
//! - **Tasks**: tokio tasks, stopped through their [`AbortHandle`].
//! - **Jobs**: anything else, stopped by invoking a cancel callback once.
//! - **Flows**: multi-step interactions driven by the [`FlowHandle`] state
//!   machine, which observe cancellation cooperatively.
//!
//! Every mutation goes through one `parking_lot::Mutex`. The mutex is never
//! held while aborting tasks, invoking callbacks, or awaiting, so a slow or
//! panicking callback cannot stall other users.
//!
//! Cancellation is process-local. A user's interaction is pinned to the
//! process serving it, so there is nothing to cancel elsewhere.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::CancelConfig;
use crate::core::{CoordinationError, FlowHandle, FlowId};
use crate::util::{Clock, JobToken, SystemClock, UserId};

/// Identifier of a registered tokio task.
pub type TaskId = tokio::task::Id;

/// Cancel callback for job-style registrations.
///
/// Jobs rely solely on this callback; they are not expected to poll
/// [`CancelRegistry::is_cancel_requested`].
pub type JobCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Handle to a running task, as handed to [`CancelRegistry::register_task`].
#[derive(Debug)]
pub struct TaskHandle {
    operation: String,
    abort: AbortHandle,
    forcible: bool,
}

impl TaskHandle {
    /// Handle for a task that can be aborted at its next `.await`.
    #[must_use]
    pub fn new(operation: impl Into<String>, abort: AbortHandle) -> Self {
        Self {
            operation: operation.into(),
            abort,
            forcible: true,
        }
    }

    /// Handle built from a join handle.
    #[must_use]
    pub fn from_join<T>(operation: impl Into<String>, handle: &JoinHandle<T>) -> Self {
        Self::new(operation, handle.abort_handle())
    }

    /// Handle for work that cannot be interrupted (e.g. `spawn_blocking`).
    /// Such tasks are never aborted; they show up in `tasks_remaining` until
    /// they return.
    #[must_use]
    pub fn uninterruptible(operation: impl Into<String>, abort: AbortHandle) -> Self {
        Self {
            operation: operation.into(),
            abort,
            forcible: false,
        }
    }

    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.abort.id()
    }
}

enum CancelTarget {
    Task { abort: AbortHandle, forcible: bool },
    Job(JobCallback),
}

/// One registered cancellable operation. Lives exactly as long as its
/// registration.
pub struct CancelToken {
    user_id: UserId,
    operation: String,
    registered_at_ms: u64,
    target: CancelTarget,
    fired: AtomicBool,
}

impl CancelToken {
    /// Owning user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Registration time in milliseconds since epoch.
    #[must_use]
    pub const fn registered_at_ms(&self) -> u64 {
        self.registered_at_ms
    }

    fn is_finished(&self) -> bool {
        match &self.target {
            CancelTarget::Task { abort, .. } => abort.is_finished(),
            CancelTarget::Job(_) => false,
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("user_id", &self.user_id)
            .field("operation", &self.operation)
            .field("registered_at_ms", &self.registered_at_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct UserEntry {
    tasks: HashMap<TaskId, Arc<CancelToken>>,
    jobs: HashMap<JobToken, Arc<CancelToken>>,
    flows: HashMap<FlowId, FlowHandle>,
    requested_at_ms: Option<u64>,
}

impl UserEntry {
    fn is_idle(&self) -> bool {
        self.tasks.is_empty()
            && self.jobs.is_empty()
            && self.flows.is_empty()
            && self.requested_at_ms.is_none()
    }
}

/// Immediate outcome of [`CancelRegistry::request_cancel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSummary {
    /// Tasks that were signalled to abort.
    pub tasks_cancelled: usize,
    /// Job callbacks invoked successfully.
    pub jobs_cancelled: usize,
    /// Running tasks that cannot be forcibly stopped.
    pub tasks_remaining: usize,
    /// Flows moved to `CancelRequested`.
    pub flows_cancelled: usize,
}

/// Result of [`CancelRegistry::cancel_all_for_user`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    /// User that was cancelled.
    pub user_id: UserId,
    /// Tasks that were signalled to abort.
    pub tasks_cancelled: usize,
    /// Job callbacks invoked successfully.
    pub jobs_cancelled: usize,
    /// Job callbacks that failed or panicked.
    pub jobs_failed: usize,
    /// Flows moved to `CancelRequested`.
    pub flows_cancelled: usize,
    /// Tasks still running when the grace period ended.
    pub tasks_remaining: usize,
    /// Flows not yet in a terminal state when the grace period ended.
    pub flows_remaining: usize,
    /// Time spent waiting for tasks to settle.
    pub waited_ms: u64,
}

impl CancelReport {
    /// Whether every targeted operation stopped inside the grace period.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.tasks_remaining == 0 && self.flows_remaining == 0
    }

    /// Whether nothing was registered for the user.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tasks_cancelled == 0
            && self.jobs_cancelled == 0
            && self.jobs_failed == 0
            && self.flows_cancelled == 0
            && self.is_settled()
    }

    /// The timeout condition, if any operation outlived the grace period.
    #[must_use]
    pub fn timeout_error(&self) -> Option<CoordinationError> {
        if self.is_settled() {
            None
        } else {
            Some(CoordinationError::CancellationTimeout {
                user_id: self.user_id,
                remaining: self.tasks_remaining + self.flows_remaining,
            })
        }
    }
}

/// Snapshot of a user's registrations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// Registered tasks.
    pub total_tasks: usize,
    /// Registered tasks that have not finished.
    pub active_tasks: usize,
    /// Registered jobs.
    pub total_jobs: usize,
    /// Registered flows.
    pub total_flows: usize,
    /// Whether the cancellation flag is set.
    pub cancel_requested: bool,
    /// When the flag was set.
    pub requested_at_ms: Option<u64>,
}

impl UserStats {
    /// Whether there is anything a cancel could act on.
    #[must_use]
    pub const fn has_active_work(&self) -> bool {
        self.active_tasks > 0 || self.total_jobs > 0 || self.total_flows > 0
    }
}

struct Inner {
    entries: Mutex<HashMap<UserId, UserEntry>>,
    config: CancelConfig,
    clock: Arc<dyn Clock>,
}

/// Registry of cancellable operations, cheap to clone and share.
///
/// Construct one per process (usually inside
/// [`CoordinationContext`](crate::runtime::CoordinationContext)) and inject
/// it into every handler that starts or cancels work.
#[derive(Clone)]
pub struct CancelRegistry {
    inner: Arc<Inner>,
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new(CancelConfig::default())
    }
}

impl CancelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: CancelConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty registry with an explicit clock.
    #[must_use]
    pub fn with_clock(config: CancelConfig, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(grace_ms = config.grace_period_ms, "cancel registry initialized");
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                config,
                clock,
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CancelConfig {
        &self.inner.config
    }

    /// Associate a running task with `user_id`.
    pub fn register_task(&self, user_id: UserId, handle: TaskHandle) -> TaskId {
        let id = handle.id();
        let token = Arc::new(CancelToken {
            user_id,
            operation: handle.operation,
            registered_at_ms: self.inner.clock.now_ms(),
            target: CancelTarget::Task {
                abort: handle.abort,
                forcible: handle.forcible,
            },
            fired: AtomicBool::new(false),
        });
        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(user_id).or_default();
        if entry.requested_at_ms.is_some() {
            tracing::debug!(user_id, operation = %token.operation, "task registered while cancel pending");
        }
        tracing::debug!(user_id, operation = %token.operation, task = %id, "registered task");
        entry.tasks.insert(id, token);
        id
    }

    /// Remove a task registration. Unknown ids are ignored.
    pub fn unregister_task(&self, user_id: UserId, task_id: TaskId) {
        let mut entries = self.inner.entries.lock();
        let removed = entries
            .get_mut(&user_id)
            .and_then(|entry| entry.tasks.remove(&task_id));
        match removed {
            Some(token) => {
                tracing::debug!(user_id, operation = %token.operation, task = %task_id, "unregistered task");
                Self::prune_idle(&mut entries, user_id);
            }
            None => tracing::debug!(user_id, task = %task_id, "task already unregistered"),
        }
    }

    /// Register a job whose cancellation is an explicit callback.
    ///
    /// The callback runs at most once, the first time a cancel is requested
    /// while the job is registered.
    pub fn register_job<F>(&self, user_id: UserId, operation: impl Into<String>, cancel: F) -> JobToken
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let job_token = JobToken::generate();
        let token = Arc::new(CancelToken {
            user_id,
            operation: operation.into(),
            registered_at_ms: self.inner.clock.now_ms(),
            target: CancelTarget::Job(Arc::new(cancel)),
            fired: AtomicBool::new(false),
        });
        tracing::debug!(user_id, operation = %token.operation, job = %job_token, "registered job");
        self.inner
            .entries
            .lock()
            .entry(user_id)
            .or_default()
            .jobs
            .insert(job_token, token);
        job_token
    }

    /// Remove a job registration. Unknown tokens are logged and ignored.
    pub fn unregister_job(&self, user_id: UserId, job_token: JobToken) {
        let mut entries = self.inner.entries.lock();
        let removed = entries
            .get_mut(&user_id)
            .and_then(|entry| entry.jobs.remove(&job_token));
        if removed.is_some() {
            tracing::debug!(user_id, job = %job_token, "unregistered job");
            Self::prune_idle(&mut entries, user_id);
        } else {
            let misuse = CoordinationError::RegistryMisuse {
                user_id,
                detail: format!("unknown job token {job_token}"),
            };
            tracing::debug!(error = %misuse, "ignoring unregister");
        }
    }

    /// Register a flow and return its handle.
    pub fn register_flow(&self, user_id: UserId, name: impl Into<String>) -> FlowHandle {
        let flow = FlowHandle::new(name);
        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(user_id).or_default();
        if entry.requested_at_ms.is_some() {
            // The user already asked to stop; the new flow sees it at its
            // first checkpoint.
            flow.request_cancel();
        }
        tracing::debug!(user_id, flow = flow.name(), "registered flow");
        entry.flows.insert(flow.id(), flow.clone());
        flow
    }

    /// Remove a flow registration. Unknown ids are ignored.
    pub fn unregister_flow(&self, user_id: UserId, flow_id: FlowId) {
        let mut entries = self.inner.entries.lock();
        let removed = entries
            .get_mut(&user_id)
            .and_then(|entry| entry.flows.remove(&flow_id));
        if removed.is_some() {
            Self::prune_idle(&mut entries, user_id);
        }
    }

    /// Set the user's cancellation flag, abort every registered task and
    /// invoke every registered job callback.
    pub fn request_cancel(&self, user_id: UserId) -> CancelSummary {
        let (summary, _failed) = self.signal(user_id);
        summary
    }

    fn signal(&self, user_id: UserId) -> (CancelSummary, usize) {
        let now = self.inner.clock.now_ms();
        let (tasks, jobs, flows) = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(user_id).or_default();
            entry.requested_at_ms.get_or_insert(now);
            (
                entry.tasks.values().cloned().collect::<Vec<_>>(),
                entry.jobs.values().cloned().collect::<Vec<_>>(),
                entry.flows.values().cloned().collect::<Vec<_>>(),
            )
        };
        tracing::info!(user_id, tasks = tasks.len(), jobs = jobs.len(), "cancel requested");

        let mut summary = CancelSummary::default();
        for token in &tasks {
            if let CancelTarget::Task { abort, forcible } = &token.target {
                if abort.is_finished() {
                    continue;
                }
                if *forcible {
                    abort.abort();
                    token.fired.store(true, Ordering::Release);
                    summary.tasks_cancelled += 1;
                    tracing::debug!(user_id, operation = %token.operation, "aborted task");
                } else {
                    summary.tasks_remaining += 1;
                    tracing::warn!(user_id, operation = %token.operation, "task cannot be interrupted");
                }
            }
        }

        let mut failed = 0;
        for token in &jobs {
            let CancelTarget::Job(cancel) = &token.target else {
                continue;
            };
            if token.fired.swap(true, Ordering::AcqRel) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| cancel())) {
                Ok(Ok(())) => {
                    summary.jobs_cancelled += 1;
                    tracing::debug!(user_id, operation = %token.operation, "job cancel callback done");
                }
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::warn!(user_id, operation = %token.operation, error = %e, "job cancel callback failed");
                }
                Err(_) => {
                    failed += 1;
                    tracing::warn!(user_id, operation = %token.operation, "job cancel callback panicked");
                }
            }
        }

        summary.flows_cancelled = flows.iter().filter(|flow| flow.request_cancel()).count();
        (summary, failed)
    }

    /// Request cancellation and wait, at most the configured grace period,
    /// for the user's tasks and flows to settle.
    ///
    /// Never errors and never blocks past the grace period; anything still
    /// running is reported in the returned [`CancelReport`].
    pub async fn cancel_all_for_user(&self, user_id: UserId) -> CancelReport {
        self.cancel_all_for_user_within(user_id, self.inner.config.grace_period())
            .await
    }

    /// [`Self::cancel_all_for_user`] with an explicit grace period.
    pub async fn cancel_all_for_user_within(&self, user_id: UserId, grace: Duration) -> CancelReport {
        let (summary, jobs_failed) = self.signal(user_id);
        let (tasks, flows) = self.targets(user_id);
        let poll = self.inner.config.poll_interval();

        let started = Instant::now();
        let (tasks_remaining, flows_remaining) = loop {
            let tasks_left = tasks.iter().filter(|t| !t.is_finished()).count();
            let flows_left = flows.iter().filter(|f| !f.state().is_terminal()).count();
            if (tasks_left == 0 && flows_left == 0) || started.elapsed() >= grace {
                break (tasks_left, flows_left);
            }
            let left = grace.saturating_sub(started.elapsed());
            tokio::time::sleep(poll.min(left)).await;
        };

        let report = CancelReport {
            user_id,
            tasks_cancelled: summary.tasks_cancelled,
            jobs_cancelled: summary.jobs_cancelled,
            jobs_failed,
            flows_cancelled: summary.flows_cancelled,
            tasks_remaining,
            flows_remaining,
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if let Some(timeout) = report.timeout_error() {
            tracing::warn!(user_id, error = %timeout, ?report, "cancellation incomplete");
        } else {
            tracing::info!(user_id, ?report, "cancellation completed");
        }
        report
    }

    fn targets(&self, user_id: UserId) -> (Vec<Arc<CancelToken>>, Vec<FlowHandle>) {
        let entries = self.inner.entries.lock();
        entries.get(&user_id).map_or_else(
            || (Vec::new(), Vec::new()),
            |entry| {
                (
                    entry.tasks.values().cloned().collect(),
                    entry.flows.values().cloned().collect(),
                )
            },
        )
    }

    /// Whether the user's cancellation flag is set.
    #[must_use]
    pub fn is_cancel_requested(&self, user_id: UserId) -> bool {
        self.inner
            .entries
            .lock()
            .get(&user_id)
            .is_some_and(|entry| entry.requested_at_ms.is_some())
    }

    /// Drop all bookkeeping for the user, including the cancellation flag.
    /// Tasks still registered at this point are aborted.
    pub fn clear_user(&self, user_id: UserId) {
        let Some(entry) = self.inner.entries.lock().remove(&user_id) else {
            return;
        };
        let mut aborted = 0;
        for token in entry.tasks.values() {
            if let CancelTarget::Task { abort, forcible: true } = &token.target {
                if !abort.is_finished() {
                    abort.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            tracing::warn!(user_id, aborted, "aborted tasks left behind at clear");
        }
        tracing::info!(user_id, "cleared cancellation tracking");
    }

    /// Snapshot of the user's registrations.
    #[must_use]
    pub fn user_stats(&self, user_id: UserId) -> UserStats {
        let entries = self.inner.entries.lock();
        entries.get(&user_id).map_or_else(UserStats::default, |entry| UserStats {
            total_tasks: entry.tasks.len(),
            active_tasks: entry.tasks.values().filter(|t| !t.is_finished()).count(),
            total_jobs: entry.jobs.len(),
            total_flows: entry.flows.len(),
            cancel_requested: entry.requested_at_ms.is_some(),
            requested_at_ms: entry.requested_at_ms,
        })
    }

    /// Number of registered tasks for the user.
    #[must_use]
    pub fn live_task_count(&self, user_id: UserId) -> usize {
        self.inner
            .entries
            .lock()
            .get(&user_id)
            .map_or(0, |entry| entry.tasks.len())
    }

    /// Number of users with any bookkeeping.
    #[must_use]
    pub fn tracked_users(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Ids of users with any bookkeeping.
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        self.inner.entries.lock().keys().copied().collect()
    }

    /// Spawn `fut` on the current tokio runtime, registered under `user_id`.
    ///
    /// The registration is removed however the task ends: normal return,
    /// panic, or abort.
    pub fn spawn_registered<F>(
        &self,
        user_id: UserId,
        operation: impl Into<String>,
        fut: F,
    ) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let slot = Arc::new(OnceLock::new());
        let guard = TaskRegistration {
            registry: self.clone(),
            user_id,
            id: Arc::clone(&slot),
        };
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            // Hold the body back until the registration exists, so a fast
            // task cannot unregister before it was registered.
            let _ = ready_rx.await;
            fut.await
        });

        let _ = slot.set(handle.id());
        self.register_task(user_id, TaskHandle::from_join(operation, &handle));
        let _ = ready_tx.send(());
        handle
    }

    /// Register `handle` and return a guard that unregisters it on drop.
    #[must_use = "dropping the guard unregisters the task immediately"]
    pub fn register_scoped(&self, user_id: UserId, handle: TaskHandle) -> TaskRegistration {
        let id = self.register_task(user_id, handle);
        let slot = OnceLock::new();
        let _ = slot.set(id);
        TaskRegistration {
            registry: self.clone(),
            user_id,
            id: Arc::new(slot),
        }
    }

    fn prune_idle(entries: &mut HashMap<UserId, UserEntry>, user_id: UserId) {
        if entries.get(&user_id).is_some_and(UserEntry::is_idle) {
            entries.remove(&user_id);
        }
    }
}

/// Scope guard that unregisters a task when dropped.
pub struct TaskRegistration {
    registry: CancelRegistry,
    user_id: UserId,
    id: Arc<OnceLock<TaskId>>,
}

impl TaskRegistration {
    /// Registered task id, once known.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.id.get().copied()
    }
}

impl Drop for TaskRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.get() {
            self.registry.unregister_task(self.user_id, *id);
        }
    }
}
