//! Scoped operations tied to the registry.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::core::{CancelRegistry, CoordinationError, FlowEvent, FlowHandle, FlowState};
use crate::runtime::checkpoint;
use crate::util::UserId;

type Cleanup = Box<dyn FnOnce() + Send + Sync>;

/// A named user operation registered as a flow for as long as it is alive.
///
/// Cleanup callbacks run exactly once on every exit path: [`finish`], an
/// early return through `?`, a panic, or the surrounding task being aborted.
/// While cleanup runs on a cancelled operation the flow is in
/// [`FlowState::Cancelling`].
///
/// ```rust,ignore
/// let mut op = CancellableOperation::begin(&registry, user_id, "broadcast");
/// op.add_cleanup(|| drop_partial_upload());
/// for item in items {
///     op.checkpoint().await?;
///     send(item).await;
/// }
/// op.finish(());
/// ```
///
/// [`finish`]: CancellableOperation::finish
pub struct CancellableOperation {
    registry: CancelRegistry,
    user_id: UserId,
    flow: FlowHandle,
    cleanups: Vec<Cleanup>,
    closed: bool,
}

impl CancellableOperation {
    /// Register `name` for `user_id` and start the operation.
    #[must_use = "dropping the operation ends it immediately"]
    pub fn begin(registry: &CancelRegistry, user_id: UserId, name: impl Into<String>) -> Self {
        let flow = registry.register_flow(user_id, name);
        tracing::debug!(user_id, operation = flow.name(), "started cancellable operation");
        Self {
            registry: registry.clone(),
            user_id,
            flow,
            cleanups: Vec::new(),
            closed: false,
        }
    }

    /// Owning user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Underlying flow handle.
    #[must_use]
    pub const fn flow(&self) -> &FlowHandle {
        &self.flow
    }

    /// Queue a callback to run when the operation ends.
    pub fn add_cleanup(&mut self, cleanup: impl FnOnce() + Send + Sync + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }

    /// Whether a cancel reached this operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flow.is_cancelling() || self.registry.is_cancel_requested(self.user_id)
    }

    /// Cooperative checkpoint for this operation's user.
    ///
    /// # Errors
    ///
    /// [`CoordinationError::Cancelled`] once a cancel was requested.
    pub async fn checkpoint(&self) -> Result<(), CoordinationError> {
        if self.flow.is_cancelling() {
            return Err(CoordinationError::Cancelled(self.user_id));
        }
        checkpoint(&self.registry, self.user_id).await
    }

    /// End the operation with `output`. Returns `None`, discarding the
    /// output, if a cancel arrived first.
    pub fn finish<T>(mut self, output: T) -> Option<T> {
        let delivered = self.flow.apply(FlowEvent::Finished);
        self.close();
        if delivered {
            Some(output)
        } else {
            tracing::info!(user_id = self.user_id, operation = self.flow.name(), "discarding output of cancelled operation");
            None
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let cleanups = std::mem::take(&mut self.cleanups);
        let name = self.flow.name().to_string();
        match self.flow.state() {
            FlowState::Running if self.registry.is_cancel_requested(self.user_id) => {
                self.flow.request_cancel();
                self.flow.run_cancellation(|| run_cleanups(&name, cleanups));
            }
            FlowState::Running => {
                // Early exit without a cancel (error or panic) still ends the flow.
                self.flow.apply(FlowEvent::Finished);
                run_cleanups(&name, cleanups);
            }
            FlowState::CancelRequested => {
                self.flow.run_cancellation(|| run_cleanups(&name, cleanups));
            }
            FlowState::Cancelling | FlowState::Cancelled | FlowState::Completed => {
                run_cleanups(&name, cleanups);
            }
        }

        if self.flow.state() == FlowState::Cancelled {
            tracing::info!(user_id = self.user_id, operation = %name, "operation cancelled");
        }
        self.registry.unregister_flow(self.user_id, self.flow.id());
    }
}

impl Drop for CancellableOperation {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_cleanups(operation: &str, cleanups: Vec<Cleanup>) {
    for cleanup in cleanups {
        if catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
            tracing::warn!(operation, "cleanup callback panicked");
        }
    }
}
