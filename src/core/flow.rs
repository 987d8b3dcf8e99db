//! Per-flow cancellation state machine.
//!
//! ```text
//! RUNNING --cancel--> CANCEL_REQUESTED --cleanup--> CANCELLING --done--> CANCELLED
//!    |
//!    +--finish--> COMPLETED
//! ```
//!
//! Cancelling a completed flow is a no-op. Output produced once a cancel was
//! requested is discarded rather than delivered.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a user flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Flow is executing normally.
    Running,
    /// A cancel was requested; the flow has not yet reacted.
    CancelRequested,
    /// Cleanup is running.
    Cancelling,
    /// Terminal: flow was cancelled.
    Cancelled,
    /// Terminal: flow finished before any cancel request.
    Completed,
}

/// Input to the flow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// A cancel was requested for the owning user.
    CancelRequested,
    /// The flow observed the request and began cleanup.
    CleanupStarted,
    /// Cleanup is done.
    CleanupFinished,
    /// The flow body returned.
    Finished,
}

impl FlowState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Apply `event`; `None` for a transition the machine does not allow.
    #[must_use]
    pub const fn next(self, event: FlowEvent) -> Option<Self> {
        use FlowEvent as E;
        match (self, event) {
            (Self::Running, E::CancelRequested) => Some(Self::CancelRequested),
            (Self::Running, E::Finished) => Some(Self::Completed),
            (Self::CancelRequested, E::CancelRequested) => Some(Self::CancelRequested),
            (Self::CancelRequested, E::CleanupStarted) => Some(Self::Cancelling),
            (Self::Cancelling, E::CancelRequested) => Some(Self::Cancelling),
            (Self::Cancelling, E::CleanupFinished) => Some(Self::Cancelled),
            // Late cancel requests against terminal states are absorbed.
            (Self::Completed, E::CancelRequested) => Some(Self::Completed),
            (Self::Cancelled, E::CancelRequested) => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::CancelRequested => "cancel_requested",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Identifier of a registered flow.
pub type FlowId = uuid::Uuid;

/// Shared handle to one flow's state.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    id: FlowId,
    name: Arc<str>,
    state: Arc<Mutex<FlowState>>,
}

impl FlowHandle {
    /// New flow in the `Running` state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name: Arc::from(name.into()),
            state: Arc::new(Mutex::new(FlowState::Running)),
        }
    }

    /// Flow identifier.
    #[must_use]
    pub const fn id(&self) -> FlowId {
        self.id
    }

    /// Flow name, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    /// Whether a cancel reached this flow.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        matches!(
            self.state(),
            FlowState::CancelRequested | FlowState::Cancelling | FlowState::Cancelled
        )
    }

    /// Apply an event. Invalid transitions leave the state unchanged and
    /// return `false`.
    pub fn apply(&self, event: FlowEvent) -> bool {
        let mut state = self.state.lock();
        let current = *state;
        match current.next(event) {
            Some(next) => {
                if next != current {
                    tracing::debug!(flow = %self.name, from = %current, to = %next, "flow transition");
                }
                *state = next;
                true
            }
            None => {
                tracing::debug!(flow = %self.name, state = %current, ?event, "ignored flow event");
                false
            }
        }
    }

    /// Mark a cancel request. Returns `true` if the flow was running and has
    /// now moved to `CancelRequested`.
    pub fn request_cancel(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FlowState::Running {
            *state = FlowState::CancelRequested;
            tracing::debug!(flow = %self.name, "flow cancel requested");
            true
        } else {
            false
        }
    }

    /// Drive a cancelled flow through cleanup to `Cancelled`, running
    /// `cleanup` in between. No-op unless a cancel was requested.
    pub fn run_cancellation(&self, cleanup: impl FnOnce()) -> bool {
        if !self.apply(FlowEvent::CleanupStarted) {
            return false;
        }
        cleanup();
        self.apply(FlowEvent::CleanupFinished)
    }

    /// Deliver the flow's output. Returns it only when the flow completes
    /// normally; once a cancel was requested the output is discarded and the
    /// flow moves to `Cancelled`.
    pub fn finish<T>(&self, output: T) -> Option<T> {
        if self.apply(FlowEvent::Finished) {
            return Some(output);
        }
        if self.state() == FlowState::CancelRequested {
            self.run_cancellation(|| {});
        }
        tracing::info!(flow = %self.name, "discarding output of cancelled flow");
        None
    }
}
