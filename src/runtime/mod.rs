//! Integration layer: scoped registration, checkpoints, singleton jobs,
//! throttled calls, flow dispatch and the cancel command.

pub mod checkpoint;
pub mod command;
pub mod context;
pub mod dispatch;
pub mod scheduler;
pub mod scope;
pub mod singleton;
pub mod throttle;

pub use checkpoint::{checkpoint, ensure_not_cancelled, guarded_call, with_cancellation_check};
pub use command::{handle_cancel_command, CancelCommandOutcome};
pub use context::CoordinationContext;
pub use dispatch::{EndWith, FlowDispatcher, FlowOutcome, Step, StepHandler};
pub use scheduler::{JobRunOutcome, JobSpec, ScheduledJob, Scheduler};
pub use scope::CancellableOperation;
pub use singleton::{run_singleton, run_singleton_renewing, SingletonOutcome};
pub use throttle::{CallOutcome, Throttle, ThrottleOutcome};
