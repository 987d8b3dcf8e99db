//! Core coordination primitives: cancellation, locks, cooldowns.

pub mod cancel_registry;
pub mod cooldown;
pub mod distributed_lock;
pub mod error;
pub mod flow;
pub mod store;

pub use cancel_registry::{
    CancelRegistry, CancelReport, CancelSummary, CancelToken, JobCallback, TaskHandle, TaskId,
    TaskRegistration, UserStats,
};
pub use cooldown::CooldownManager;
pub use distributed_lock::{DistributedLock, DEFAULT_MISMATCH_ALERT_THRESHOLD};
pub use error::{AppResult, CoordinationError};
pub use flow::{FlowEvent, FlowHandle, FlowId, FlowState};
pub use store::{CooldownRecord, CooldownStore, LockRecord, LockStore};
