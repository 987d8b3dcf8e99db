//! # Prometheus Coordination
//!
//! Cooperative cancellation and distributed coordination for services that
//! run many per-user operations concurrently across a replicated fleet.
//!
//! ## Components
//!
//! - **`CancelRegistry`**: in-process bookkeeping of every cancellable task,
//!   job and flow per user, with bounded-wait cancellation.
//! - **`DistributedLock`**: TTL lock over a shared store, for singleton jobs
//!   that must run on exactly one replica.
//! - **`CooldownManager`**: per-key next-allowed times whose windows only ever
//!   grow, for pacing and rate-limit backoff.
//! - **Integration layer** (`runtime`): scope guards, checkpoints, singleton
//!   and throttle wrappers, a flow dispatcher, a scheduler and the cancel
//!   command.
//!
//! Cancellation is process-local. Locks and cooldowns live in a shared store
//! and every mutation on them is a single atomic operation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prometheus_coordination::builders::build_context;
//! use prometheus_coordination::config::CoordinationConfig;
//! use prometheus_coordination::runtime::{checkpoint, run_singleton};
//! use std::time::Duration;
//!
//! let ctx = build_context(CoordinationConfig::from_env()?)?;
//!
//! // A user's long-running work
//! let registry = ctx.registry().clone();
//! ctx.registry().spawn_registered(user_id, "broadcast", async move {
//!     for item in items {
//!         checkpoint(&registry, user_id).await?;
//!         send(item).await;
//!     }
//!     Ok::<_, CoordinationError>(())
//! });
//!
//! // A singleton scheduled job
//! run_singleton(ctx.lock(), "daily-digest-job", Duration::from_secs(300), || async {
//!     send_digest().await
//! })
//! .await?;
//!
//! // On "/cancel"
//! let report = ctx.registry().cancel_all_for_user(user_id).await;
//! ```
//!
//! Enable the `postgres` feature for the shared database backend.

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Cancellation registry, distributed lock, cooldowns and flow states.
pub mod core;
/// Configuration models for backends, cancellation, locks and cooldowns.
pub mod config;
/// Builders to construct a coordination context from configuration.
pub mod builders;
/// Storage adapters for locks and cooldowns.
pub mod infra;
/// Integration helpers that tie user flows and jobs to the primitives.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::core::{
    CancelRegistry, CancelReport, CooldownManager, CoordinationError, DistributedLock, FlowState,
};
pub use crate::runtime::CoordinationContext;
