//! The user-facing cancel command.
//!
//! `/cancel` stops the issuer's own operations; `/cancel <user_id>` lets an
//! admin stop someone else's. The request is acknowledged as soon as the
//! registry reports; cleanup that outlives the grace period is surfaced as a
//! warning for operators, never as a failure to the user.

use serde::{Deserialize, Serialize};

use crate::core::CancelReport;
use crate::runtime::CoordinationContext;
use crate::util::UserId;

/// Outcome of a cancel command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelCommandOutcome {
    /// Issuer tried to cancel another user without being an admin.
    Forbidden,
    /// Argument was not a user id.
    InvalidTarget {
        /// The argument as given.
        raw: String,
    },
    /// Target had no active operations.
    NothingToCancel {
        /// User that was checked.
        target: UserId,
    },
    /// Cancellation ran.
    Cancelled {
        /// User that was cancelled.
        target: UserId,
        /// Whether an admin cancelled someone else.
        by_admin: bool,
        /// Registry report.
        report: CancelReport,
    },
}

impl CancelCommandOutcome {
    /// Whether operators should be told about leftover work.
    #[must_use]
    pub const fn needs_operator_attention(&self) -> bool {
        matches!(self, Self::Cancelled { report, .. } if !report.is_settled())
    }
}

/// Handle `/cancel [user_id]` issued by `issuer`.
///
/// When everything settled inside the grace period the target's bookkeeping
/// is cleared so new work can start; otherwise the cancellation flag stays
/// set and leftover tasks are reported.
pub async fn handle_cancel_command(ctx: &CoordinationContext, issuer: UserId, args: &[&str]) -> CancelCommandOutcome {
    let target = match args.first() {
        None => issuer,
        Some(_) if !ctx.config().is_admin(issuer) => {
            tracing::warn!(issuer, "non-admin tried to cancel another user's operations");
            return CancelCommandOutcome::Forbidden;
        }
        Some(raw) => match raw.trim().parse::<UserId>() {
            Ok(id) => id,
            Err(_) => {
                return CancelCommandOutcome::InvalidTarget {
                    raw: (*raw).to_string(),
                }
            }
        },
    };
    let by_admin = target != issuer;
    if by_admin {
        tracing::info!(issuer, target, "admin cancelling another user's operations");
    }

    let registry = ctx.registry();
    let stats = registry.user_stats(target);
    if !stats.has_active_work() {
        if stats.cancel_requested {
            // Leftovers from an earlier unsettled cancel have since finished.
            tracing::info!(issuer, target, "clearing stale cancellation flag");
            registry.clear_user(target);
        } else {
            tracing::debug!(issuer, target, "nothing to cancel");
        }
        return CancelCommandOutcome::NothingToCancel { target };
    }

    let report = registry.cancel_all_for_user(target).await;
    if report.is_settled() {
        registry.clear_user(target);
    } else {
        tracing::warn!(
            issuer,
            target,
            tasks_remaining = report.tasks_remaining,
            flows_remaining = report.flows_remaining,
            "cancellation left work running"
        );
    }

    CancelCommandOutcome::Cancelled {
        target,
        by_admin,
        report,
    }
}
