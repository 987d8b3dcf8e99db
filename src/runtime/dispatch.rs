//! Asynchronous step dispatch for multi-step user flows.
//!
//! Every step handler, including trivial terminal ones, implements the same
//! async [`StepHandler`] trait. The dispatcher checks for cancellation
//! between steps and discards the final output of a flow that was cancelled
//! while its last step ran.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AppResult, CancelRegistry};
use crate::runtime::CancellableOperation;
use crate::util::UserId;

/// What a step asks the dispatcher to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<O> {
    /// Continue with the named step.
    Next(String),
    /// End the flow with this output.
    End(O),
}

impl<O> Step<O> {
    /// Continue with `name`.
    pub fn next(name: impl Into<String>) -> Self {
        Self::Next(name.into())
    }
}

/// One state of a flow.
#[async_trait]
pub trait StepHandler<S, O>: Send + Sync
where
    S: Send,
{
    /// Run the step against the flow's state.
    async fn handle(&self, state: &mut S) -> AppResult<Step<O>>;
}

/// Terminal step that ends the flow with a fixed output.
#[derive(Debug, Clone)]
pub struct EndWith<O>(pub O);

#[async_trait]
impl<S, O> StepHandler<S, O> for EndWith<O>
where
    S: Send,
    O: Clone + Send + Sync,
{
    async fn handle(&self, _state: &mut S) -> AppResult<Step<O>> {
        Ok(Step::End(self.0.clone()))
    }
}

/// How a dispatched flow ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome<O> {
    /// The flow reached an end step before any cancel.
    Completed(O),
    /// The flow was cancelled; any output was discarded.
    Cancelled,
}

/// Table of named steps for one flow.
pub struct FlowDispatcher<S, O> {
    name: String,
    entry: String,
    steps: HashMap<String, Arc<dyn StepHandler<S, O>>>,
}

impl<S, O> FlowDispatcher<S, O>
where
    S: Send,
{
    /// New dispatcher starting at step `entry`.
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            steps: HashMap::new(),
        }
    }

    /// Add a step.
    #[must_use]
    pub fn with_step(mut self, name: impl Into<String>, handler: impl StepHandler<S, O> + 'static) -> Self {
        self.steps.insert(name.into(), Arc::new(handler));
        self
    }

    /// Drive the flow for `user_id` from the entry step.
    ///
    /// # Errors
    ///
    /// Errors returned by a step, or an unknown step name. Cancellation is
    /// not an error; it yields [`FlowOutcome::Cancelled`].
    pub async fn run(&self, registry: &CancelRegistry, user_id: UserId, mut state: S) -> AppResult<FlowOutcome<O>> {
        let op = CancellableOperation::begin(registry, user_id, self.name.clone());
        let mut current = self.entry.clone();

        loop {
            if let Err(e) = op.checkpoint().await {
                tracing::info!(user_id, flow = %self.name, step = %current, error = %e, "flow stopped at checkpoint");
                return Ok(FlowOutcome::Cancelled);
            }

            let handler = self
                .steps
                .get(&current)
                .ok_or_else(|| anyhow::anyhow!("flow `{}` has no step `{current}`", self.name))?;
            tracing::debug!(user_id, flow = %self.name, step = %current, "running step");

            match handler.handle(&mut state).await? {
                Step::Next(next) => current = next,
                Step::End(output) => {
                    return Ok(op.finish(output).map_or(FlowOutcome::Cancelled, FlowOutcome::Completed));
                }
            }
        }
    }
}
