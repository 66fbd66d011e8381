//! Per-attempt lifecycle hooks.
//!
//! Observability collaborators are composed as an explicit ordered list of
//! implementations of a fixed two-method contract. The worker pool fans out
//! to every hook, in registration order, around each delivery attempt.
//! There is no interface probing and no dynamic composition at dispatch
//! time.

use crate::core::registry::TaskContext;
use std::sync::Arc;

/// Outcome of one delivery attempt, as reported to hooks and the broker.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The handler returned successfully; the task was acknowledged
    Completed,
    /// The attempt failed
    Failed {
        /// Rendered error message
        error: String,
        /// Whether the broker will consider redelivery
        retryable: bool,
    },
}

impl TaskOutcome {
    /// True for a successful attempt.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Contract implemented by each observability capability.
///
/// Implementations must be cheap and non-blocking; they run inline on the
/// worker's execution slot.
pub trait TaskHook: Send + Sync {
    /// Called just before the handler is invoked.
    fn on_start(&self, ctx: &TaskContext);

    /// Called after the attempt's outcome is known, before it is reported
    /// to the broker.
    fn on_end(&self, ctx: &TaskContext, outcome: &TaskOutcome);
}

/// Ordered set of hooks shared by every worker.
pub type HookChain = Arc<Vec<Arc<dyn TaskHook>>>;

/// Built-in hook emitting structured `tracing` events for every attempt.
#[derive(Debug, Default)]
pub struct LogHook;

impl TaskHook for LogHook {
    fn on_start(&self, ctx: &TaskContext) {
        tracing::debug!(
            task_id = %ctx.task_id,
            task_type = %ctx.task_type,
            queue = %ctx.queue,
            attempt = ctx.attempt,
            "task attempt started"
        );
    }

    fn on_end(&self, ctx: &TaskContext, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => {
                tracing::info!(
                    task_id = %ctx.task_id,
                    task_type = %ctx.task_type,
                    attempt = ctx.attempt,
                    "task completed"
                );
            }
            TaskOutcome::Failed { error, retryable } => {
                tracing::warn!(
                    task_id = %ctx.task_id,
                    task_type = %ctx.task_type,
                    attempt = ctx.attempt,
                    retryable,
                    error,
                    "task attempt failed"
                );
            }
        }
    }
}
