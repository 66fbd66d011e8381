//! Handler registry and dispatch.
//!
//! The registry maps task-type identifiers to processing functions. It is
//! populated once during service initialization through
//! [`RegistryBuilder`], frozen by [`RegistryBuilder::build`], and injected
//! into the worker pool at start. There is no global registry and no
//! runtime mutation: deployment code registers every handler up front, and
//! a dequeued task whose type is absent is a permanent failure.
//!
//! # Examples
//!
//! ```rust
//! use taskmill::core::registry::{RegistryBuilder, TaskContext};
//! use taskmill::error::MillResult;
//!
//! # fn main() -> MillResult<()> {
//! let mut builder = RegistryBuilder::new();
//! builder.register_fn("welcome_email", |ctx: TaskContext, payload: Vec<u8>| async move {
//!     tracing::info!(task_id = %ctx.task_id, "processing welcome email");
//!     let _ = payload;
//!     Ok(())
//! })?;
//! let registry = builder.build();
//! assert!(registry.contains("welcome_email"));
//! # Ok(())
//! # }
//! ```

use crate::error::{MillError, MillResult};
use crate::task::{QueueClass, TaskEnvelope, TaskId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Read-only metadata handed to a handler for one delivery attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Task identifier
    pub task_id: TaskId,
    /// Task type being dispatched
    pub task_type: String,
    /// Queue class the task was submitted to
    pub queue: QueueClass,
    /// Delivery attempt number (1-based)
    pub attempt: u32,
}

impl TaskContext {
    pub(crate) fn from_envelope(envelope: &TaskEnvelope) -> Self {
        Self {
            task_id: envelope.id.clone(),
            task_type: envelope.task_type.clone(),
            queue: envelope.queue,
            attempt: envelope.attempt,
        }
    }
}

/// A processing function for one task type.
///
/// Payload deserialization is the handler's responsibility; a decode
/// failure should be reported as [`MillError::PayloadDecode`] so it is not
/// retried. Transient downstream failures should be reported as
/// [`MillError::Handler`] so the broker's retry policy applies.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process one delivery attempt.
    async fn handle(&self, ctx: TaskContext, payload: &[u8]) -> MillResult<()>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = MillResult<()>> + Send>>;

/// Adapter turning a plain async closure into a [`TaskHandler`].
struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, Vec<u8>) -> HandlerFuture + Send + Sync,
{
    async fn handle(&self, ctx: TaskContext, payload: &[u8]) -> MillResult<()> {
        (self.func)(ctx, payload.to_vec()).await
    }
}

/// Mutable registry under construction. Valid only during service
/// initialization, before `start()`.
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type.
    ///
    /// At most one handler per type; a duplicate registration is a
    /// configuration error.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> MillResult<()> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(MillError::startup(format!(
                "handler for task type '{task_type}' registered twice"
            )));
        }

        tracing::debug!(task_type = %task_type, "registered task handler");
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Register an async closure as the handler for a task type.
    pub fn register_fn<F, Fut>(&mut self, task_type: impl Into<String>, func: F) -> MillResult<()>
    where
        F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MillResult<()>> + Send + 'static,
    {
        let wrapped = move |ctx: TaskContext, payload: Vec<u8>| -> HandlerFuture {
            Box::pin(func(ctx, payload))
        };
        self.register(task_type, Arc::new(FnHandler { func: wrapped }))
    }

    /// Freeze the registry. No further registration is possible.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Immutable task-type to handler mapping shared by every worker.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Look up the handler for a dequeued envelope and invoke it exactly
    /// once.
    pub async fn dispatch(&self, envelope: &TaskEnvelope) -> MillResult<()> {
        let handler = self
            .handlers
            .get(&envelope.task_type)
            .ok_or_else(|| MillError::UnknownTaskType {
                task_type: envelope.task_type.clone(),
            })?
            .clone();

        let ctx = TaskContext::from_envelope(envelope);
        handler.handle(ctx, &envelope.payload).await
    }

    /// Whether a handler is registered for the task type.
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// True when no handler is registered at all.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// All registered task types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
