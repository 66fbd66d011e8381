//! Broker interface to the durable, multi-consumer queue store.
//!
//! The broker mediates between producers and the worker pool. Retry and
//! backoff bookkeeping lives behind this interface: the worker pool only
//! reports success or failure per delivery attempt. The crate ships an
//! in-memory broker for development, testing and single-process
//! applications; a durable store is an external collaborator implementing
//! the same trait.

use crate::error::MillResult;
use crate::task::{QueueClass, TaskEnvelope, TaskId};
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub use memory::InMemoryBroker;

/// Counters describing the broker's current state.
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    /// Tasks waiting to be dequeued (retry-scheduled tasks included)
    pub pending: u64,
    /// Tasks currently occupying an execution slot
    pub running: u64,
    /// Tasks acknowledged after a successful attempt
    pub completed: u64,
    /// Tasks waiting out a retry backoff
    pub retry: u64,
    /// Tasks permanently failed
    pub dead: u64,
}

/// Trait implemented by queue store clients.
///
/// Implementations must be safe for concurrent use: the same broker handle
/// is shared read/write across every worker and the producer.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Accept a task for later delivery under its queue class.
    async fn enqueue(&self, envelope: TaskEnvelope) -> MillResult<TaskId>;

    /// Dequeue the next available task, trying each class in the given
    /// order.
    ///
    /// Blocks up to `timeout` waiting for work; returns `Ok(None)` if
    /// nothing became available. The returned envelope carries the delivery
    /// attempt number assigned by the broker.
    async fn dequeue(
        &self,
        classes: &[QueueClass],
        timeout: Duration,
    ) -> MillResult<Option<TaskEnvelope>>;

    /// Acknowledge a successful attempt; the task is removed for good.
    async fn ack(&self, task_id: &TaskId) -> MillResult<()>;

    /// Report a failed attempt.
    ///
    /// A retryable failure is redelivered per the broker's retry policy
    /// until attempts are exhausted; a non-retryable failure moves the task
    /// to the dead state immediately.
    async fn fail(&self, task_id: &TaskId, error: &str, retryable: bool) -> MillResult<()>;

    /// Verify connectivity to the store. Called once at service start; a
    /// failure is fatal to startup.
    async fn connect(&self) -> MillResult<()>;

    /// Release the connection during shutdown.
    async fn close(&self) -> MillResult<()>;

    /// Current queue counters.
    async fn stats(&self) -> MillResult<BrokerStats>;
}
