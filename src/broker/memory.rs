//! In-memory broker implementation.
//!
//! Stores all tasks in process memory. Suitable for development, tests and
//! single-process deployments where durability across restarts is not
//! required. Retry scheduling, backoff and dead-task bookkeeping follow the
//! same contract a durable store would provide.

use super::{Broker, BrokerStats};
use crate::config::RetryPolicy;
use crate::error::{MillError, MillResult};
use crate::task::{QueueClass, TaskEnvelope, TaskId, TaskState};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// A task plus its broker-side bookkeeping.
#[derive(Debug, Clone)]
struct TaskRecord {
    envelope: TaskEnvelope,
    state: TaskState,
    /// Delivery attempts so far
    attempt: u32,
    /// Earliest instant the task may be delivered again
    next_attempt_at: Option<Instant>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct BrokerState {
    tasks: HashMap<TaskId, TaskRecord>,
    /// Per-class FIFO of pending task ids
    queues: HashMap<QueueClass, VecDeque<TaskId>>,
    completed: u64,
    dead: u64,
    closed: bool,
}

/// In-memory [`Broker`] backend.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    /// Wakes blocked dequeuers when new work arrives
    work_available: Notify,
    retry: RetryPolicy,
    /// When set, `connect()` fails; used to exercise startup failure paths
    reachable: bool,
}

impl InMemoryBroker {
    /// Create a broker with the default retry policy.
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    /// Create a broker with a custom retry policy.
    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            work_available: Notify::new(),
            retry,
            reachable: true,
        }
    }

    /// Create a broker whose `connect()` always fails.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// Current state of a task, if it is known to the broker.
    pub async fn task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        let state = self.state.lock().await;
        state.tasks.get(task_id).map(|r| r.state)
    }

    /// Delivery attempts recorded for a task.
    pub async fn attempts(&self, task_id: &TaskId) -> Option<u32> {
        let state = self.state.lock().await;
        state.tasks.get(task_id).map(|r| r.attempt)
    }

    /// Last reported error for a task.
    pub async fn last_error(&self, task_id: &TaskId) -> Option<String> {
        let state = self.state.lock().await;
        state.tasks.get(task_id).and_then(|r| r.last_error.clone())
    }

    /// Pop the first deliverable task following the given class order.
    ///
    /// A task waiting out a retry backoff is skipped but keeps its queue
    /// position.
    fn take_ready(state: &mut BrokerState, classes: &[QueueClass]) -> Option<TaskEnvelope> {
        let now = Instant::now();

        for class in classes {
            let Some(queue) = state.queues.get_mut(class) else {
                continue;
            };

            let ready_index = queue.iter().position(|task_id| {
                state
                    .tasks
                    .get(task_id)
                    .is_some_and(|r| r.next_attempt_at.is_none_or(|at| now >= at))
            });

            if let Some(index) = ready_index {
                let task_id = queue.remove(index)?;
                let record = state.tasks.get_mut(&task_id)?;
                record.state = TaskState::Running;
                record.attempt += 1;
                record.next_attempt_at = None;

                let mut envelope = record.envelope.clone();
                envelope.attempt = record.attempt;
                return Some(envelope);
            }
        }

        None
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, envelope: TaskEnvelope) -> MillResult<TaskId> {
        let task_id = envelope.id.clone();
        let queue = envelope.queue;

        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(MillError::broker_unavailable("broker is closed"));
            }

            state.tasks.insert(
                task_id.clone(),
                TaskRecord {
                    envelope,
                    state: TaskState::Pending,
                    attempt: 0,
                    next_attempt_at: None,
                    last_error: None,
                },
            );
            state
                .queues
                .entry(queue)
                .or_default()
                .push_back(task_id.clone());
        }

        self.work_available.notify_waiters();
        tracing::debug!(task_id = %task_id, queue = %queue, "enqueued task");
        Ok(task_id)
    }

    async fn dequeue(
        &self,
        classes: &[QueueClass],
        timeout: Duration,
    ) -> MillResult<Option<TaskEnvelope>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wakeups before checking, so an enqueue racing
            // with the check cannot be missed.
            let notified = self.work_available.notified();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(MillError::broker_unavailable("broker is closed"));
                }
                if let Some(envelope) = Self::take_ready(&mut state, classes) {
                    tracing::debug!(
                        task_id = %envelope.id,
                        queue = %envelope.queue,
                        attempt = envelope.attempt,
                        "dequeued task"
                    );
                    return Ok(Some(envelope));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, task_id: &TaskId) -> MillResult<()> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| MillError::queue_msg(format!("unknown task id '{task_id}'")))?;

        record.state = TaskState::Completed;
        state.completed += 1;

        tracing::debug!(task_id = %task_id, "acknowledged task");
        Ok(())
    }

    async fn fail(&self, task_id: &TaskId, error: &str, retryable: bool) -> MillResult<()> {
        let retry_scheduled = {
            let mut state = self.state.lock().await;
            let record = state
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| MillError::queue_msg(format!("unknown task id '{task_id}'")))?;

            record.last_error = Some(error.to_string());
            let attempt = record.attempt;

            if retryable && self.retry.attempts_remaining(attempt) {
                let delay = self.retry.delay_for_attempt(attempt);
                record.state = TaskState::Retry;
                record.next_attempt_at = Some(Instant::now() + delay);
                let queue = record.envelope.queue;

                tracing::warn!(
                    task_id = %task_id,
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error,
                    "task failed, scheduling retry"
                );

                state.queues.entry(queue).or_default().push_back(task_id.clone());
                true
            } else {
                record.state = TaskState::Dead;
                state.dead += 1;

                tracing::error!(
                    task_id = %task_id,
                    attempt,
                    retryable,
                    error,
                    "task permanently failed"
                );
                false
            }
        };

        if retry_scheduled {
            self.work_available.notify_waiters();
        }
        Ok(())
    }

    async fn connect(&self) -> MillResult<()> {
        if !self.reachable {
            return Err(MillError::broker_unavailable("connection refused"));
        }
        let state = self.state.lock().await;
        if state.closed {
            return Err(MillError::broker_unavailable("broker is closed"));
        }
        Ok(())
    }

    async fn close(&self) -> MillResult<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.work_available.notify_waiters();
        tracing::debug!("broker closed");
        Ok(())
    }

    async fn stats(&self) -> MillResult<BrokerStats> {
        let state = self.state.lock().await;

        let mut stats = BrokerStats {
            completed: state.completed,
            dead: state.dead,
            ..Default::default()
        };
        for record in state.tasks.values() {
            match record.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Retry => {
                    stats.pending += 1;
                    stats.retry += 1;
                }
                TaskState::Completed | TaskState::Dead => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskEnvelope;

    fn envelope(task_type: &str, queue: QueueClass) -> TaskEnvelope {
        TaskEnvelope::new(task_type, b"{}".to_vec(), queue)
    }

    const ORDER: [QueueClass; 3] = QueueClass::ALL;

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo() {
        let broker = InMemoryBroker::new();

        let first = broker
            .enqueue(envelope("a", QueueClass::Default))
            .await
            .unwrap();
        let second = broker
            .enqueue(envelope("b", QueueClass::Default))
            .await
            .unwrap();

        let got = broker
            .dequeue(&ORDER, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, first);
        assert_eq!(got.attempt, 1);

        let got = broker
            .dequeue(&ORDER, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, second);
    }

    #[tokio::test]
    async fn test_dequeue_class_order() {
        let broker = InMemoryBroker::new();
        broker
            .enqueue(envelope("lo", QueueClass::Low))
            .await
            .unwrap();
        broker
            .enqueue(envelope("crit", QueueClass::Critical))
            .await
            .unwrap();

        // Low listed first wins even though critical has higher weight; the
        // broker follows the order it is handed.
        let got = broker
            .dequeue(
                &[QueueClass::Low, QueueClass::Critical, QueueClass::Default],
                Duration::from_millis(10),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.queue, QueueClass::Low);
    }

    #[tokio::test]
    async fn test_dequeue_empty_times_out() {
        let broker = InMemoryBroker::new();
        let got = broker
            .dequeue(&ORDER, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let broker = std::sync::Arc::new(InMemoryBroker::new());

        let waiter = {
            let broker = std::sync::Arc::clone(&broker);
            tokio::spawn(async move { broker.dequeue(&ORDER, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker
            .enqueue(envelope("a", QueueClass::Critical))
            .await
            .unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_ack_completes_task() {
        let broker = InMemoryBroker::new();
        let id = broker
            .enqueue(envelope("a", QueueClass::Default))
            .await
            .unwrap();
        broker
            .dequeue(&ORDER, Duration::from_millis(10))
            .await
            .unwrap();
        broker.ack(&id).await.unwrap();

        assert_eq!(broker.task_state(&id).await, Some(TaskState::Completed));
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_backoff_then_redelivery() {
        let broker = InMemoryBroker::with_retry_policy(RetryPolicy::fixed(3, 30));
        let id = broker
            .enqueue(envelope("a", QueueClass::Default))
            .await
            .unwrap();

        broker
            .dequeue(&ORDER, Duration::from_millis(10))
            .await
            .unwrap();
        broker.fail(&id, "smtp timeout", true).await.unwrap();
        assert_eq!(broker.task_state(&id).await, Some(TaskState::Retry));

        // Invisible until the backoff elapses
        let got = broker
            .dequeue(&ORDER, Duration::from_millis(5))
            .await
            .unwrap();
        assert!(got.is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let got = broker
            .dequeue(&ORDER, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.attempt, 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_moves_to_dead() {
        let broker = InMemoryBroker::with_retry_policy(RetryPolicy::fixed(2, 1));
        let id = broker
            .enqueue(envelope("a", QueueClass::Default))
            .await
            .unwrap();

        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            broker
                .dequeue(&ORDER, Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            broker.fail(&id, "still failing", true).await.unwrap();
        }

        assert_eq!(broker.task_state(&id).await, Some(TaskState::Dead));
        assert_eq!(broker.attempts(&id).await, Some(2));
        assert_eq!(broker.last_error(&id).await.as_deref(), Some("still failing"));
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_immediate_dead() {
        let broker = InMemoryBroker::new();
        let id = broker
            .enqueue(envelope("a", QueueClass::Default))
            .await
            .unwrap();

        broker
            .dequeue(&ORDER, Duration::from_millis(10))
            .await
            .unwrap();
        broker.fail(&id, "unknown task type", false).await.unwrap();

        assert_eq!(broker.task_state(&id).await, Some(TaskState::Dead));
        assert_eq!(broker.attempts(&id).await, Some(1));
    }

    #[tokio::test]
    async fn test_closed_broker_rejects_operations() {
        let broker = InMemoryBroker::new();
        broker.close().await.unwrap();

        let result = broker.enqueue(envelope("a", QueueClass::Default)).await;
        assert!(matches!(result, Err(MillError::BrokerUnavailable { .. })));

        let result = broker.dequeue(&ORDER, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(MillError::BrokerUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_connect() {
        let broker = InMemoryBroker::unreachable();
        assert!(matches!(
            broker.connect().await,
            Err(MillError::BrokerUnavailable { .. })
        ));
    }
}
