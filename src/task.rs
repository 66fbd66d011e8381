//! Task envelope and queue class definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Unique identifier for a task
pub type TaskId = String;

/// Named priority lane a task is submitted to.
///
/// The set of classes is fixed: `critical` (weight 6), `default` (weight 3)
/// and `low` (weight 1). Weights determine the expected share of worker
/// capacity dequeued from each class, not strict priority; a `low` task is
/// never starved indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueClass {
    /// Highest priority lane (weight 6)
    Critical,
    /// Standard lane for most tasks (weight 3)
    Default,
    /// Non-urgent lane (weight 1)
    Low,
}

impl QueueClass {
    /// All classes in descending weight order.
    pub const ALL: [QueueClass; 3] = [QueueClass::Critical, QueueClass::Default, QueueClass::Low];

    /// Sum of all class weights; one weighted round-robin cycle is this many
    /// scheduling turns.
    pub const WEIGHT_CYCLE_LEN: u32 = 10;

    /// Relative scheduling weight of this class.
    pub const fn weight(&self) -> u32 {
        match self {
            QueueClass::Critical => 6,
            QueueClass::Default => 3,
            QueueClass::Low => 1,
        }
    }

    /// Queue name as stored in the broker.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Critical => "critical",
            QueueClass::Default => "default",
            QueueClass::Low => "low",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(QueueClass::Critical),
            "default" => Ok(QueueClass::Default),
            "low" => Ok(QueueClass::Low),
            other => Err(format!("unknown queue class '{other}'")),
        }
    }
}

/// Broker-side lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting to be dequeued
    Pending,
    /// Occupying an execution slot
    Running,
    /// Acknowledged after a successful attempt
    Completed,
    /// Failed attempt, scheduled for redelivery after backoff
    Retry,
    /// Permanently failed (non-retryable error or attempts exhausted)
    Dead,
}

/// Immutable unit of work submitted for asynchronous processing.
///
/// The payload is an opaque byte sequence; it is only interpreted by the
/// handler registered for `task_type`. A decode failure is the handler's
/// error, never the broker's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Unique task identifier
    pub id: TaskId,
    /// Type identifier selecting the handler
    pub task_type: String,
    /// Handler-specific serialized payload
    pub payload: Vec<u8>,
    /// Priority lane the task was submitted to
    pub queue: QueueClass,
    /// Delivery attempt number, starting at 1; set by the broker on dequeue
    pub attempt: u32,
    /// When the task was accepted
    pub enqueued_at: SystemTime,
}

impl TaskEnvelope {
    /// Build a new envelope for submission. The broker assigns the attempt
    /// number on each delivery.
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>, queue: QueueClass) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            queue,
            attempt: 0,
            enqueued_at: SystemTime::now(),
        }
    }
}
