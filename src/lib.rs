//! # taskmill
//!
//! An asynchronous background task subsystem: submit typed tasks from
//! request-handling code and process them on a priority-weighted worker
//! pool, decoupled from the caller by a broker.
//!
//! ## Features
//!
//! - **Typed task envelopes**: opaque serialized payloads routed by task
//!   type and queue class
//! - **Priority-weighted workers**: three queue classes polled in a 6:3:1
//!   weighted round-robin, so low-priority work is never starved
//! - **Broker-owned retries**: failed attempts are redelivered with
//!   exponential backoff until a configurable attempt budget is exhausted
//! - **Injected handler registry**: every handler is registered up front
//!   and frozen before the service starts
//! - **Graceful drain**: shutdown stops dequeuing immediately and waits
//!   for every in-flight handler to finish
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskmill::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> MillResult<()> {
//!     let mut handlers = RegistryBuilder::new();
//!     handlers.register_fn("ping", |ctx: TaskContext, _payload| async move {
//!         tracing::info!(task_id = %ctx.task_id, "pong");
//!         Ok(())
//!     })?;
//!
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let service = MillService::new(MillConfig::default(), broker, handlers.build())?;
//!
//!     service.start().await?;
//!     service.submit("ping", &serde_json::json!({}), QueueClass::Default).await?;
//!     service.run_until_shutdown().await
//! }
//! ```

pub mod broker;
pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod task;

pub use crate::broker::{Broker, BrokerStats, InMemoryBroker};
pub use crate::config::{LogLevel, LoggingConfig, MillConfig, RetryPolicy, WorkerConfig};
pub use crate::core::registry::{HandlerRegistry, RegistryBuilder, TaskContext, TaskHandler};
pub use crate::core::worker::PoolStats;
pub use crate::core::{MillService, ServiceState};
pub use crate::error::{MillError, MillResult};
pub use crate::hooks::{HookChain, LogHook, TaskHook, TaskOutcome};
pub use crate::task::{QueueClass, TaskEnvelope, TaskId, TaskState};

/// Re-export for handler implementations.
pub use async_trait::async_trait;

/// Commonly used imports.
///
/// ```rust
/// use taskmill::prelude::*;
/// ```
pub mod prelude {
    pub use crate::broker::{Broker, BrokerStats, InMemoryBroker};
    pub use crate::config::{MillConfig, RetryPolicy, WorkerConfig};
    pub use crate::core::registry::{HandlerRegistry, RegistryBuilder, TaskContext, TaskHandler};
    pub use crate::core::{MillService, ServiceState};
    pub use crate::error::{MillError, MillResult};
    pub use crate::hooks::{LogHook, TaskHook, TaskOutcome};
    pub use crate::task::{QueueClass, TaskEnvelope, TaskId, TaskState};
    pub use async_trait::async_trait;
}
