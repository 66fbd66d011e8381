//! The task service: producer API and lifecycle management.
//!
//! [`MillService`] ties the pieces together: it owns the broker client, the
//! frozen handler registry, the hook chain and the worker pool, and walks
//! the `Created → Started → Draining → Stopped` state machine on behalf of
//! the host process.

use crate::broker::{Broker, BrokerStats};
use crate::config::MillConfig;
use crate::error::{MillError, MillResult};
use crate::hooks::{HookChain, TaskHook};
use crate::task::{QueueClass, TaskEnvelope, TaskId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod registry;
pub mod worker;

pub use registry::{HandlerRegistry, RegistryBuilder, TaskContext, TaskHandler};
pub use worker::{PoolStats, WorkerPool, poll_order};

/// Lifecycle state of the task service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Constructed, not yet processing
    Created,
    /// Worker pool running
    Started,
    /// Drain in progress: no new dequeues, in-flight handlers finishing
    Draining,
    /// Fully stopped; submission is refused
    Stopped,
}

/// Asynchronous background task service.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use taskmill::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> MillResult<()> {
///     let mut handlers = RegistryBuilder::new();
///     handlers.register_fn("noop", |_ctx, _payload| async { Ok(()) })?;
///
///     let broker = Arc::new(InMemoryBroker::new());
///     let service = MillService::new(MillConfig::default(), broker, handlers.build())?;
///
///     service.start().await?;
///     service.submit("noop", &serde_json::json!({}), QueueClass::Default).await?;
///     service.stop().await?;
///     Ok(())
/// }
/// ```
pub struct MillService {
    config: MillConfig,
    broker: Arc<dyn Broker>,
    registry: HandlerRegistry,
    hooks: HookChain,
    pool: RwLock<Option<WorkerPool>>,
    state: RwLock<ServiceState>,
}

impl MillService {
    /// Create a service over a broker client and a frozen handler registry.
    ///
    /// The registry cannot change after this point; every handler the
    /// deployment needs must already be registered.
    pub fn new(
        config: MillConfig,
        broker: Arc<dyn Broker>,
        registry: HandlerRegistry,
    ) -> MillResult<Self> {
        if let Err(errors) = config.validate() {
            return Err(MillError::startup(format!(
                "invalid configuration: {}",
                errors.join("; ")
            )));
        }

        Ok(Self {
            config,
            broker,
            registry,
            hooks: Arc::new(Vec::new()),
            pool: RwLock::new(None),
            state: RwLock::new(ServiceState::Created),
        })
    }

    /// Install an ordered list of lifecycle hooks. Must be called before
    /// [`MillService::start`].
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn TaskHook>>) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Validate the registry, connect the broker and launch the worker
    /// pool.
    ///
    /// A broker connectivity failure is fatal: the host process must not
    /// serve traffic without a functioning task subsystem.
    pub async fn start(&self) -> MillResult<()> {
        {
            let state = self.state.read().await;
            match *state {
                ServiceState::Created => {}
                ServiceState::Started => return Err(MillError::AlreadyRunning),
                ServiceState::Draining | ServiceState::Stopped => {
                    return Err(MillError::ServiceStopped);
                }
            }
        }

        if self.registry.is_empty() {
            return Err(MillError::startup(
                "no task handlers registered; refusing to start",
            ));
        }

        self.broker.connect().await?;

        let pool = WorkerPool::new(
            self.config.workers.clone(),
            Arc::clone(&self.broker),
            self.registry.clone(),
            Arc::clone(&self.hooks),
        );
        pool.start().await;

        {
            let mut pool_guard = self.pool.write().await;
            *pool_guard = Some(pool);
        }
        {
            let mut state = self.state.write().await;
            *state = ServiceState::Started;
        }

        tracing::info!(
            num_workers = self.config.workers.num_workers,
            handlers = self.registry.len(),
            "task service started"
        );
        Ok(())
    }

    /// Drain and stop the service.
    ///
    /// Workers stop pulling new tasks immediately; every in-flight handler
    /// runs to completion before this returns, then the broker client is
    /// closed. Idempotent: calling `stop()` again is a no-op.
    pub async fn stop(&self) -> MillResult<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ServiceState::Draining | ServiceState::Stopped => return Ok(()),
                ServiceState::Created | ServiceState::Started => {
                    *state = ServiceState::Draining;
                }
            }
        }

        tracing::info!("stopping task service");

        let pool = {
            let mut pool_guard = self.pool.write().await;
            pool_guard.take()
        };
        if let Some(pool) = pool {
            pool.drain().await;
        }

        if let Err(e) = self.broker.close().await {
            tracing::warn!(error = %e, "broker close failed during shutdown");
        }

        {
            let mut state = self.state.write().await;
            *state = ServiceState::Stopped;
        }

        tracing::info!("task service stopped");
        Ok(())
    }

    /// Block until the process receives a shutdown signal, then drain.
    pub async fn run_until_shutdown(&self) -> MillResult<()> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| MillError::queue("failed to listen for shutdown signal", e))?;

        tracing::info!("shutdown signal received");
        self.stop().await
    }

    /// Submit a task for asynchronous processing.
    ///
    /// The payload is serialized here and only interpreted again by the
    /// registered handler. Success means the broker accepted the task, not
    /// that it was processed; there is no producer-side retry, so a
    /// [`MillError::BrokerUnavailable`] surfaces directly to the caller.
    pub async fn submit<P: Serialize>(
        &self,
        task_type: impl Into<String>,
        payload: &P,
        queue: QueueClass,
    ) -> MillResult<TaskId> {
        let payload = serde_json::to_vec(payload)?;
        self.submit_bytes(task_type, payload, queue).await
    }

    /// Submit a task whose payload is already serialized.
    pub async fn submit_bytes(
        &self,
        task_type: impl Into<String>,
        payload: Vec<u8>,
        queue: QueueClass,
    ) -> MillResult<TaskId> {
        {
            let state = self.state.read().await;
            if matches!(*state, ServiceState::Draining | ServiceState::Stopped) {
                return Err(MillError::ServiceStopped);
            }
        }

        let envelope = TaskEnvelope::new(task_type, payload, queue);
        let task_type = envelope.task_type.clone();
        let task_id = self.broker.enqueue(envelope).await?;

        tracing::debug!(
            task_id = %task_id,
            task_type = %task_type,
            queue = %queue,
            "task submitted"
        );
        Ok(task_id)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    /// Broker queue counters.
    pub async fn broker_stats(&self) -> MillResult<BrokerStats> {
        self.broker.stats().await
    }

    /// Worker pool counters, if the pool has been started.
    pub async fn pool_stats(&self) -> Option<PoolStats> {
        let pool = self.pool.read().await;
        pool.as_ref().map(|p| p.stats())
    }

    /// Configuration this service was built with.
    pub fn config(&self) -> &MillConfig {
        &self.config
    }
}
