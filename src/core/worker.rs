//! Worker pool and weighted round-robin scheduling.
//!
//! The pool owns a fixed number of execution slots. Each slot is an
//! independent tokio task running a scheduling loop: pick a queue class by
//! weighted round-robin, poll the broker with a bounded timeout, run the
//! registered handler, report the outcome. A slot never preempts an
//! in-flight handler; shutdown drains by signalling the loops and joining
//! every slot.

use crate::broker::Broker;
use crate::config::WorkerConfig;
use crate::core::registry::{HandlerRegistry, TaskContext};
use crate::error::{MillError, MillResult};
use crate::hooks::{HookChain, TaskOutcome};
use crate::task::{QueueClass, TaskEnvelope};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Snapshot of pool activity counters.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Attempts that ended in an acknowledgement
    pub tasks_completed: u64,
    /// Attempts reported to the broker as failed
    pub tasks_failed: u64,
    /// Execution slots currently occupied by a handler
    pub in_flight: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            tasks_completed: self.completed.load(Ordering::Relaxed),
            tasks_failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Poll order for one scheduling turn.
///
/// Out of every [`QueueClass::WEIGHT_CYCLE_LEN`] turns, 6 are scheduled
/// against `critical`, 3 against `default` and 1 against `low`. The
/// scheduled class is polled first; if it is empty the broker falls through
/// to the remaining classes in descending weight order, so a slot is never
/// idled while any class holds work and the `low` lane still gets its turn
/// of every cycle.
pub fn poll_order(turn: u64) -> [QueueClass; 3] {
    let position = (turn % QueueClass::WEIGHT_CYCLE_LEN as u64) as u32;
    let critical = QueueClass::Critical.weight();
    let default = critical + QueueClass::Default.weight();

    if position < critical {
        [QueueClass::Critical, QueueClass::Default, QueueClass::Low]
    } else if position < default {
        [QueueClass::Default, QueueClass::Critical, QueueClass::Low]
    } else {
        [QueueClass::Low, QueueClass::Critical, QueueClass::Default]
    }
}

/// One execution slot.
struct Worker {
    id: usize,
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    registry: HandlerRegistry,
    hooks: HookChain,
    counters: Arc<Counters>,
}

impl Worker {
    /// Run the scheduling loop until the drain signal flips.
    async fn run(self, mut drain_rx: watch::Receiver<bool>) {
        tracing::debug!(worker_id = self.id, "worker started");

        // Stagger turn counters so slots do not march in lockstep
        let mut turn = self.id as u64;

        loop {
            if *drain_rx.borrow() {
                break;
            }

            let order = poll_order(turn);
            turn = turn.wrapping_add(1);

            match self
                .broker
                .dequeue(&order, self.config.dequeue_timeout())
                .await
            {
                Ok(Some(envelope)) => {
                    self.execute(envelope).await;
                }
                Ok(None) => {
                    // Nothing available anywhere; back off, but wake
                    // immediately on drain
                    tokio::select! {
                        _ = drain_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.idle_backoff()) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, "dequeue failed");
                    tokio::select! {
                        _ = drain_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.idle_backoff()) => {}
                    }
                }
            }
        }

        tracing::debug!(worker_id = self.id, "worker drained");
    }

    /// Run one delivery attempt to completion and report the outcome.
    ///
    /// A handler error or panic never escapes the slot; it is converted
    /// into a reported failure and the loop continues.
    async fn execute(&self, envelope: TaskEnvelope) {
        let ctx = TaskContext::from_envelope(&envelope);
        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);

        for hook in self.hooks.iter() {
            hook.on_start(&ctx);
        }

        let result = self.dispatch_isolated(envelope).await;

        let outcome = match &result {
            Ok(()) => TaskOutcome::Completed,
            Err(e) => TaskOutcome::Failed {
                error: e.to_string(),
                retryable: e.is_retryable(),
            },
        };
        for hook in self.hooks.iter() {
            hook.on_end(&ctx, &outcome);
        }

        let report = match result {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.broker.ack(&ctx.task_id).await
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.broker
                    .fail(&ctx.task_id, &e.to_string(), e.is_retryable())
                    .await
            }
        };
        if let Err(e) = report {
            tracing::error!(
                worker_id = self.id,
                task_id = %ctx.task_id,
                error = %e,
                "failed to report task outcome to broker"
            );
        }

        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Dispatch inside a spawned task so a panicking handler only poisons
    /// its own attempt.
    async fn dispatch_isolated(&self, envelope: TaskEnvelope) -> MillResult<()> {
        let registry = self.registry.clone();
        let handle: JoinHandle<MillResult<()>> =
            tokio::spawn(async move { registry.dispatch(&envelope).await });

        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(MillError::handler_msg(format!(
                "handler panicked: {join_err}"
            ))),
        }
    }
}

/// Bounded set of concurrent execution slots bound to one broker.
pub struct WorkerPool {
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    registry: HandlerRegistry,
    hooks: HookChain,
    counters: Arc<Counters>,
    drain_tx: watch::Sender<bool>,
    drain_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool. No workers run until [`WorkerPool::start`].
    pub fn new(
        config: WorkerConfig,
        broker: Arc<dyn Broker>,
        registry: HandlerRegistry,
        hooks: HookChain,
    ) -> Self {
        let (drain_tx, drain_rx) = watch::channel(false);
        Self {
            config,
            broker,
            registry,
            hooks,
            counters: Arc::new(Counters::default()),
            drain_tx,
            drain_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn every execution slot.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.config.num_workers {
            let worker = Worker {
                id: worker_id,
                config: self.config.clone(),
                broker: Arc::clone(&self.broker),
                registry: self.registry.clone(),
                hooks: Arc::clone(&self.hooks),
                counters: Arc::clone(&self.counters),
            };
            handles.push(tokio::spawn(worker.run(self.drain_rx.clone())));
        }

        tracing::info!(num_workers = self.config.num_workers, "worker pool started");
    }

    /// Signal every slot to stop pulling new tasks and wait until each one
    /// has finished its in-flight handler.
    ///
    /// There is no forced cancellation: a caller wanting a bounded drain
    /// must impose an external deadline and accept that handlers may still
    /// be running past it.
    pub async fn drain(&self) {
        let _ = self.drain_tx.send(true);

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        if handles.is_empty() {
            return;
        }

        tracing::info!(slots = handles.len(), "draining worker pool");
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "worker task join failed");
            }
        }
        tracing::info!("worker pool drained");
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::config::RetryPolicy;
    use crate::core::registry::RegistryBuilder;
    use crate::task::TaskState;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    fn envelope(task_type: &str, queue: QueueClass) -> TaskEnvelope {
        TaskEnvelope::new(task_type, b"{}".to_vec(), queue)
    }

    fn test_pool(broker: Arc<InMemoryBroker>, registry: HandlerRegistry) -> WorkerPool {
        let config = WorkerConfig {
            num_workers: 2,
            dequeue_timeout_ms: 50,
            idle_backoff_ms: 10,
        };
        WorkerPool::new(config, broker, registry, Arc::new(Vec::new()))
    }

    #[test]
    fn test_poll_order_cycle_proportions() {
        let mut selected: HashMap<QueueClass, u32> = HashMap::new();
        for turn in 0..QueueClass::WEIGHT_CYCLE_LEN as u64 {
            *selected.entry(poll_order(turn)[0]).or_default() += 1;
        }

        assert_eq!(selected[&QueueClass::Critical], 6);
        assert_eq!(selected[&QueueClass::Default], 3);
        assert_eq!(selected[&QueueClass::Low], 1);
    }

    #[test]
    fn test_poll_order_fallthrough_is_weight_ordered() {
        assert_eq!(
            poll_order(0),
            [QueueClass::Critical, QueueClass::Default, QueueClass::Low]
        );
        assert_eq!(
            poll_order(6),
            [QueueClass::Default, QueueClass::Critical, QueueClass::Low]
        );
        assert_eq!(
            poll_order(9),
            [QueueClass::Low, QueueClass::Critical, QueueClass::Default]
        );
    }

    #[tokio::test]
    async fn test_saturated_dequeues_converge_to_weights() {
        let broker = InMemoryBroker::new();
        let cycles = 1000u64;

        // Saturate every class so each turn dequeues from its scheduled
        // class without fallthrough
        for class in QueueClass::ALL {
            for _ in 0..cycles {
                broker.enqueue(envelope("t", class)).await.unwrap();
            }
        }

        let mut dequeued: HashMap<QueueClass, u64> = HashMap::new();
        for turn in 0..cycles {
            let got = broker
                .dequeue(&poll_order(turn), Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            *dequeued.entry(got.queue).or_default() += 1;
        }

        let critical = dequeued[&QueueClass::Critical] as f64 / cycles as f64;
        let default = dequeued[&QueueClass::Default] as f64 / cycles as f64;
        let low = dequeued[&QueueClass::Low] as f64 / cycles as f64;

        assert!((critical - 0.6).abs() < 0.05, "critical share {critical}");
        assert!((default - 0.3).abs() < 0.05, "default share {default}");
        assert!((low - 0.1).abs() < 0.05, "low share {low}");
    }

    #[tokio::test]
    async fn test_low_class_not_starved() {
        let broker = InMemoryBroker::new();

        // Saturate critical and default; a single low task must still be
        // dequeued within one weighted cycle
        for _ in 0..100 {
            broker
                .enqueue(envelope("t", QueueClass::Critical))
                .await
                .unwrap();
            broker
                .enqueue(envelope("t", QueueClass::Default))
                .await
                .unwrap();
        }
        let low_id = broker
            .enqueue(envelope("t", QueueClass::Low))
            .await
            .unwrap();

        let mut found_at = None;
        for turn in 0..QueueClass::WEIGHT_CYCLE_LEN as u64 {
            let got = broker
                .dequeue(&poll_order(turn), Duration::from_millis(10))
                .await
                .unwrap()
                .unwrap();
            if got.id == low_id {
                found_at = Some(turn);
                break;
            }
        }

        assert!(found_at.is_some(), "low task starved for a full cycle");
    }

    #[tokio::test]
    async fn test_lone_low_task_dequeued_by_fallthrough() {
        let broker = InMemoryBroker::new();
        broker
            .enqueue(envelope("t", QueueClass::Low))
            .await
            .unwrap();

        // Turn 0 schedules critical, which is empty; fallthrough reaches low
        let got = broker
            .dequeue(&poll_order(0), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(got.is_some());
        assert_eq!(got.unwrap().queue, QueueClass::Low);
    }

    #[tokio::test]
    async fn test_pool_processes_and_acks() {
        let broker = Arc::new(InMemoryBroker::new());
        let seen = Arc::new(AtomicU64::new(0));

        let mut builder = RegistryBuilder::new();
        let seen_clone = Arc::clone(&seen);
        builder
            .register_fn("count", move |_ctx, _payload| {
                let seen = Arc::clone(&seen_clone);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let pool = test_pool(Arc::clone(&broker), builder.build());
        pool.start().await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(
                broker
                    .enqueue(envelope("count", QueueClass::Default))
                    .await
                    .unwrap(),
            );
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.drain().await;

        assert_eq!(seen.load(Ordering::SeqCst), 5);
        for id in &ids {
            assert_eq!(broker.task_state(id).await, Some(TaskState::Completed));
        }
        assert_eq!(pool.stats().tasks_completed, 5);
        assert_eq!(pool.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_dead_without_retry() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut builder = RegistryBuilder::new();
        builder
            .register_fn("known", |_ctx, _payload| async { Ok(()) })
            .unwrap();

        let pool = test_pool(Arc::clone(&broker), builder.build());
        pool.start().await;

        let id = broker
            .enqueue(envelope("unknown", QueueClass::Default))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        pool.drain().await;

        assert_eq!(broker.task_state(&id).await, Some(TaskState::Dead));
        assert_eq!(broker.attempts(&id).await, Some(1));
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_pool() {
        let broker = Arc::new(InMemoryBroker::with_retry_policy(RetryPolicy::fixed(1, 1)));
        let mut builder = RegistryBuilder::new();
        builder
            .register_fn("boom", |_ctx, _payload| async {
                panic!("handler exploded");
            })
            .unwrap();
        builder
            .register_fn("fine", |_ctx, _payload| async { Ok(()) })
            .unwrap();

        let pool = test_pool(Arc::clone(&broker), builder.build());
        pool.start().await;

        let boom_id = broker
            .enqueue(envelope("boom", QueueClass::Default))
            .await
            .unwrap();
        let fine_id = broker
            .enqueue(envelope("fine", QueueClass::Default))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        pool.drain().await;

        assert_eq!(broker.task_state(&boom_id).await, Some(TaskState::Dead));
        assert_eq!(broker.task_state(&fine_id).await, Some(TaskState::Completed));
        let err = broker.last_error(&boom_id).await.unwrap();
        assert!(err.contains("panicked"));
    }

    #[tokio::test]
    async fn test_drain_completes_in_flight_and_stops_dequeuing() {
        let broker = Arc::new(InMemoryBroker::new());
        let completed = Arc::new(AtomicU64::new(0));

        let mut builder = RegistryBuilder::new();
        let completed_clone = Arc::clone(&completed);
        builder
            .register_fn("slow", move |_ctx, _payload| {
                let completed = Arc::clone(&completed_clone);
                async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let pool = test_pool(Arc::clone(&broker), builder.build());
        pool.start().await;

        // Two workers, two slow tasks in flight plus extras left queued
        for _ in 0..6 {
            broker
                .enqueue(envelope("slow", QueueClass::Default))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().in_flight, 2);

        pool.drain().await;

        // Both in-flight handlers ran to completion before drain returned
        let done = completed.load(Ordering::SeqCst);
        assert_eq!(done, 2);
        assert_eq!(pool.stats().in_flight, 0);

        // Queued tasks were not pulled after the drain signal
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.pending, 4);
    }
}
