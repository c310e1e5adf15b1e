//! Worker lifecycle
//!
//! A worker repeatedly takes one task off the queue and runs the handler on
//! it. When no task arrives within the idle timeout an elastic worker retires;
//! a reserved worker keeps waiting. Retirement is always the worker's own
//! decision: it deregisters itself and then its loop ends.
//!
//! ```text
//!            ┌──────────── task ─────────────┐
//!            ▼                               │
//!   ┌─────────────────┐   timeout (reserved) │
//!   │ waiting for work│◄──────┐              │
//!   └────────┬────────┘       │        ┌─────┴─────┐
//!            ├────────────────┘        │ executing │
//!            │ task ──────────────────►└───────────┘
//!            │
//!            │ timeout (elastic) / queue closed
//!            ▼
//!        [Retired]
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

use crate::metrics::PoolMetrics;
use crate::queue::{Dequeued, TaskQueue};
use crate::registry::{WorkerId, WorkerInfo, WorkerRegistry, WorkerTier};

/// Type-erased task handler shared by every worker of a pool
pub(crate) type TaskHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// What a handler may return
///
/// The pool never hands results back to submitters. Errors are only logged
/// and counted.
pub trait TaskOutcome {
    fn into_result(self) -> Result<(), String>;
}

impl TaskOutcome for () {
    fn into_result(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: fmt::Display> TaskOutcome for Result<(), E> {
    fn into_result(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

/// Wrap an async handler
pub(crate) fn async_handler<T, F, Fut>(handler: F) -> TaskHandler<T>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: TaskOutcome,
{
    Arc::new(move |task| {
        let fut = handler(task);
        async move { fut.await.into_result() }.boxed()
    })
}

/// Wrap a synchronous handler so it runs on tokio's blocking thread pool
pub(crate) fn blocking_handler<T, F, O>(handler: F) -> TaskHandler<T>
where
    T: Send + 'static,
    F: Fn(T) -> O + Send + Sync + 'static,
    O: TaskOutcome + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |task| {
        let handler = Arc::clone(&handler);
        async move {
            match tokio::task::spawn_blocking(move || handler(task)).await {
                Ok(outcome) => outcome.into_result(),
                // Re-raise so the worker's panic isolation counts it as a panic
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(e.to_string()),
            }
        }
        .boxed()
    })
}

/// Why a worker left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetireReason {
    /// Elastic worker saw no work for a full idle timeout
    IdleTimeout,
    /// The queue was closed and drained
    QueueClosed,
}

/// A single executor of the pool
pub(crate) struct Worker<T: Send + 'static> {
    info: Arc<WorkerInfo>,
    idle_timeout: Duration,
    queue: Arc<dyn TaskQueue<T>>,
    registry: Arc<WorkerRegistry>,
    handler: TaskHandler<T>,
    metrics: Arc<PoolMetrics>,
}

impl<T: Send + 'static> Worker<T> {
    /// Run the worker loop until it retires
    ///
    /// The worker must already be registered; it removes itself before
    /// returning.
    #[instrument(skip_all, fields(worker_id = %self.info.id, tier = %self.info.tier))]
    pub(crate) async fn run(self) -> RetireReason {
        debug!("Worker started");

        loop {
            match self.queue.dequeue(self.idle_timeout).await {
                Dequeued::Item(task) => self.execute(task).await,
                Dequeued::TimedOut => match self.info.tier {
                    WorkerTier::Reserved => {
                        trace!("Reserved worker idle, waiting again");
                    }
                    WorkerTier::Elastic => return self.retire(RetireReason::IdleTimeout),
                },
                Dequeued::Closed => return self.retire(RetireReason::QueueClosed),
            }
        }
    }

    /// Run the handler on one task, isolating errors and panics
    async fn execute(&self, task: T) {
        self.info.record_task();

        let handler = Arc::clone(&self.handler);
        let outcome = AssertUnwindSafe(async move { handler(task).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => self.metrics.task_completed(),
            Ok(Err(error)) => {
                warn!(worker_id = %self.info.id, %error, "Task failed");
                self.metrics.task_failed();
            }
            Err(panic) => {
                warn!(
                    worker_id = %self.info.id,
                    panic = %panic_message(panic.as_ref()),
                    "Task panicked"
                );
                self.metrics.task_panicked();
            }
        }
    }

    fn retire(&self, reason: RetireReason) -> RetireReason {
        self.registry.remove(&self.info.id);
        self.metrics.worker_retired();

        debug!(
            ?reason,
            tasks_processed = self.info.tasks_processed(),
            remaining_workers = self.registry.count(),
            "Worker retired"
        );
        reason
    }
}

/// Creates, registers and starts workers for one pool
pub(crate) struct WorkerSpawner<T: Send + 'static> {
    queue: Arc<dyn TaskQueue<T>>,
    registry: Arc<WorkerRegistry>,
    handler: TaskHandler<T>,
    metrics: Arc<PoolMetrics>,
    idle_timeout: Duration,
    runtime: Handle,
}

impl<T: Send + 'static> WorkerSpawner<T> {
    pub(crate) fn new(
        queue: Arc<dyn TaskQueue<T>>,
        registry: Arc<WorkerRegistry>,
        handler: TaskHandler<T>,
        metrics: Arc<PoolMetrics>,
        idle_timeout: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            queue,
            registry,
            handler,
            metrics,
            idle_timeout,
            runtime,
        }
    }

    /// Build a registered worker without starting it
    pub(crate) fn register(&self, tier: WorkerTier) -> Worker<T> {
        let id = WorkerId::generate();
        let info = Arc::new(WorkerInfo::new(id.clone(), tier));
        self.registry.add(id, Arc::clone(&info));
        self.metrics.worker_spawned();

        Worker {
            info,
            idle_timeout: self.idle_timeout,
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
            handler: Arc::clone(&self.handler),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Register a worker and start its loop on the pool's runtime
    pub(crate) fn spawn(&self, tier: WorkerTier) -> JoinHandle<RetireReason> {
        let worker = self.register(tier);
        self.runtime.spawn(worker.run())
    }

    pub(crate) fn queue(&self) -> &Arc<dyn TaskQueue<T>> {
        &self.queue
    }

    pub(crate) fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub(crate) fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
