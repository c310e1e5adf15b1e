//! Self-scaling worker pool
//!
//! Owns the queue, the registry and the scaling controller, and exposes the
//! submission API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::controller::ScalingController;
use crate::error::{PoolError, SubmitError};
use crate::metrics::{PoolMetrics, PoolStats};
use crate::queue::{BoundedTaskQueue, TaskQueue};
use crate::registry::{WorkerRegistry, WorkerSnapshot, WorkerTier};
use crate::requirements::Requirements;
use crate::worker::{async_handler, blocking_handler, TaskHandler, TaskOutcome, WorkerSpawner};

/// How often `shutdown` re-checks the registry while draining
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pool lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Accepting tasks and scaling
    Running,
    /// Queue closed, workers finishing buffered tasks
    Draining,
    /// Every worker has retired
    Stopped,
}

/// Worker pool that grows under backlog and shrinks when idle
///
/// `min_workers` reserved workers are started on construction and live until
/// shutdown. A background controller adds elastic workers, in batches, while
/// tasks are waiting and the ceiling allows it. Elastic workers retire on
/// their own after `idle_timeout` without work.
///
/// # Example
///
/// ```no_run
/// use workpool::{Pool, Requirements};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = Pool::new(
///     |url: String| async move {
///         tracing::info!(%url, "fetching");
///     },
///     Requirements::default().with_max_workers(16),
/// )?;
///
/// pool.submit("https://example.com".to_string()).await?;
/// pool.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct Pool<T: Send + 'static> {
    requirements: Requirements,
    queue: Arc<dyn TaskQueue<T>>,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<PoolMetrics>,
    status: RwLock<PoolStatus>,
    shutdown_tx: watch::Sender<bool>,
    controller: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Pool<T> {
    /// Start a pool running an async handler
    ///
    /// The handler may return `()` or `Result<(), E>` with `E: Display`.
    /// Must be called from within a tokio runtime.
    pub fn new<F, Fut>(handler: F, requirements: Requirements) -> Result<Self, PoolError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: TaskOutcome,
    {
        let requirements = requirements.normalized();
        let queue = Arc::new(BoundedTaskQueue::new(requirements.queue_capacity));
        Self::start(async_handler(handler), requirements, queue)
    }

    /// Start a pool with [`Requirements::default`]
    pub fn with_defaults<F, Fut>(handler: F) -> Result<Self, PoolError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: TaskOutcome,
    {
        Self::new(handler, Requirements::default())
    }

    /// Start a pool running a synchronous handler on the blocking thread pool
    pub fn new_blocking<F, O>(handler: F, requirements: Requirements) -> Result<Self, PoolError>
    where
        F: Fn(T) -> O + Send + Sync + 'static,
        O: TaskOutcome + Send + 'static,
    {
        let requirements = requirements.normalized();
        let queue = Arc::new(BoundedTaskQueue::new(requirements.queue_capacity));
        Self::start(blocking_handler(handler), requirements, queue)
    }

    /// Start a pool that drains a caller-supplied queue
    ///
    /// `queue_capacity` is taken from the queue itself.
    pub fn with_queue<F, Fut>(
        handler: F,
        requirements: Requirements,
        queue: Arc<dyn TaskQueue<T>>,
    ) -> Result<Self, PoolError>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: TaskOutcome,
    {
        let requirements = requirements
            .with_queue_capacity(queue.capacity())
            .normalized();
        Self::start(async_handler(handler), requirements, queue)
    }

    #[instrument(
        skip_all,
        fields(min_workers = requirements.min_workers, max_workers = requirements.max_workers)
    )]
    fn start(
        handler: TaskHandler<T>,
        requirements: Requirements,
        queue: Arc<dyn TaskQueue<T>>,
    ) -> Result<Self, PoolError> {
        let runtime = Handle::try_current()?;

        let registry = Arc::new(WorkerRegistry::new());
        let metrics = Arc::new(PoolMetrics::new());
        let spawner = WorkerSpawner::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            handler,
            Arc::clone(&metrics),
            requirements.idle_timeout,
            runtime.clone(),
        );

        // Reserved workers are registered before `start` returns
        for _ in 0..requirements.min_workers {
            spawner.spawn(WorkerTier::Reserved);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = ScalingController::new(requirements.clone(), spawner, shutdown_rx);
        let controller = runtime.spawn(controller.run());

        info!(
            queue_capacity = requirements.queue_capacity,
            spawn_batch_size = requirements.spawn_batch_size,
            idle_timeout_ms = requirements.idle_timeout.as_millis() as u64,
            "Worker pool started"
        );

        Ok(Self {
            requirements,
            queue,
            registry,
            metrics,
            status: RwLock::new(PoolStatus::Running),
            shutdown_tx,
            controller: Mutex::new(Some(controller)),
        })
    }

    /// Submit one task, waiting while the queue is full
    ///
    /// Fails only once shutdown has started; the task is handed back.
    pub async fn submit(&self, task: T) -> Result<(), SubmitError<T>> {
        self.queue.enqueue(task).await?;
        self.metrics.task_submitted();
        Ok(())
    }

    /// Submit one task without waiting
    pub fn try_submit(&self, task: T) -> Result<(), SubmitError<T>> {
        self.queue.try_enqueue(task)?;
        self.metrics.task_submitted();
        Ok(())
    }

    /// Number of registered workers right now
    pub fn worker_count(&self) -> usize {
        self.registry.count()
    }

    /// Per-worker view of the live workers, oldest first
    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.registry.snapshot()
    }

    /// Number of tasks waiting in the queue
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// Normalized requirements the pool runs with
    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    pub fn status(&self) -> PoolStatus {
        *self.status.read()
    }

    /// Snapshot of sizes and counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            status: self.status(),
            workers: self.registry.count(),
            reserved_workers: self.registry.count_by_tier(WorkerTier::Reserved),
            elastic_workers: self.registry.count_by_tier(WorkerTier::Elastic),
            min_workers: self.requirements.min_workers,
            max_workers: self.requirements.max_workers,
            backlog: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            counters: self.metrics.counters(),
        }
    }

    /// Stop scaling, close the queue and wait for workers to drain it
    ///
    /// Buffered tasks are still executed. Calling it again after the pool has
    /// stopped is a no-op.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if self.status() == PoolStatus::Stopped {
            return Ok(());
        }

        info!(
            backlog = self.queue.len(),
            workers = self.registry.count(),
            "Initiating graceful shutdown"
        );

        *self.status.write() = PoolStatus::Draining;
        let _ = self.shutdown_tx.send(true);
        self.queue.close();

        let controller = self.controller.lock().take();
        if let Some(controller) = controller {
            if let Err(e) = controller.await {
                warn!(error = %e, "Scaling controller ended abnormally");
            }
        }

        let deadline = tokio::time::Instant::now() + self.requirements.shutdown_timeout;

        loop {
            let remaining = self.registry.count();
            if remaining == 0 {
                debug!("All workers retired");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(remaining, backlog = self.queue.len(), "Shutdown timeout reached");
                return Err(PoolError::ShutdownTimeout { remaining });
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        *self.status.write() = PoolStatus::Stopped;

        let counters = self.metrics.counters();
        info!(
            tasks_completed = counters.tasks_completed,
            tasks_failed = counters.tasks_failed,
            tasks_panicked = counters.tasks_panicked,
            "Worker pool stopped"
        );
        Ok(())
    }
}

impl<T: Send + 'static> Drop for Pool<T> {
    fn drop(&mut self) {
        if self.status() != PoolStatus::Stopped {
            debug!("Worker pool dropped without shutdown, closing queue");
            let _ = self.shutdown_tx.send(true);
            self.queue.close();
        }
    }
}
