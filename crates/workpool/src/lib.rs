//! Self-scaling worker pool for tokio
//!
//! Callers submit homogeneous tasks; a population of workers sized between a
//! floor and a ceiling executes them. The pool grows when tasks back up and
//! shrinks again when the extra workers run out of work.
//!
//! # Architecture
//!
//! ```text
//!  submit() ──► ┌───────────────────┐  dequeue  ┌───────────────────────┐
//!               │  BoundedTaskQueue │ ────────► │ Worker (reserved) x N │
//!               └─────────┬─────────┘           │ Worker (elastic)  x M │
//!                         │ len()               └───────────┬───────────┘
//!                         ▼                                 │ add / remove
//!               ┌───────────────────┐           ┌───────────▼───────────┐
//!               │ ScalingController │ ◄ count() │     WorkerRegistry    │
//!               └─────────┬─────────┘           └───────────────────────┘
//!                         │ spawn elastic batch
//!                         └───────────────────► workers
//! ```
//!
//! - `min_workers` reserved workers start with the pool and never idle out.
//! - While the queue has a backlog and the pool is below `max_workers`, the
//!   controller adds up to `spawn_batch_size` elastic workers per tick.
//! - An elastic worker that waits `idle_timeout` without a task retires.
//! - Handler errors and panics are logged and counted; the worker carries on.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use workpool::{Pool, Requirements};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let requirements = Requirements::default()
//!         .with_min_workers(2)
//!         .with_max_workers(8)
//!         .with_idle_timeout(Duration::from_millis(500));
//!
//!     let pool = Pool::new(
//!         |n: u64| async move {
//!             tokio::time::sleep(Duration::from_millis(n)).await;
//!         },
//!         requirements,
//!     )?;
//!
//!     for n in 0..100 {
//!         pool.submit(n).await?;
//!     }
//!
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod requirements;
pub mod worker;

pub use controller::{decide, ScaleDecision};
pub use error::{PoolError, SubmitError};
pub use metrics::{PoolStats, TaskCounters};
pub use pool::{Pool, PoolStatus};
pub use queue::{BoundedTaskQueue, Dequeued, TaskQueue};
pub use registry::{WorkerId, WorkerInfo, WorkerRegistry, WorkerSnapshot, WorkerTier};
pub use requirements::Requirements;
pub use worker::TaskOutcome;

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{PoolError, SubmitError};
    pub use crate::pool::{Pool, PoolStatus};
    pub use crate::queue::TaskQueue;
    pub use crate::requirements::Requirements;
    pub use crate::worker::TaskOutcome;
}
