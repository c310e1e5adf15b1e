//! Scaling controller
//!
//! One background task per pool. On every tick it compares demand (tasks
//! waiting in the queue) with supply headroom (workers below the ceiling) and
//! spawns a batch of elastic workers when there is both a backlog and room to
//! grow.
//!
//! # Scaling rule
//!
//! ```text
//! backlog = queue.len()
//! current = registry.count()
//!
//! if backlog > 0 and current < max_workers:
//!     spawn min(spawn_batch_size, max_workers - current) elastic workers
//! else:
//!     hold
//! ```
//!
//! The controller only ever grows the pool. Shrinking happens when elastic
//! workers time out on their own, so a worker is never removed while it is
//! in the middle of a task.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::WorkerTier;
use crate::requirements::Requirements;
use crate::worker::WorkerSpawner;

/// Outcome of one controller tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Add this many elastic workers
    SpawnElastic(usize),
    /// Leave the pool as it is
    Hold,
}

/// Decide whether to grow the pool
///
/// The batch is capped by the remaining headroom, so a single decision never
/// takes the pool past `max_workers`.
pub fn decide(backlog: usize, current: usize, requirements: &Requirements) -> ScaleDecision {
    if backlog == 0 || current >= requirements.max_workers {
        return ScaleDecision::Hold;
    }

    let headroom = requirements.max_workers - current;
    match requirements.spawn_batch_size.min(headroom) {
        0 => ScaleDecision::Hold,
        n => ScaleDecision::SpawnElastic(n),
    }
}

/// Background loop that samples the pool and spawns elastic workers
pub(crate) struct ScalingController<T: Send + 'static> {
    requirements: Requirements,
    spawner: WorkerSpawner<T>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T: Send + 'static> ScalingController<T> {
    pub(crate) fn new(
        requirements: Requirements,
        spawner: WorkerSpawner<T>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            requirements,
            spawner,
            shutdown_rx,
        }
    }

    /// Sample the pool once and act on the decision
    pub(crate) fn tick(&self) -> ScaleDecision {
        let backlog = self.spawner.queue().len();
        let current = self.spawner.registry().count();
        let decision = decide(backlog, current, &self.requirements);

        if let ScaleDecision::SpawnElastic(n) = decision {
            for _ in 0..n {
                self.spawner.spawn(WorkerTier::Elastic);
            }
            self.spawner.metrics().scaled_up();
            debug!(backlog, current, spawned = n, "Scaling up");
        }

        decision
    }

    /// Run until shutdown is signalled, the pool is dropped or the queue closes
    pub(crate) async fn run(mut self) {
        let interval = self.requirements.scale_interval.max(Duration::from_micros(1));
        info!(
            interval_us = interval.as_micros() as u64,
            max_workers = self.requirements.max_workers,
            spawn_batch_size = self.requirements.spawn_batch_size,
            "Scaling controller started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.spawner.queue().is_closed() {
                        debug!("Scaling controller: queue closed");
                        break;
                    }
                    self.tick();
                }
                _ = self.shutdown_rx.changed() => {
                    debug!("Scaling controller: shutdown requested");
                    break;
                }
            }
        }

        debug!("Scaling controller exited");
    }
}
