//! Pool counters and snapshots

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::pool::PoolStatus;

/// Lock-free counters updated by workers, the controller and submitters
#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_panicked: AtomicU64,
    workers_spawned: AtomicU64,
    workers_retired: AtomicU64,
    scale_ups: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_panicked(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_retired(&self) {
        self.workers_retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scaled_up(&self) {
        self.scale_ups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> TaskCounters {
        TaskCounters {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounters {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_panicked: u64,
    pub workers_spawned: u64,
    pub workers_retired: u64,
    pub scale_ups: u64,
}

impl TaskCounters {
    /// Tasks that left a worker, whatever the outcome
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_panicked
    }
}

/// Point-in-time view of a pool, suitable for logging or a status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub status: PoolStatus,
    pub workers: usize,
    pub reserved_workers: usize,
    pub elastic_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub backlog: usize,
    pub queue_capacity: usize,
    #[serde(flatten)]
    pub counters: TaskCounters,
}

impl PoolStats {
    /// Fraction of the worker ceiling currently in use (0.0 - 1.0)
    pub fn worker_utilization(&self) -> f64 {
        self.workers as f64 / self.max_workers.max(1) as f64
    }

    /// Fraction of queue slots currently taken (0.0 - 1.0)
    pub fn queue_utilization(&self) -> f64 {
        self.backlog as f64 / self.queue_capacity.max(1) as f64
    }

    /// Whether the pool is at its ceiling with work still waiting
    pub fn is_saturated(&self) -> bool {
        self.workers >= self.max_workers && self.backlog > 0
    }
}
