//! Worker registry
//!
//! Source of truth for how many workers a pool currently has. Workers add
//! themselves before their loop starts and remove themselves before it exits.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique worker identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Generate a fresh, time-ordered worker id
    pub fn generate() -> Self {
        Self(format!("worker-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Retirement policy class of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerTier {
    /// Part of the guaranteed floor; ignores idle timeouts
    Reserved,
    /// Spawned under load; retires after an idle timeout
    Elastic,
}

impl fmt::Display for WorkerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reserved => f.write_str("reserved"),
            Self::Elastic => f.write_str("elastic"),
        }
    }
}

/// Registry entry for a live worker
#[derive(Debug)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub tier: WorkerTier,
    pub spawned_at: DateTime<Utc>,
    tasks_processed: AtomicU64,
}

impl WorkerInfo {
    pub fn new(id: WorkerId, tier: WorkerTier) -> Self {
        Self {
            id,
            tier,
            spawned_at: Utc::now(),
            tasks_processed: AtomicU64::new(0),
        }
    }

    /// Number of tasks this worker has taken off the queue
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_task(&self) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of this entry at the current instant
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id.clone(),
            tier: self.tier,
            spawned_at: self.spawned_at,
            tasks_processed: self.tasks_processed(),
        }
    }
}

/// Serializable view of one live worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub tier: WorkerTier,
    pub spawned_at: DateTime<Utc>,
    pub tasks_processed: u64,
}

/// Concurrent map of live workers
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, Arc<WorkerInfo>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any entry with the same id
    pub fn add(&self, id: WorkerId, info: Arc<WorkerInfo>) {
        self.workers.insert(id, info);
    }

    /// Deregister a worker
    pub fn remove(&self, id: &WorkerId) -> Option<Arc<WorkerInfo>> {
        self.workers.remove(id).map(|(_, info)| info)
    }

    /// Number of registered workers
    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Number of registered workers in the given tier
    pub fn count_by_tier(&self, tier: WorkerTier) -> usize {
        self.workers
            .iter()
            .filter(|entry| entry.value().tier == tier)
            .count()
    }

    pub fn get(&self, id: &WorkerId) -> Option<Arc<WorkerInfo>> {
        self.workers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of every registered worker, in no particular order
    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Snapshots of every registered worker, oldest first
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let mut workers: Vec<_> = self
            .workers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        workers.sort_by(|a, b| a.spawned_at.cmp(&b.spawned_at).then_with(|| a.id.cmp(&b.id)));
        workers
    }
}
