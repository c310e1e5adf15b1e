//! Bounded task queue
//!
//! Callers enqueue into the queue and workers drain it. Enqueue waits while
//! every slot is taken; dequeue waits until an item arrives, a timeout
//! elapses or the queue is closed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, TryAcquireError};

use crate::error::SubmitError;

/// Result of a single dequeue attempt
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    /// An item was taken off the queue
    Item(T),
    /// Nothing arrived within the wait window
    TimedOut,
    /// The queue is closed and fully drained
    Closed,
}

/// Task queue consumed by the worker pool
///
/// Implementations must be safe to share between any number of producers and
/// consumers: each enqueued item is handed to exactly one `dequeue` caller.
#[async_trait]
pub trait TaskQueue<T: Send + 'static>: Send + Sync {
    /// Add an item, waiting while the queue is full
    async fn enqueue(&self, item: T) -> Result<(), SubmitError<T>>;

    /// Add an item without waiting
    fn try_enqueue(&self, item: T) -> Result<(), SubmitError<T>>;

    /// Take the oldest item, waiting up to `timeout` for one to arrive
    async fn dequeue(&self, timeout: Duration) -> Dequeued<T>;

    /// Number of items currently buffered
    fn len(&self) -> usize;

    /// Whether nothing is buffered
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered items
    fn capacity(&self) -> usize;

    /// Stop accepting items. Buffered items can still be dequeued.
    fn close(&self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// In-process FIFO queue with a fixed number of slots
///
/// Free slots are tracked by a semaphore so producers queue up fairly when
/// the buffer is full. Consumers park on a [`Notify`] until an item arrives.
pub struct BoundedTaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    slots: Semaphore,
    available: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl<T> BoundedTaskQueue<T> {
    /// Create a queue with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            available: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.slots.add_permits(1);
        }
        item
    }
}

#[async_trait]
impl<T: Send + 'static> TaskQueue<T> for BoundedTaskQueue<T> {
    async fn enqueue(&self, item: T) -> Result<(), SubmitError<T>> {
        match self.slots.acquire().await {
            Ok(permit) => {
                // The slot is handed back in `pop`
                permit.forget();
                self.push(item);
                Ok(())
            }
            Err(_) => Err(SubmitError::Closed(item)),
        }
    }

    fn try_enqueue(&self, item: T) -> Result<(), SubmitError<T>> {
        match self.slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.push(item);
                Ok(())
            }
            Err(TryAcquireError::NoPermits) => Err(SubmitError::Full(item)),
            Err(TryAcquireError::Closed) => Err(SubmitError::Closed(item)),
        }
    }

    async fn dequeue(&self, timeout: Duration) -> Dequeued<T> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a push or close between the
            // check and the await still wakes us.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.pop() {
                return Dequeued::Item(item);
            }
            if self.is_closed() {
                return Dequeued::Closed;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Dequeued::TimedOut;
            }
        }
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();
        self.available.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
