//! Error types

use std::fmt;

/// Pool lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool was constructed outside a tokio runtime
    #[error("worker pool must be created inside a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Workers were still registered when the shutdown deadline passed
    #[error("graceful shutdown timed out with {remaining} workers still running")]
    ShutdownTimeout { remaining: usize },
}

/// A rejected submission. Carries the task back to the caller.
#[derive(PartialEq, Eq)]
pub enum SubmitError<T> {
    /// The queue is at capacity (only returned by `try_submit`)
    Full(T),

    /// The pool is shutting down or stopped
    Closed(T),
}

impl<T> SubmitError<T> {
    /// Recover the task that could not be submitted
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(task) | Self::Closed(task) => task,
        }
    }

    /// Whether the rejection was caused by shutdown
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

// Manual impls so the task type needs neither Debug nor Display
impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("task queue is full"),
            Self::Closed(_) => f.write_str("worker pool is shut down"),
        }
    }
}

impl<T> std::error::Error for SubmitError<T> {}
