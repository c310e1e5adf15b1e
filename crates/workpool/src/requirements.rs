//! Pool sizing requirements
//!
//! [`Requirements`] is the tunable surface of a [`Pool`](crate::Pool). Every
//! field is independently optional; missing or invalid values are corrected by
//! [`Requirements::normalized`] instead of being rejected.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default guaranteed worker floor
pub const DEFAULT_MIN_WORKERS: usize = 1;
/// Default worker ceiling
pub const DEFAULT_MAX_WORKERS: usize = 10;
/// Default number of buffered task slots
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
/// Default number of workers added per scale-up
pub const DEFAULT_SPAWN_BATCH_SIZE: usize = 2;
/// Default idle period before an elastic worker retires
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default scaling controller sampling period
pub const DEFAULT_SCALE_INTERVAL: Duration = Duration::from_micros(100);
/// Default time `shutdown` waits for workers to drain
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker pool requirements
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workpool::Requirements;
///
/// let requirements = Requirements::default()
///     .with_min_workers(2)
///     .with_max_workers(8)
///     .with_idle_timeout(Duration::from_millis(500));
///
/// assert_eq!(requirements.clone().normalized(), requirements);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    /// Workers that are always kept alive, regardless of load
    pub min_workers: usize,

    /// Hard ceiling on concurrently registered workers
    pub max_workers: usize,

    /// Tasks buffered before `submit` starts waiting
    pub queue_capacity: usize,

    /// Elastic workers added each time the controller sees a backlog
    pub spawn_batch_size: usize,

    /// How long an elastic worker may wait for work before retiring
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Sampling period of the scaling controller
    #[serde(with = "duration_micros")]
    pub scale_interval: Duration,

    /// Upper bound on how long `shutdown` waits for workers to drain
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            spawn_batch_size: DEFAULT_SPAWN_BATCH_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            scale_interval: DEFAULT_SCALE_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Requirements {
    /// Create requirements with the documented defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guaranteed worker floor
    pub fn with_min_workers(mut self, n: usize) -> Self {
        self.min_workers = n;
        self
    }

    /// Set the worker ceiling
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    /// Set the number of buffered task slots
    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    /// Set how many elastic workers a single scale-up adds
    pub fn with_spawn_batch_size(mut self, n: usize) -> Self {
        self.spawn_batch_size = n;
        self
    }

    /// Set the elastic worker idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the scaling controller sampling period
    pub fn with_scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval = interval;
        self
    }

    /// Set the shutdown drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Correct values that would make the pool unusable.
    ///
    /// Never fails: a zero floor becomes 1, a ceiling below the floor is raised
    /// to it, and zero capacities or durations fall back to defaults. Applying
    /// it twice yields the same value.
    pub fn normalized(mut self) -> Self {
        if self.min_workers < 1 {
            self.min_workers = DEFAULT_MIN_WORKERS;
        }
        if self.max_workers < self.min_workers {
            self.max_workers = self.min_workers;
        }
        if self.queue_capacity < 1 {
            self.queue_capacity = DEFAULT_QUEUE_CAPACITY;
        }
        if self.spawn_batch_size < 1 {
            self.spawn_batch_size = 1;
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = DEFAULT_IDLE_TIMEOUT;
        }
        if self.scale_interval.is_zero() {
            self.scale_interval = DEFAULT_SCALE_INTERVAL;
        }
        if self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = DEFAULT_SHUTDOWN_TIMEOUT;
        }
        self
    }

    /// Create requirements from environment variables
    ///
    /// Reads `WORKPOOL_MIN_WORKERS`, `WORKPOOL_MAX_WORKERS`,
    /// `WORKPOOL_QUEUE_CAPACITY`, `WORKPOOL_SPAWN_BATCH_SIZE`,
    /// `WORKPOOL_IDLE_TIMEOUT_MS`, `WORKPOOL_SCALE_INTERVAL_US` and
    /// `WORKPOOL_SHUTDOWN_TIMEOUT_MS`. Unset or unparsable variables keep
    /// their defaults. The result is not normalized.
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable lookup
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse::<T>().ok())
        }
        let defaults = Self::default();

        Self {
            min_workers: parse(&lookup, "WORKPOOL_MIN_WORKERS").unwrap_or(defaults.min_workers),
            max_workers: parse(&lookup, "WORKPOOL_MAX_WORKERS").unwrap_or(defaults.max_workers),
            queue_capacity: parse(&lookup, "WORKPOOL_QUEUE_CAPACITY")
                .unwrap_or(defaults.queue_capacity),
            spawn_batch_size: parse(&lookup, "WORKPOOL_SPAWN_BATCH_SIZE")
                .unwrap_or(defaults.spawn_batch_size),
            idle_timeout: parse(&lookup, "WORKPOOL_IDLE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_timeout),
            scale_interval: parse(&lookup, "WORKPOOL_SCALE_INTERVAL_US")
                .map(Duration::from_micros)
                .unwrap_or(defaults.scale_interval),
            shutdown_timeout: parse(&lookup, "WORKPOOL_SHUTDOWN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }
}

/// Serde support for Duration as milliseconds
///
/// Whole milliseconds are written as integers. Anything finer is written as a
/// fractional number so it survives a round trip instead of truncating to 0.
mod duration_millis {
    use serde::{Deserializer, Serializer};
    use std::time::Duration;

    const NANOS_PER_UNIT: u64 = 1_000_000;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::duration_units::serialize(duration, NANOS_PER_UNIT, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        super::duration_units::deserialize(NANOS_PER_UNIT, deserializer)
    }
}

/// Serde support for Duration as microseconds
mod duration_micros {
    use serde::{Deserializer, Serializer};
    use std::time::Duration;

    const NANOS_PER_UNIT: u64 = 1_000;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        super::duration_units::serialize(duration, NANOS_PER_UNIT, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        super::duration_units::deserialize(NANOS_PER_UNIT, deserializer)
    }
}

mod duration_units {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(
        duration: &Duration,
        nanos_per_unit: u64,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = duration.as_nanos();
        let per_unit = u128::from(nanos_per_unit);
        if nanos % per_unit == 0 {
            u64::try_from(nanos / per_unit)
                .unwrap_or(u64::MAX)
                .serialize(serializer)
        } else {
            (nanos as f64 / nanos_per_unit as f64).serialize(serializer)
        }
    }

    pub fn deserialize<'de, D>(nanos_per_unit: u64, deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let units = f64::deserialize(deserializer)?;
        if !units.is_finite() || units < 0.0 {
            return Err(D::Error::custom(format!(
                "duration must be a non-negative number, got {units}"
            )));
        }
        Ok(Duration::from_nanos((units * nanos_per_unit as f64).round() as u64))
    }
}
