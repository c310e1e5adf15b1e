//! End-to-end pool scenarios
//!
//! Run with: cargo test -p workpool --test pool_scenarios_test
//!
//! These tests use real timers, so timing thresholds are generous.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use workpool::{Pool, PoolError, PoolStatus, Requirements, SubmitError};

/// Poll `condition` until it holds or `within` elapses
async fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Extremes observed by [`spawn_sampler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Samples {
    min_workers: usize,
    max_workers: usize,
    min_reserved: usize,
    max_reserved: usize,
}

/// Record the smallest and largest worker counts seen until stopped
fn spawn_sampler<T: Send + 'static>(
    pool: Arc<Pool<T>>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<Samples> {
    tokio::spawn(async move {
        let mut samples = Samples {
            min_workers: usize::MAX,
            max_workers: 0,
            min_reserved: usize::MAX,
            max_reserved: 0,
        };
        while !stop.load(Ordering::SeqCst) {
            let stats = pool.stats();
            samples.min_workers = samples.min_workers.min(stats.workers);
            samples.max_workers = samples.max_workers.max(stats.workers);
            samples.min_reserved = samples.min_reserved.min(stats.reserved_workers);
            samples.max_reserved = samples.max_reserved.max(stats.reserved_workers);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        samples
    })
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_single_worker_executes_every_task() {
    let executed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&executed);
    let pool = Arc::new(
        Pool::new(
            move |_task: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            },
            Requirements::default().with_min_workers(1).with_max_workers(1),
        )
        .unwrap(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let sampler = spawn_sampler(Arc::clone(&pool), Arc::clone(&stop));

    for i in 0..200 {
        pool.submit(i).await.unwrap();
    }
    assert!(
        eventually(Duration::from_secs(5), || {
            executed.load(Ordering::SeqCst) == 200
        })
        .await
    );

    stop.store(true, Ordering::SeqCst);
    let samples = sampler.await.unwrap();
    assert_eq!((samples.min_workers, samples.max_workers), (1, 1));

    pool.shutdown().await.unwrap();
    assert_eq!(executed.load(Ordering::SeqCst), 200);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_pool_scales_up_under_load_and_back_down() {
    let requirements = Requirements::default()
        .with_min_workers(1)
        .with_max_workers(5)
        .with_spawn_batch_size(2)
        .with_idle_timeout(Duration::from_millis(200));

    let executed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&executed);
    let pool = Arc::new(
        Pool::new(
            move |_task: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            },
            requirements,
        )
        .unwrap(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let sampler = spawn_sampler(Arc::clone(&pool), Arc::clone(&stop));

    for i in 0..100 {
        pool.submit(i).await.unwrap();
    }

    // While scaled up, only the floor is reserved
    assert!(
        eventually(Duration::from_secs(2), || pool.stats().elastic_workers > 0).await,
        "pool should add elastic workers under load"
    );
    let scaled = pool.stats();
    assert_eq!(scaled.reserved_workers, 1);
    assert!(scaled.workers <= 5);

    assert!(
        eventually(Duration::from_secs(10), || executed.load(Ordering::SeqCst) == 100).await,
        "all tasks should run"
    );

    // Elastic workers idle out, the reserved worker stays
    assert!(
        eventually(Duration::from_secs(3), || pool.worker_count() == 1).await,
        "pool should shrink back to the floor"
    );

    stop.store(true, Ordering::SeqCst);
    let samples = sampler.await.unwrap();
    assert!(samples.min_workers >= 1, "never below the floor: {samples:?}");
    assert!(samples.max_workers > 1, "pool should have grown: {samples:?}");
    assert!(samples.max_workers <= 5, "never above the ceiling: {samples:?}");
    assert_eq!(
        (samples.min_reserved, samples.max_reserved),
        (1, 1),
        "reserved tier must stay at min_workers"
    );

    let stats = pool.stats();
    assert!(stats.counters.scale_ups >= 1);
    assert_eq!(stats.counters.workers_spawned - stats.counters.workers_retired, 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_waits_while_queue_is_full() {
    let gate = Arc::new(Semaphore::new(0));
    let handler_gate = Arc::clone(&gate);
    let pool = Arc::new(
        Pool::new(
            move |_task: u32| {
                let gate = Arc::clone(&handler_gate);
                async move {
                    let _permit = gate.acquire().await;
                }
            },
            Requirements::default()
                .with_min_workers(1)
                .with_max_workers(1)
                .with_queue_capacity(3),
        )
        .unwrap(),
    );

    // The single worker takes the first task and blocks on the gate
    pool.submit(0).await.unwrap();
    assert!(eventually(Duration::from_secs(1), || pool.backlog() == 0).await);

    for i in 1..=3 {
        pool.submit(i).await.unwrap();
    }
    assert_eq!(pool.backlog(), 3);

    let blocked = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.submit(4).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "submit should wait for a free slot");
    assert!(matches!(pool.try_submit(5), Err(SubmitError::Full(5))));

    gate.add_permits(100);
    tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("submit should complete once a slot frees up")
        .unwrap()
        .unwrap();

    pool.shutdown().await.unwrap();
    assert_eq!(pool.stats().counters.tasks_completed, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_count_stays_within_bounds() {
    let cases = [(1, 1), (1, 3), (2, 4), (3, 3), (4, 10)];

    for (min, max) in cases {
        let pool = Arc::new(
            Pool::new(
                |_task: u32| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                },
                Requirements::default()
                    .with_min_workers(min)
                    .with_max_workers(max)
                    .with_queue_capacity(8)
                    .with_idle_timeout(Duration::from_millis(30)),
            )
            .unwrap(),
        );
        assert_eq!(pool.worker_count(), min);

        let stop = Arc::new(AtomicBool::new(false));
        let sampler = spawn_sampler(Arc::clone(&pool), Arc::clone(&stop));

        for i in 0..60 {
            pool.submit(i).await.unwrap();
        }
        // Leave time for elastic workers to idle out too
        tokio::time::sleep(Duration::from_millis(150)).await;

        stop.store(true, Ordering::SeqCst);
        let samples = sampler.await.unwrap();
        assert!(samples.min_workers >= min, "min={min} max={max}: {samples:?}");
        assert!(samples.max_workers <= max, "min={min} max={max}: {samples:?}");
        assert_eq!((samples.min_reserved, samples.max_reserved), (min, min));

        pool.shutdown().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_bounds_are_normalized() {
    let pool = Pool::new(
        |_task: u32| async {},
        Requirements::default().with_min_workers(0).with_max_workers(0),
    )
    .unwrap();

    assert_eq!(pool.requirements().min_workers, 1);
    assert_eq!(pool.requirements().max_workers, 1);
    assert_eq!(pool.worker_count(), 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_task_runs_twice() {
    let runs: Arc<Mutex<HashMap<u32, usize>>> = Arc::default();
    let recorder = Arc::clone(&runs);
    let pool = Arc::new(
        Pool::new(
            move |task: u32| {
                let recorder = Arc::clone(&recorder);
                async move {
                    tokio::task::yield_now().await;
                    *recorder.lock().entry(task).or_default() += 1;
                }
            },
            Requirements::default()
                .with_min_workers(2)
                .with_max_workers(8)
                .with_queue_capacity(16)
                .with_spawn_batch_size(3),
        )
        .unwrap(),
    );

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                for i in 0..250 {
                    pool.submit(p * 1000 + i).await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    pool.shutdown().await.unwrap();

    let runs = runs.lock();
    assert_eq!(runs.len(), 1000);
    assert!(runs.values().all(|&n| n == 1));
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_failing_and_panicking_handlers_are_isolated() {
    let completed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&completed);
    let pool = Pool::new(
        move |task: u32| {
            let seen = Arc::clone(&seen);
            async move {
                match task % 3 {
                    0 => panic!("task {task} exploded"),
                    1 => Err(format!("task {task} failed")),
                    _ => {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }
        },
        Requirements::default().with_min_workers(2).with_max_workers(2),
    )
    .unwrap();

    for i in 0..30 {
        pool.submit(i).await.unwrap();
    }
    assert!(
        eventually(Duration::from_secs(5), || {
            pool.stats().counters.tasks_completed == 10
        })
        .await
    );

    assert_eq!(pool.worker_count(), 2);
    let counters = pool.stats().counters;
    assert_eq!(counters.tasks_panicked, 10);
    assert_eq!(counters.tasks_failed, 10);
    assert_eq!(completed.load(Ordering::SeqCst), 10);

    pool.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_shutdown_drains_buffered_tasks() {
    let executed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&executed);
    let pool = Pool::new(
        move |_task: u32| {
            let seen = Arc::clone(&seen);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                seen.fetch_add(1, Ordering::SeqCst);
            }
        },
        Requirements::default()
            .with_min_workers(1)
            .with_max_workers(3)
            .with_queue_capacity(10),
    )
    .unwrap();

    for i in 0..10 {
        pool.submit(i).await.unwrap();
    }
    pool.shutdown().await.unwrap();

    assert_eq!(executed.load(Ordering::SeqCst), 10);
    assert_eq!(pool.worker_count(), 0);
    assert_eq!(pool.backlog(), 0);
    assert_eq!(pool.status(), PoolStatus::Stopped);

    match pool.submit(11).await {
        Err(SubmitError::Closed(task)) => assert_eq!(task, 11),
        other => panic!("expected Closed, got {other:?}"),
    }
    assert!(matches!(pool.try_submit(12), Err(SubmitError::Closed(12))));

    pool.shutdown().await.unwrap();
    assert_eq!(pool.status(), PoolStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_reports_stuck_workers() {
    let pool = Pool::new(
        |_task: u32| std::future::pending::<()>(),
        Requirements::default()
            .with_min_workers(2)
            .with_max_workers(2)
            .with_shutdown_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    pool.submit(1).await.unwrap();
    assert!(eventually(Duration::from_secs(1), || pool.backlog() == 0).await);

    match pool.shutdown().await {
        Err(PoolError::ShutdownTimeout { remaining }) => assert_eq!(remaining, 1),
        other => panic!("expected ShutdownTimeout, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stats_snapshot_serializes() {
    let pool = Pool::new(
        |_task: u32| async {},
        Requirements::default().with_min_workers(3).with_max_workers(6),
    )
    .unwrap();

    let json = serde_json::to_value(pool.stats()).unwrap();
    assert_eq!(json["status"], "running");
    assert_eq!(json["workers"], 3);
    assert_eq!(json["reserved_workers"], 3);
    assert_eq!(json["max_workers"], 6);
    assert_eq!(json["tasks_submitted"], 0);

    pool.shutdown().await.unwrap();
}
