use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workpool::{Pool, Requirements};

/// Tasks submitted in the burst
const BURST_SIZE: u64 = 200;
/// Simulated work per task
const TASK_DURATION: Duration = Duration::from_millis(25);
/// How often the worker count is logged
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workpool=debug,workpool_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        tracing::info!("Loaded .env from {:?}", path);
    }

    let requirements = Requirements::from_env();
    tracing::info!(?requirements, "workpool-demo starting...");

    let pool = Arc::new(Pool::new(
        |task: u64| async move {
            tokio::time::sleep(TASK_DURATION).await;
            if task % 50 == 49 {
                return Err(format!("task {task} rejected"));
            }
            Ok(())
        },
        requirements,
    )?);

    let sampler = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;
                let stats = pool.stats();
                let finished = stats.counters.tasks_finished();
                tracing::info!(
                    workers = stats.workers,
                    elastic = stats.elastic_workers,
                    backlog = stats.backlog,
                    worker_utilization = stats.worker_utilization(),
                    queue_utilization = stats.queue_utilization(),
                    saturated = stats.is_saturated(),
                    finished,
                    "Pool sample"
                );
                // Done once every task ran and the elastic workers idled out
                if finished >= BURST_SIZE && stats.elastic_workers == 0 {
                    break;
                }
            }
        })
    };

    for task in 0..BURST_SIZE {
        pool.submit(task).await?;
    }
    tracing::info!(submitted = BURST_SIZE, "Burst submitted, waiting for scale-down");

    sampler.await?;

    for worker in pool.workers() {
        tracing::info!(
            worker_id = %worker.id,
            tier = %worker.tier,
            spawned_at = %worker.spawned_at,
            tasks_processed = worker.tasks_processed,
            "Surviving worker"
        );
    }
    pool.shutdown().await?;

    let stats = serde_json::to_string(&pool.stats())?;
    tracing::info!(%stats, "workpool-demo finished");
    Ok(())
}
