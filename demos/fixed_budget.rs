use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use throttle_pool::{FixedPool, PoolConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Fixed Pool Example (budget: 1000, limit: 2, cancelled after 1s) ---");

  let shutdown = CancellationToken::new();
  let pool = FixedPool::new(
    PoolConfig::new()
      .name("fixed_pool")
      .concurrency_limit(2)
      .parent_token(shutdown.clone()),
    1000,
  )
  .expect("Failed to create pool");

  {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(1)).await;
      info!("Cancelling the parent token.");
      shutdown.cancel();
    });
  }

  let completed = Arc::new(AtomicUsize::new(0));
  for i in 0..pool.total_jobs() {
    let completed = completed.clone();
    let outcome = pool
      .submit(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        completed.fetch_add(1, Ordering::SeqCst);
        info!("Task {} finished", i);
      })
      .await;
    if !outcome.is_accepted() {
      info!("Submission {} was {:?}. Stopping.", i, outcome);
      break;
    }
  }

  pool.wait().await;
  info!(
    "Pool drained: {} of {} budgeted tasks ran (cancelled: {}).",
    completed.load(Ordering::SeqCst),
    pool.total_jobs(),
    pool.is_done()
  );
}
