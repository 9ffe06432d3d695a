use std::time::Duration;
use throttle_pool::{blocking, BoundedPool, PoolConfig};
use tracing::info;

async fn work_task_fn(id: usize) {
  info!("Task {} starting (takes 500ms)", id);
  tokio::time::sleep(Duration::from_millis(500)).await;
  info!("Task {} finished", id);
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Bounded Pool Example (Limit: 3) ---");

  let pool = BoundedPool::new(PoolConfig::new().name("basic_pool").concurrency_limit(3)).expect("Failed to create pool");

  let num_tasks = 9;
  info!(
    "Submitting {} tasks, each takes 500ms. With concurrency {}, this should take ~{}ms.",
    num_tasks,
    pool.concurrency_limit(),
    num_tasks / pool.concurrency_limit() * 500
  );

  for i in 0..num_tasks {
    if i % 2 == 0 {
      pool.submit(work_task_fn(i)).await;
    } else {
      // Returns immediately; the slot is acquired in the background.
      pool.submit_nowait(work_task_fn(i));
    }
  }

  pool
    .submit(blocking(|| {
      info!("Synchronous task running on the blocking thread pool.");
      std::thread::sleep(Duration::from_millis(200));
    }))
    .await;

  info!("All tasks submitted ({} pending). Waiting.", pool.pending_count());
  pool.wait().await;
  info!("--- Bounded Pool Example End ---");
}
