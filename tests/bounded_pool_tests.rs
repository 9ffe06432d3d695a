use throttle_pool::{blocking, BoundedPool, PoolConfig, SubmitOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

// Helper to initialize tracing for tests (call once per test run, not per test function)
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,throttle_pool=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// Tracks how many jobs run at once and the highest value ever observed.
#[derive(Default)]
struct InFlight {
  current: AtomicUsize,
  peak: AtomicUsize,
  finished: AtomicUsize,
}

impl InFlight {
  fn enter(&self) {
    let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
  }

  fn exit(&self) {
    self.current.fetch_sub(1, Ordering::SeqCst);
    self.finished.fetch_add(1, Ordering::SeqCst);
  }
}

fn pool(name: &str, limit: i64) -> BoundedPool {
  BoundedPool::new(PoolConfig::new().name(name).concurrency_limit(limit)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_submit_respects_wall_clock_bound() {
  setup_tracing_for_test();
  let total = 16u32;
  let concurrency = 3u32;
  let unit = Duration::from_millis(100);
  let pool = pool("test_bounded_wall_clock", concurrency.into());

  let start = Instant::now();
  for _ in 0..total {
    let outcome = pool.submit(async move { sleep(unit).await }).await;
    assert_eq!(outcome, SubmitOutcome::Started);
  }
  pool.wait().await;

  let expected = unit * total.div_ceil(concurrency);
  assert!(
    start.elapsed() <= expected,
    "expected at most {:?} but took {:?}",
    expected,
    start.elapsed()
  );
}

#[tokio::test(start_paused = true)]
async fn test_submit_nowait_respects_wall_clock_bound() {
  setup_tracing_for_test();
  let total = 16u32;
  let concurrency = 3u32;
  let unit = Duration::from_millis(100);
  let pool = pool("test_bounded_wall_clock_nowait", concurrency.into());

  let start = Instant::now();
  for _ in 0..total {
    assert_eq!(pool.submit_nowait(async move { sleep(unit).await }), SubmitOutcome::Deferred);
  }
  assert_eq!(pool.pending_count(), total as usize);
  pool.wait().await;

  let expected = unit * total.div_ceil(concurrency);
  assert!(start.elapsed() <= expected, "expected at most {:?} but took {:?}", expected, start.elapsed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_limit() {
  setup_tracing_for_test();
  let limit = 3;
  let pool = pool("test_bounded_ceiling", limit as i64);
  let in_flight = Arc::new(InFlight::default());
  let total = 60;

  for i in 0..total {
    let in_flight = in_flight.clone();
    let delay_ms = rand::rng().random_range(1..10u64);
    let job = async move {
      in_flight.enter();
      assert!(in_flight.current.load(Ordering::SeqCst) <= limit);
      sleep(Duration::from_millis(delay_ms)).await;
      in_flight.exit();
    };
    if i % 2 == 0 {
      pool.submit(job).await;
    } else {
      pool.submit_nowait(job);
    }
    assert!(pool.running_count() <= limit);
  }
  timeout(Duration::from_secs(10), pool.wait()).await.expect("Pool did not drain.");

  assert_eq!(in_flight.finished.load(Ordering::SeqCst), total);
  assert!(in_flight.peak.load(Ordering::SeqCst) <= limit);
  assert_eq!(pool.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_default_concurrency_counts_every_job() {
  setup_tracing_for_test();
  let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
  let total = parallelism * 3;
  let pool = pool("test_bounded_default_concurrency", -1);
  assert_eq!(pool.concurrency_limit(), parallelism);

  let actual = Arc::new(parking_lot::Mutex::new(0usize));
  for _ in 0..total {
    let actual = actual.clone();
    pool.submit_nowait(async move {
      *actual.lock() += 1;
    });
  }
  pool.wait().await;

  assert_eq!(*actual.lock(), total);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_submitters_share_one_pool() {
  setup_tracing_for_test();
  let submitters = 10;
  let per_submitter = 10;
  let pool = pool("test_bounded_multi_submitter", 0);
  let ran = Arc::new(AtomicUsize::new(0));

  let mut handles = Vec::new();
  for _ in 0..submitters {
    let pool = pool.clone();
    let ran = ran.clone();
    handles.push(tokio::spawn(async move {
      for j in 0..per_submitter {
        let ran = ran.clone();
        let job = async move {
          sleep(Duration::from_millis(20)).await;
          ran.fetch_add(1, Ordering::SeqCst);
        };
        if j % 2 == 0 {
          pool.submit(job).await;
        } else {
          pool.submit_nowait(job);
        }
      }
    }));
  }
  // Submitters must be done before waiting: the pool accepts work forever.
  for handle in handles {
    handle.await.unwrap();
  }
  pool.wait().await;

  assert_eq!(ran.load(Ordering::SeqCst), submitters * per_submitter);
}

#[tokio::test]
async fn test_force_finish_releases_blocked_submitters() {
  setup_tracing_for_test();
  let pool = pool("test_bounded_force_finish", 1);
  let gate = Arc::new(Notify::new());
  let ran = Arc::new(AtomicUsize::new(0));

  {
    let gate = gate.clone();
    let ran = ran.clone();
    let outcome = pool
      .submit(async move {
        gate.notified().await;
        ran.fetch_add(1, Ordering::SeqCst);
      })
      .await;
    assert_eq!(outcome, SubmitOutcome::Started);
  }

  let blocked: Vec<_> = (0..5)
    .map(|_| {
      let pool = pool.clone();
      let ran = ran.clone();
      tokio::spawn(async move {
        pool
          .submit(async move {
            ran.fetch_add(1, Ordering::SeqCst);
          })
          .await
      })
    })
    .collect();
  pool.submit_nowait({
    let ran = ran.clone();
    async move {
      ran.fetch_add(1, Ordering::SeqCst);
    }
  });

  sleep(Duration::from_millis(50)).await;
  assert_eq!(pool.pending_count(), 7);
  pool.force_finish();
  assert!(pool.is_cancelled());

  for handle in blocked {
    let outcome = timeout(Duration::from_millis(500), handle)
      .await
      .expect("Blocked submitter was not released by force_finish.")
      .unwrap();
    assert_eq!(outcome, SubmitOutcome::Cancelled);
  }

  // The running job is never interrupted.
  gate.notify_one();
  timeout(Duration::from_secs(1), pool.wait()).await.expect("Pool did not drain after force_finish.");
  assert_eq!(ran.load(Ordering::SeqCst), 1);
  assert_eq!(pool.submit(async {}).await, SubmitOutcome::Cancelled);
}

#[tokio::test]
async fn test_parent_token_cancels_pool() {
  setup_tracing_for_test();
  let parent = CancellationToken::new();
  let pool = BoundedPool::new(
    PoolConfig::new()
      .name("test_bounded_parent_token")
      .concurrency_limit(1)
      .parent_token(parent.clone()),
  )
  .unwrap();
  let gate = Arc::new(Notify::new());

  {
    let gate = gate.clone();
    pool.submit(async move { gate.notified().await }).await;
  }
  let blocked = {
    let pool = pool.clone();
    tokio::spawn(async move { pool.submit(async {}).await })
  };

  sleep(Duration::from_millis(20)).await;
  parent.cancel();

  assert_eq!(blocked.await.unwrap(), SubmitOutcome::Cancelled);
  assert!(pool.is_cancelled());
  gate.notify_one();
  timeout(Duration::from_secs(1), pool.wait()).await.expect("Pool did not drain after parent cancellation.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_force_finish_is_idempotent_under_concurrency() {
  setup_tracing_for_test();
  let pool = pool("test_bounded_idempotent", 2);
  let ran = Arc::new(AtomicUsize::new(0));

  let mut handles = Vec::new();
  for i in 0..40 {
    let pool = pool.clone();
    let ran = ran.clone();
    handles.push(tokio::spawn(async move {
      if i % 8 == 0 {
        pool.force_finish();
      }
      pool
        .submit(async move {
          sleep(Duration::from_millis(5)).await;
          ran.fetch_add(1, Ordering::SeqCst);
        })
        .await
    }));
  }

  let mut started = 0;
  for handle in handles {
    if handle.await.unwrap() == SubmitOutcome::Started {
      started += 1;
    }
  }
  pool.force_finish();
  timeout(Duration::from_secs(2), pool.wait()).await.expect("Pool did not drain.");

  assert!(pool.is_cancelled());
  assert_eq!(ran.load(Ordering::SeqCst), started);
  assert_eq!(pool.pending_count(), 0);
}

#[tokio::test]
async fn test_panicking_job_does_not_block_wait() {
  setup_tracing_for_test();
  let pool = pool("test_bounded_panic", 1);
  let ran = Arc::new(AtomicUsize::new(0));

  pool.submit(async { panic!("job intentionally panicked") }).await;
  {
    let ran = ran.clone();
    pool
      .submit(async move {
        ran.fetch_add(1, Ordering::SeqCst);
      })
      .await;
  }

  timeout(Duration::from_secs(1), pool.wait()).await.expect("Panicking job left the pool undrained.");
  assert_eq!(ran.load(Ordering::SeqCst), 1);
  assert_eq!(pool.running_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_jobs_hold_their_slot() {
  setup_tracing_for_test();
  let limit = 2;
  let pool = pool("test_bounded_blocking", limit as i64);
  let in_flight = Arc::new(InFlight::default());

  for _ in 0..8 {
    let in_flight = in_flight.clone();
    pool
      .submit(blocking(move || {
        in_flight.enter();
        std::thread::sleep(Duration::from_millis(10));
        in_flight.exit();
      }))
      .await;
  }
  pool.wait().await;

  assert_eq!(in_flight.finished.load(Ordering::SeqCst), 8);
  assert!(in_flight.peak.load(Ordering::SeqCst) <= limit);
}

#[test]
fn test_new_outside_runtime_without_handle_fails() {
  let result = BoundedPool::new(PoolConfig::new());
  assert!(matches!(result, Err(throttle_pool::PoolError::NoRuntime)));
}

#[test]
fn test_explicit_handle_allows_construction_outside_runtime() {
  let runtime = tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();
  let pool = BoundedPool::new(
    PoolConfig::new()
      .name("test_bounded_explicit_handle")
      .concurrency_limit(2)
      .tokio_handle(runtime.handle().clone()),
  )
  .unwrap();
  let ran = Arc::new(AtomicUsize::new(0));

  for _ in 0..4 {
    let ran = ran.clone();
    pool.submit_nowait(async move {
      ran.fetch_add(1, Ordering::SeqCst);
    });
  }
  runtime.block_on(pool.wait());
  assert_eq!(ran.load(Ordering::SeqCst), 4);
}
