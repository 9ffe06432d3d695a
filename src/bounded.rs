use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::task::{next_task_id, SubmitOutcome};
use crate::throttle::{Reservation, Throttle};

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, debug_span, Instrument};

/// A pool that accepts submissions indefinitely while running at most
/// `concurrency_limit` jobs at a time.
///
/// Every accepted submission is counted until it resolves; [`wait`](Self::wait)
/// returns once that count drops to zero. Only cancellation, through
/// [`force_finish`](Self::force_finish) or the parent token, keeps a
/// submission from running.
///
/// Clones share the same slots, counter and cancellation signal.
#[derive(Debug, Clone)]
pub struct BoundedPool {
  throttle: Arc<Throttle>,
}

impl BoundedPool {
  pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
    Ok(Self {
      throttle: Throttle::new(config.resolve()?, 0),
    })
  }

  pub fn name(&self) -> &str {
    self.throttle.name()
  }

  pub fn concurrency_limit(&self) -> usize {
    self.throttle.concurrency_limit()
  }

  /// Number of slots currently held.
  pub fn running_count(&self) -> usize {
    self.throttle.running_count()
  }

  /// Number of accepted submissions that have not resolved yet.
  pub fn pending_count(&self) -> usize {
    self.throttle.counter().pending()
  }

  /// Waits for a slot, then spawns `work` and returns without waiting for it
  /// to finish.
  ///
  /// Returns [`SubmitOutcome::Cancelled`] without running `work` if the pool
  /// is cancelled first.
  pub async fn submit<F>(&self, work: F) -> SubmitOutcome
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let reservation = self.accept();
    Self::admit(&self.throttle, reservation, work).await
  }

  /// Like [`submit`](Self::submit), but the wait for a slot happens on a
  /// background task so the caller never suspends.
  pub fn submit_nowait<F>(&self, work: F) -> SubmitOutcome
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let reservation = self.accept();
    let task_id = reservation.task_id();
    let throttle = self.throttle.clone();
    self.throttle.tokio_handle().spawn(
      async move {
        Self::admit(&throttle, reservation, work).await;
      }
      .instrument(debug_span!("pool_admission", pool_name = %self.name(), %task_id)),
    );
    SubmitOutcome::Deferred
  }

  /// Spawns `work` only if a slot is free right now.
  pub fn try_submit<F>(&self, work: F) -> Result<(), PoolError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let reservation = self.accept();
    let permit = self.throttle.try_acquire_slot(reservation.task_id())?;
    self.throttle.launch(permit, reservation, work);
    Ok(())
  }

  /// Waits until every accepted submission has finished or been discarded.
  ///
  /// Never resolves while submissions keep arriving.
  pub async fn wait(&self) {
    debug!(pool_name = %self.name(), pending = self.pending_count(), "Waiting for pool to drain.");
    self.throttle.counter().wait_zero().await;
    debug!(pool_name = %self.name(), "Pool drained.");
  }

  /// Fires the cancellation signal. Submissions waiting for a slot return
  /// without running; running jobs are unaffected. Idempotent.
  pub fn force_finish(&self) {
    self.throttle.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.throttle.is_cancelled()
  }

  fn accept(&self) -> Reservation {
    self.throttle.counter().add(1);
    self.throttle.reserve(next_task_id())
  }

  async fn admit<F>(throttle: &Arc<Throttle>, reservation: Reservation, work: F) -> SubmitOutcome
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match throttle.acquire_slot(reservation.task_id()).await {
      Ok(permit) => {
        throttle.launch(permit, reservation, work);
        SubmitOutcome::Started
      }
      Err(e) => {
        debug!(pool_name = %throttle.name(), task_id = reservation.task_id(), "Discarding submission: {}", e);
        SubmitOutcome::Cancelled
      }
    }
  }
}
