use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::task::{next_task_id, SubmitOutcome};
use crate::throttle::{Reservation, Throttle};

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, debug_span, info, Instrument};

#[derive(Debug)]
struct FixedPoolInner {
  throttle: Arc<Throttle>,
  total_jobs: usize,
  /// Submissions still permitted. Guards every budget check-then-decrement
  /// and the collapse of unconsumed budget into the completion counter.
  remaining: Mutex<usize>,
}

/// A pool with a fixed submission budget of `total_jobs`.
///
/// The completion counter starts at `total_jobs`, so [`wait`](Self::wait)
/// only returns once the whole budget has been submitted and resolved, or
/// once the pool is cancelled and submission stops. Submissions beyond the
/// budget are inert and return [`SubmitOutcome::Rejected`].
///
/// A caller that submits fewer than `total_jobs` jobs and never cancels will
/// wait forever.
///
/// Clones share the same budget, slots, counter and cancellation signal.
#[derive(Debug, Clone)]
pub struct FixedPool {
  inner: Arc<FixedPoolInner>,
}

impl FixedPool {
  pub fn new(config: PoolConfig, total_jobs: usize) -> Result<Self, PoolError> {
    let throttle = Throttle::new(config.resolve()?, total_jobs);
    Ok(Self {
      inner: Arc::new(FixedPoolInner {
        throttle,
        total_jobs,
        remaining: Mutex::new(total_jobs),
      }),
    })
  }

  pub fn name(&self) -> &str {
    self.inner.throttle.name()
  }

  pub fn concurrency_limit(&self) -> usize {
    self.inner.throttle.concurrency_limit()
  }

  pub fn total_jobs(&self) -> usize {
    self.inner.total_jobs
  }

  pub fn remaining_budget(&self) -> usize {
    *self.inner.remaining.lock()
  }

  /// `true` once no further submission will be accepted. Distinct from
  /// [`is_done`](Self::is_done): an exhausted pool need not be cancelled.
  pub fn is_budget_exhausted(&self) -> bool {
    self.remaining_budget() == 0
  }

  /// Number of slots currently held.
  pub fn running_count(&self) -> usize {
    self.inner.throttle.running_count()
  }

  /// Budgeted submissions, made or not, that have not resolved yet.
  pub fn pending_count(&self) -> usize {
    self.inner.throttle.counter().pending()
  }

  /// Consumes one unit of budget, waits for a slot, then spawns `work`.
  ///
  /// Returns [`SubmitOutcome::Rejected`] immediately if the budget is
  /// exhausted, or [`SubmitOutcome::Cancelled`] if the pool is cancelled
  /// before a slot frees up.
  pub async fn submit<F>(&self, work: F) -> SubmitOutcome
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match self.inner.consume_budget() {
      Some(reservation) => FixedPoolInner::admit(&self.inner, reservation, work).await,
      None => SubmitOutcome::Rejected,
    }
  }

  /// Like [`submit`](Self::submit), but the wait for a slot happens on a
  /// background task so the caller never suspends. The budget is consumed
  /// before this returns.
  pub fn submit_nowait<F>(&self, work: F) -> SubmitOutcome
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let Some(reservation) = self.inner.consume_budget() else {
      return SubmitOutcome::Rejected;
    };
    let task_id = reservation.task_id();
    let inner = self.inner.clone();
    self.inner.throttle.tokio_handle().spawn(
      async move {
        FixedPoolInner::admit(&inner, reservation, work).await;
      }
      .instrument(debug_span!("pool_admission", pool_name = %self.name(), %task_id)),
    );
    SubmitOutcome::Deferred
  }

  /// Spawns `work` only if a slot is free right now. When no slot is free the
  /// consumed budget is handed back so the submission can be retried.
  pub fn try_submit<F>(&self, work: F) -> Result<(), PoolError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let reservation = self.inner.consume_budget().ok_or(PoolError::BudgetExhausted)?;
    match self.inner.throttle.try_acquire_slot(reservation.task_id()) {
      Ok(permit) => {
        self.inner.throttle.launch(permit, reservation, work);
        Ok(())
      }
      Err(PoolError::NoSlotAvailable) => {
        self.inner.refund_budget(reservation);
        Err(PoolError::NoSlotAvailable)
      }
      Err(e) => {
        self.inner.collapse_budget();
        Err(e)
      }
    }
  }

  /// Waits until the whole budget has been submitted and resolved.
  ///
  /// If the pool is cancelled, unconsumed budget is discarded and this
  /// returns once the submissions already made have resolved.
  pub async fn wait(&self) {
    let throttle = &self.inner.throttle;
    debug!(pool_name = %self.name(), pending = self.pending_count(), "Waiting for pool to drain.");
    tokio::select! {
      biased;

      _ = throttle.counter().wait_zero() => {}

      _ = throttle.token().cancelled() => {
        self.inner.collapse_budget();
        throttle.counter().wait_zero().await;
      }
    }
    debug!(pool_name = %self.name(), "Pool drained.");
  }

  /// Fires the cancellation signal and discards unconsumed budget.
  /// Submissions waiting for a slot return without running; running jobs are
  /// unaffected. Idempotent.
  pub fn force_finish(&self) {
    self.inner.throttle.cancel();
    self.inner.collapse_budget();
  }

  /// Whether the cancellation signal has fired.
  pub fn is_done(&self) -> bool {
    self.inner.throttle.is_cancelled()
  }
}

impl FixedPoolInner {
  fn consume_budget(&self) -> Option<Reservation> {
    let mut remaining = self.remaining.lock();
    if *remaining == 0 {
      debug!(pool_name = %self.throttle.name(), "Budget exhausted. Ignoring submission.");
      return None;
    }
    *remaining -= 1;
    Some(self.throttle.reserve(next_task_id()))
  }

  fn refund_budget(&self, reservation: Reservation) {
    {
      let mut remaining = self.remaining.lock();
      if !self.throttle.is_cancelled() {
        // Re-count the job before its reservation resolves so the counter
        // never dips below the unconsumed budget.
        *remaining += 1;
        self.throttle.counter().add(1);
      }
    }
    if self.throttle.is_cancelled() {
      self.collapse_budget();
    }
    drop(reservation);
  }

  /// Moves every unconsumed unit of budget out of the completion counter.
  /// Runs any number of times; only the first run after cancellation
  /// finds budget to move.
  fn collapse_budget(&self) -> usize {
    let mut remaining = self.remaining.lock();
    let unconsumed = std::mem::take(&mut *remaining);
    if unconsumed > 0 {
      self.throttle.counter().sub(unconsumed);
      info!(
        pool_name = %self.throttle.name(),
        unconsumed,
        "Pool cancelled: discarded unconsumed budget."
      );
    }
    unconsumed
  }

  async fn admit<F>(inner: &Arc<Self>, reservation: Reservation, work: F) -> SubmitOutcome
  where
    F: Future<Output = ()> + Send + 'static,
  {
    match inner.throttle.acquire_slot(reservation.task_id()).await {
      Ok(permit) => {
        inner.throttle.launch(permit, reservation, work);
        SubmitOutcome::Started
      }
      Err(e) => {
        debug!(pool_name = %inner.throttle.name(), task_id = reservation.task_id(), "Discarding submission: {}", e);
        inner.collapse_budget();
        drop(reservation);
        SubmitOutcome::Cancelled
      }
    }
  }
}
