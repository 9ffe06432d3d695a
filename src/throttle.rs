use crate::config::ResolvedConfig;
use crate::counter::CompletionCounter;
use crate::error::PoolError;

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

/// Slot pool, completion counter and cancellation signal shared by both pool
/// variants.
#[derive(Debug)]
pub(crate) struct Throttle {
  pool_name: Arc<String>,
  concurrency_limit: usize,
  slots: Arc<Semaphore>,
  counter: CompletionCounter,
  token: CancellationToken,
  tokio_handle: TokioHandle,
}

/// One accepted submission that has not resolved yet. Dropping it resolves
/// the submission by decrementing the completion counter, whether the job ran,
/// was cancelled, or its task was torn down before being polled.
#[derive(Debug)]
pub(crate) struct Reservation {
  throttle: Arc<Throttle>,
  task_id: u64,
}

impl Reservation {
  pub(crate) fn task_id(&self) -> u64 {
    self.task_id
  }
}

impl Drop for Reservation {
  fn drop(&mut self) {
    self.throttle.counter.sub(1);
    trace!(pool_name = %*self.throttle.pool_name, task_id = %self.task_id, "Submission resolved.");
  }
}

/// Owned by a running job's task. Fields drop in declaration order: the slot
/// is released before the submission resolves, so a caller released by
/// `wait` never observes the slot still held.
struct RunningJob {
  _permit: OwnedSemaphorePermit,
  _reservation: Reservation,
}

impl Throttle {
  pub(crate) fn new(config: ResolvedConfig, initial_pending: usize) -> Arc<Self> {
    let concurrency_limit = config.concurrency_limit.clamp(1, Semaphore::MAX_PERMITS);
    info!(
      pool_name = %config.name,
      concurrency_limit,
      initial_pending,
      "Creating pool."
    );
    Arc::new(Self {
      pool_name: Arc::new(config.name),
      concurrency_limit,
      slots: Arc::new(Semaphore::new(concurrency_limit)),
      counter: CompletionCounter::new(initial_pending),
      token: config.token,
      tokio_handle: config.tokio_handle,
    })
  }

  pub(crate) fn name(&self) -> &str {
    &self.pool_name
  }

  pub(crate) fn concurrency_limit(&self) -> usize {
    self.concurrency_limit
  }

  /// Slots currently held, by running jobs or by submissions about to spawn.
  pub(crate) fn running_count(&self) -> usize {
    self.concurrency_limit.saturating_sub(self.slots.available_permits())
  }

  pub(crate) fn counter(&self) -> &CompletionCounter {
    &self.counter
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub(crate) fn tokio_handle(&self) -> &TokioHandle {
    &self.tokio_handle
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Fires the cancellation signal. Returns `true` if this call fired it.
  pub(crate) fn cancel(&self) -> bool {
    if self.token.is_cancelled() {
      debug!(pool_name = %*self.pool_name, "Cancellation already fired.");
      return false;
    }
    info!(pool_name = %*self.pool_name, "Force finishing pool: cancelling pending slot acquisitions.");
    self.token.cancel();
    true
  }

  /// Waits for a free slot or for cancellation, whichever comes first.
  /// Cancellation wins when both are ready.
  pub(crate) async fn acquire_slot(&self, task_id: u64) -> Result<OwnedSemaphorePermit, PoolError> {
    tokio::select! {
      biased;

      _ = self.token.cancelled() => {
        debug!(pool_name = %*self.pool_name, %task_id, "Cancelled while waiting for a slot.");
        Err(PoolError::Cancelled)
      }

      acquire_result = self.slots.clone().acquire_owned() => match acquire_result {
        Ok(permit) => {
          trace!(pool_name = %*self.pool_name, %task_id, "Acquired slot. Available: {}", self.slots.available_permits());
          Ok(permit)
        }
        // The slot semaphore is never closed; treat it like cancellation.
        Err(_) => {
          error!(pool_name = %*self.pool_name, %task_id, "Slot semaphore closed while waiting for a slot.");
          Err(PoolError::Cancelled)
        }
      }
    }
  }

  pub(crate) fn try_acquire_slot(&self, task_id: u64) -> Result<OwnedSemaphorePermit, PoolError> {
    if self.token.is_cancelled() {
      return Err(PoolError::Cancelled);
    }
    match self.slots.clone().try_acquire_owned() {
      Ok(permit) => {
        trace!(pool_name = %*self.pool_name, %task_id, "Acquired slot without waiting.");
        Ok(permit)
      }
      Err(TryAcquireError::NoPermits) => Err(PoolError::NoSlotAvailable),
      Err(TryAcquireError::Closed) => {
        error!(pool_name = %*self.pool_name, %task_id, "Slot semaphore closed.");
        Err(PoolError::Cancelled)
      }
    }
  }

  /// Ties a new submission to the completion counter. The caller must
  /// already have counted it (per call, or pre-loaded at construction).
  pub(crate) fn reserve(self: &Arc<Self>, task_id: u64) -> Reservation {
    Reservation {
      throttle: self.clone(),
      task_id,
    }
  }

  /// Spawns `work` holding `permit`. The slot is released and the submission
  /// resolved when the job's task ends, however it ends.
  pub(crate) fn launch<F>(&self, permit: OwnedSemaphorePermit, reservation: Reservation, work: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let task_id = reservation.task_id;
    let running = RunningJob {
      _permit: permit,
      _reservation: reservation,
    };
    debug!(pool_name = %*self.pool_name, %task_id, "Spawning job with slot.");

    self.tokio_handle.spawn(
      async move {
        let _running = running;
        work.await;
      }
      .instrument(info_span!("pool_task", pool_name = %*self.pool_name, %task_id)),
    );
  }
}
