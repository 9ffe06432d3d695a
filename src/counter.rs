use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{error, trace};

/// Count of accepted-but-unresolved submissions, with an async
/// "wait until zero" barrier.
///
/// Decrements that would take the count below zero are refused and logged;
/// the count never wraps.
#[derive(Debug, Default)]
pub(crate) struct CompletionCounter {
  pending: AtomicUsize,
  zero: Notify,
}

impl CompletionCounter {
  pub(crate) fn new(initial: usize) -> Self {
    Self {
      pending: AtomicUsize::new(initial),
      zero: Notify::new(),
    }
  }

  pub(crate) fn pending(&self) -> usize {
    self.pending.load(Ordering::Acquire)
  }

  pub(crate) fn add(&self, k: usize) {
    if k == 0 {
      return;
    }
    let previous = self.pending.fetch_add(k, Ordering::AcqRel);
    trace!(previous, added = k, "Completion counter incremented.");
  }

  pub(crate) fn sub(&self, k: usize) {
    if k == 0 {
      return;
    }
    match self
      .pending
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| current.checked_sub(k))
    {
      Ok(previous) => {
        trace!(previous, removed = k, "Completion counter decremented.");
        if previous == k {
          self.zero.notify_waiters();
        }
      }
      Err(current) => {
        error!(
          current,
          requested = k,
          "Completion counter decrement would go negative. Ignoring to keep the counter consistent."
        );
      }
    }
  }

  /// Resolves once the count is observed at zero.
  ///
  /// Cancel-safe: dropping the future before it resolves has no effect on the
  /// counter.
  pub(crate) async fn wait_zero(&self) {
    loop {
      let notified = self.zero.notified();
      tokio::pin!(notified);
      // Register before checking so a decrement-to-zero between the check and
      // the await cannot be missed.
      notified.as_mut().enable();
      if self.pending() == 0 {
        return;
      }
      notified.await;
    }
  }
}
