use crate::error::PoolError;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

pub(crate) fn next_task_id() -> u64 {
  NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// What happened to a submission.
///
/// Ignoring the value is always safe: rejected and cancelled submissions have
/// no side effects on the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// A slot was acquired and the job was spawned.
  Started,
  /// Accepted by a non-suspending submission; the slot is being acquired in
  /// the background.
  Deferred,
  /// Cancellation fired before a slot was acquired. The job never ran.
  Cancelled,
  /// The fixed pool's budget was already exhausted. The call was inert.
  Rejected,
}

impl SubmitOutcome {
  /// `true` for `Started` and `Deferred`.
  pub fn is_accepted(&self) -> bool {
    matches!(self, SubmitOutcome::Started | SubmitOutcome::Deferred)
  }

  pub fn into_result(self) -> Result<(), PoolError> {
    match self {
      SubmitOutcome::Started | SubmitOutcome::Deferred => Ok(()),
      SubmitOutcome::Cancelled => Err(PoolError::Cancelled),
      SubmitOutcome::Rejected => Err(PoolError::BudgetExhausted),
    }
  }
}

/// Adapts a synchronous closure into a job.
///
/// The closure runs on Tokio's blocking thread pool while the job holds its
/// slot. A panic inside the closure is resumed on the job's task.
pub fn blocking<F>(f: F) -> impl Future<Output = ()> + Send + 'static
where
  F: FnOnce() + Send + 'static,
{
  async move {
    if let Err(join_error) = tokio::task::spawn_blocking(f).await {
      if join_error.is_panic() {
        std::panic::resume_unwind(join_error.into_panic());
      }
    }
  }
}
