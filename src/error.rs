use thiserror::Error;

/// Errors that can occur within the `throttle_pool` pools.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
  #[error("No Tokio runtime handle was configured and none is current")]
  NoRuntime,

  #[error("Pool's submission budget is exhausted")]
  BudgetExhausted,

  #[error("Pool was cancelled before the job could acquire a slot")]
  Cancelled,

  #[error("No execution slot was immediately available")]
  NoSlotAvailable,
}
