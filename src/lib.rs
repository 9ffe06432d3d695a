//! Tokio-based pools that run an unbounded stream of jobs with at most `N`
//! executing at once, and let the caller wait for a batch of them to finish.
//!
//! - [`BoundedPool`] accepts submissions indefinitely.
//! - [`FixedPool`] accepts a fixed number of submissions and ignores the rest.
//!
//! Both can be cancelled, through [`BoundedPool::force_finish`] /
//! [`FixedPool::force_finish`] or a parent
//! [`CancellationToken`](tokio_util::sync::CancellationToken). Cancellation
//! releases every submission still waiting for a slot without running it;
//! jobs already running are left to finish.

mod bounded;
mod config;
mod counter;
mod error;
mod fixed;
mod task;
mod throttle;

pub use bounded::BoundedPool;
pub use config::{ConcurrencyLimit, PoolConfig};
pub use error::PoolError;
pub use fixed::FixedPool;
pub use task::{blocking, SubmitOutcome};
