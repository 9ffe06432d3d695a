use crate::error::PoolError;

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Maximum number of jobs allowed to run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyLimit {
  /// One slot per execution unit available to the process.
  #[default]
  Auto,
  /// An explicit number of slots.
  Fixed(NonZeroUsize),
}

impl ConcurrencyLimit {
  /// Resolves the limit to a concrete slot count.
  pub fn resolve(self) -> usize {
    match self {
      ConcurrencyLimit::Fixed(n) => n.get(),
      ConcurrencyLimit::Auto => match std::thread::available_parallelism() {
        Ok(n) => n.get(),
        Err(e) => {
          warn!("Could not determine available parallelism ({}). Falling back to a single slot.", e);
          1
        }
      },
    }
  }
}

impl From<usize> for ConcurrencyLimit {
  fn from(limit: usize) -> Self {
    NonZeroUsize::new(limit).map_or(ConcurrencyLimit::Auto, ConcurrencyLimit::Fixed)
  }
}

impl From<NonZeroUsize> for ConcurrencyLimit {
  fn from(limit: NonZeroUsize) -> Self {
    ConcurrencyLimit::Fixed(limit)
  }
}

macro_rules! impl_from_signed {
  ($($t:ty),*) => {
    $(
      impl From<$t> for ConcurrencyLimit {
        /// Zero and negative values select [`ConcurrencyLimit::Auto`].
        fn from(limit: $t) -> Self {
          usize::try_from(limit).map_or(ConcurrencyLimit::Auto, ConcurrencyLimit::from)
        }
      }
    )*
  };
}

impl_from_signed!(i32, i64, isize);

/// Construction parameters shared by [`BoundedPool`](crate::BoundedPool) and
/// [`FixedPool`](crate::FixedPool).
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
  name: Option<String>,
  concurrency_limit: ConcurrencyLimit,
  parent_token: Option<CancellationToken>,
  tokio_handle: Option<TokioHandle>,
}

impl PoolConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Name used in log records. Defaults to `pool-<n>`.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn concurrency_limit(mut self, limit: impl Into<ConcurrencyLimit>) -> Self {
    self.concurrency_limit = limit.into();
    self
  }

  /// Parent cancellation signal. Cancelling it cancels the pool; cancelling
  /// the pool never cancels the parent.
  pub fn parent_token(mut self, token: CancellationToken) -> Self {
    self.parent_token = Some(token);
    self
  }

  /// Runtime the jobs are spawned on. Defaults to the runtime current at
  /// construction.
  pub fn tokio_handle(mut self, handle: TokioHandle) -> Self {
    self.tokio_handle = Some(handle);
    self
  }

  /// Resolves every default. Called once when a pool is built.
  pub(crate) fn resolve(self) -> Result<ResolvedConfig, PoolError> {
    let tokio_handle = match self.tokio_handle {
      Some(handle) => handle,
      None => TokioHandle::try_current().map_err(|_| PoolError::NoRuntime)?,
    };
    let pool_id = NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let token = match self.parent_token {
      Some(parent) => parent.child_token(),
      None => CancellationToken::new(),
    };

    Ok(ResolvedConfig {
      name: self.name.unwrap_or_else(|| format!("pool-{}", pool_id)),
      concurrency_limit: self.concurrency_limit.resolve(),
      token,
      tokio_handle,
    })
  }
}

#[derive(Debug)]
pub(crate) struct ResolvedConfig {
  pub(crate) name: String,
  pub(crate) concurrency_limit: usize,
  pub(crate) token: CancellationToken,
  pub(crate) tokio_handle: TokioHandle,
}
