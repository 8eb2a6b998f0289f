//! Retry wrapper
//!
//! [`Retry::run`] re-issues an async operation from scratch after each
//! failure, waiting for a delay chosen by a pluggable [`Delay`] policy, until
//! it succeeds, the attempt budget is spent, or the stop predicate rejects the
//! error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Computes the wait before retry number `attempt` (1-based).
pub trait Delay: Send + Sync + fmt::Debug {
  fn calculate(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Delay for FixedDelay {
  fn calculate(&self, _attempt: u32) -> Duration {
    self.0
  }
}

/// `step * attempt`, capped at `upper`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearDelay {
  pub step: Duration,
  pub upper: Duration,
}

impl Delay for LinearDelay {
  fn calculate(&self, attempt: u32) -> Duration {
    self.step.saturating_mul(attempt).min(self.upper)
  }
}

/// `base * 2^(attempt - 1)`, capped at `upper`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialDelay {
  pub base: Duration,
  pub upper: Duration,
}

impl Delay for ExponentialDelay {
  fn calculate(&self, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    self.base.saturating_mul(factor).min(self.upper)
  }
}

type StopPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Retry {
  max_attempts: u32,
  delay: Arc<dyn Delay>,
  stop_when: Option<StopPredicate>,
}

impl fmt::Debug for Retry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Retry")
      .field("max_attempts", &self.max_attempts)
      .field("delay", &self.delay)
      .field("stop_when", &self.stop_when.is_some())
      .finish()
  }
}

impl Retry {
  /// Allow up to `max_attempts` executions in total (at least one).
  pub fn new(max_attempts: u32, delay: impl Delay + 'static) -> Self {
    Self {
      max_attempts: max_attempts.max(1),
      delay: Arc::new(delay),
      stop_when: None,
    }
  }

  pub fn from_config(config: &RetryConfig) -> Self {
    Self::new(
      config.max_attempts,
      ExponentialDelay {
        base: config.base_delay,
        upper: config.max_delay,
      },
    )
  }

  /// Fail immediately, without waiting, on errors matching `predicate`.
  pub fn stop_when(mut self, predicate: impl Fn(&Error) -> bool + Send + Sync + 'static) -> Self {
    self.stop_when = Some(Arc::new(predicate));
    self
  }

  pub fn max_attempts(&self) -> u32 {
    self.max_attempts
  }

  pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempts = 0u32;
    loop {
      let error = match operation().await {
        Ok(value) => return Ok(value),
        Err(error) => error,
      };
      attempts += 1;
      if attempts >= self.max_attempts {
        return Err(Error::MaxAttemptsReached {
          attempts,
          last: Box::new(error),
        });
      }
      if let Some(stop) = &self.stop_when {
        if stop(&error) {
          return Err(Error::CannotRetry(Box::new(error)));
        }
      }
      let delay = self.delay.calculate(attempts);
      tracing::warn!(attempts, ?delay, error = %error, "operation failed, retrying");
      tokio::time::sleep(delay).await;
    }
  }
}
