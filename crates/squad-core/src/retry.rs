//! Retry on overload
//!
//! Linear backoff used around classifier model calls: the n-th retry waits
//! `n × base_delay` (500ms by default). Only [`SquadError::Overloaded`] is retried.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Result;

/// Delay unit between attempts
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Retry policy for overloaded backends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay multiplied by the retry number
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Run `operation`, retrying while it fails with an overload signal.
    ///
    /// Returns the value together with the number of attempts made.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(attempts = retries + 1, "operation succeeded after retry");
                    }
                    return Ok((value, retries + 1));
                }
                Err(error) if error.is_overloaded() && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.delay_for(retries);
                    warn!(retry = retries, ?delay, %error, "backend overloaded, retrying");
                    sleep(delay).await;
                }
                Err(error) => {
                    if error.is_overloaded() {
                        warn!(max_retries = self.max_retries, %error, "retries exhausted");
                    }
                    return Err(error);
                }
            }
        }
    }
}
