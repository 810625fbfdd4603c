//! Fixed-delay retry policy for calls to external synthesizers.
//!
//! A [`RetryPolicy`] is a plain value: the retry budget and the delay travel
//! with the call instead of living on the client, so the same policy wraps
//! prompt synthesis and image synthesis alike. The operation closure receives
//! the 0-indexed attempt number and is invoked afresh on every attempt; the
//! client it calls into is shared and reused.

use crate::error::{RetryExhausted, ServiceError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Wait between a failed attempt and the next one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `operation` until it succeeds or the budget is spent.
    ///
    /// Sleeps `delay` after every failure except the last. The returned
    /// [`RetryExhausted`] carries the error of the final attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let attempts = self.max_attempts();
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{operation_name}: succeeded on attempt {}", attempt + 1);
                    }
                    return Ok(value);
                }
                Err(err) if attempt + 1 < attempts => {
                    warn!(
                        "{operation_name}: attempt {}/{} failed: {err}; retrying in {}ms",
                        attempt + 1,
                        attempts,
                        self.delay.as_millis()
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(RetryExhausted {
                        operation: operation_name.to_string(),
                        retries: self.max_retries,
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }
}
