//! Bounded exponential backoff for network operations
//!
//! ```text
//! attempt 1: immediate
//! attempt 2: wait 100ms  * jitter
//! attempt 3: wait 150ms  * jitter
//! attempt 4: wait 225ms  * jitter
//! attempt 5: wait 337ms  * jitter
//! then: Error::RetriesExhausted
//! ```
//!
//! Jitter scales each wait by a random factor in `[0.75, 1.25)`. Errors that
//! cannot succeed on retry (malformed input, missing entities) return
//! immediately. A cancelled token interrupts the wait and returns the last error.

use crate::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waits, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Wait before retry number `retry` (0-indexed), before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(retry as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }

    fn jittered(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        let factor = 0.75 + rand::random::<f64>() * 0.5;
        backoff.mul_f64(factor).min(self.max_backoff)
    }
}

/// Whether retrying the failed operation can succeed.
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Http(e) => match e.status() {
            Some(status) => status.is_server_error() || status.as_u16() == 429,
            None => true,
        },
        Error::ObjectStore(e) => !matches!(
            e,
            object_store::Error::NotFound { .. }
                | object_store::Error::NotSupported { .. }
                | object_store::Error::NotImplemented
        ),
        Error::Io(_) => true,
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_retryable(&err) {
            return Err(err);
        }
        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "Retries exhausted");
            return Err(Error::RetriesExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let wait = policy.jittered(attempt - 1);
        debug!(
            attempt,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "Retrying after transient error"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
