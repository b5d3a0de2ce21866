use std::{fmt::Display, future::Future, time::Duration};

use thiserror::Error;
use tracing::warn;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("call timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Timeout and retry behavior for network calls made on behalf of a session.
///
/// The default policy never times out and never retries; a hung call stalls
/// its caller until an outer deadline is imposed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self { timeout: None, max_retries: 0, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl CallPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Applies the configured timeout, if any, to a single future.
    pub async fn deadline<F>(&self, future: F) -> Result<F::Output, TimedOut>
    where
        F: Future,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| TimedOut(limit)),
            None => Ok(future.await),
        }
    }

    /// Runs `call` under the timeout, retrying failures with exponential backoff.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TimedOut> + Display,
    {
        let mut attempt = 0;
        loop {
            let outcome = match self.deadline(call()).await {
                Ok(result) => result,
                Err(timed_out) => Err(E::from(timed_out)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_retries => {
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "call failed; retrying"
                    );
                    let delay = self.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
