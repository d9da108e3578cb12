use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Classification of a failed attempt for retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryableError {
    /// 429 Rate Limit - retry after an amplified wait
    RateLimit,
    /// Connection errors, timeouts, malformed bodies, retryable statuses
    Transient,
    /// Credentials rejected or a request that can never succeed - don't retry
    Permanent,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not including the initial attempt)
    pub max_retries: u32,
    /// Wait before the first retry; doubles after every retry
    pub initial_wait: Duration,
    /// Factor applied to the current wait when the server rate limits us
    pub rate_limit_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_wait: Duration::from_secs(5),
            rate_limit_multiplier: 3,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_wait: Duration, rate_limit_multiplier: u32) -> Self {
        Self {
            max_retries,
            initial_wait,
            rate_limit_multiplier: rate_limit_multiplier.max(1),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next_wait: self.initial_wait,
            rate_limit_multiplier: self.rate_limit_multiplier,
        }
    }

    /// Waits that would be applied for a sequence of failures, in order.
    ///
    /// Stops at the first permanent failure or once `max_retries` waits were produced.
    pub fn schedule(&self, failures: &[RetryableError]) -> Vec<Duration> {
        let mut backoff = self.backoff();
        failures
            .iter()
            .take(self.max_retries as usize)
            .map_while(|kind| backoff.next_delay(*kind))
            .collect()
    }
}

/// Backoff accumulator: wait, wait*2, wait*4, ...
///
/// A rate limit inflates the current wait by the multiplier and the doubling
/// continues from the inflated value.
#[derive(Debug, Clone)]
pub struct Backoff {
    next_wait: Duration,
    rate_limit_multiplier: u32,
}

impl Backoff {
    pub fn next_delay(&mut self, kind: RetryableError) -> Option<Duration> {
        let delay = match kind {
            RetryableError::Permanent => return None,
            RetryableError::Transient => self.next_wait,
            RetryableError::RateLimit => self.next_wait * self.rate_limit_multiplier,
        };
        self.next_wait = delay * 2;
        Some(delay)
    }

    pub fn peek(&self) -> Duration {
        self.next_wait
    }
}

/// Terminal failure of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("non-retryable failure on attempt {attempts}: {last}")]
    Permanent { attempts: u32, last: E },
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Permanent { last, .. } | RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn last(&self) -> &E {
        match self {
            RetryError::Permanent { last, .. } | RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Retry an async operation with doubling backoff
///
/// # Arguments
/// * `operation` - The async operation to retry (a closure returning a Future)
/// * `config` - Retry configuration
/// * `classify_error` - Function to classify errors for retry strategy
///
/// # Returns
/// * `Ok(T)` - Operation succeeded (either on first attempt or after retries)
/// * `Err(RetryError<E>)` - Permanent failure, or all retries exhausted
///
/// The loop is explicit and bounded: at most `max_retries + 1` attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    config: &RetryConfig,
    classify_error: impl Fn(&E) -> RetryableError,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = config.backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("✅ Operation succeeded after {} retry attempts", attempt - 1);
                }
                return Ok(result);
            }
            Err(e) => {
                let error_type = classify_error(&e);

                if error_type == RetryableError::Permanent {
                    error!("❌ Operation failed with non-retryable error: {}", e);
                    return Err(RetryError::Permanent {
                        attempts: attempt,
                        last: e,
                    });
                }

                if attempt > config.max_retries {
                    error!(
                        "❌ Operation failed after {} attempts (max retries exhausted): {}",
                        attempt, e
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }

                // Permanent was handled above, so a delay always exists here
                let Some(delay) = backoff.next_delay(error_type) else {
                    return Err(RetryError::Permanent {
                        attempts: attempt,
                        last: e,
                    });
                };

                warn!(
                    "⚠️  Operation failed (attempt {}/{}): {} - Retrying in {}ms (error type: {:?})",
                    attempt,
                    config.max_retries + 1,
                    e,
                    delay.as_millis(),
                    error_type
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
