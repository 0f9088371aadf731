//! Retry logic with exponential backoff
//!
//! This module provides the bounded retry loop used by the fetch worker.
//! The delay before retry `n` (1-based) is `initial_delay * backoff_multiplier^(n-1)`,
//! capped at `max_delay`, with optional jitter. A cancellation signal that fires while
//! the loop is waiting out a backoff abandons the operation.
//!
//! # Example
//!
//! ```no_run
//! use wbw_audio_dl::retry::{IsRetryable, RetryOutcome, run_with_retry};
//! use wbw_audio_dl::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let outcome = run_with_retry(&config, &cancel, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! assert!(matches!(outcome, RetryOutcome::Succeeded { attempts: 1, .. }));
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{ErrorKind, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, server errors) should return `true`.
/// Permanent failures (missing resources, local write errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ErrorKind {
    fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::Timeout | ErrorKind::Connection => true,
            // 5xx is the server's problem and may clear up; 4xx will not
            ErrorKind::HttpStatus(code) => (500..600).contains(code),
            // Local write failures are fatal to the task
            ErrorKind::Io => false,
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Terminal state of a retried operation
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on attempt number `attempts`
    Succeeded {
        /// The operation's output
        value: T,
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// Retry budget exhausted or a non-retryable error
    Failed {
        /// The last error observed
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// Cancellation fired while waiting to retry
    Cancelled {
        /// Attempts made before cancellation
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Failed { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Delay before retry number `retry` (1-based), before jitter
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    if retry == 0 || config.initial_delay.is_zero() {
        return Duration::ZERO;
    }
    let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    // f64::min drops NaN and clamps infinity to the cap
    Duration::from_secs_f64(secs.min(config.max_delay.as_secs_f64()))
}

/// Execute an async operation with bounded exponential backoff
///
/// The operation receives the 1-based attempt number. It is attempted at most
/// `1 + config.max_retries` times. An attempt that has started is always
/// allowed to finish; cancellation is only observed during backoff waits.
pub async fn run_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "operation succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(attempts = attempt, "cancelled during backoff");
                        return RetryOutcome::Cancelled { attempts: attempt };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Giving up after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, attempts = attempt, "non-retryable error");
                }
                return RetryOutcome::Failed {
                    error: e,
                    attempts: attempt,
                };
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
