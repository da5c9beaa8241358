//! Bounded retry driver.
//!
//! Each attempt produces an [`Attempt`]: either a success value or a
//! classified [`AttemptFailure`]. [`RetryPolicy::run`] loops over attempts
//! until one succeeds or the budget is spent; it never retries indefinitely.

use std::future::Future;
use std::time::Duration;

/// Default number of attempts per logical call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Default multiplier applied to the delay after each retry.
pub const DEFAULT_BACKOFF: f64 = 2.0;

/// Upper bound on the delay between two attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Status code if the server answered.
    pub status: Option<u16>,

    /// Response body if the server answered.
    pub body: Option<String>,

    /// Error text (status reason or transport error).
    pub error: String,
}

impl AttemptFailure {
    /// A failure where the server answered with a non-2xx status.
    pub fn status(status: u16, body: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: Some(body.into()),
            error: error.into(),
        }
    }

    /// A failure below HTTP (connect, TLS, timeout, body read).
    pub fn transport(error: impl Into<String>) -> Self {
        Self {
            status: None,
            body: None,
            error: error.into(),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Failed(AttemptFailure),
}

/// Result of a retried call: the value or the last failure, along with the
/// number of attempts spent.
pub type RetryOutcome<T> = Result<(T, u32), (AttemptFailure, u32)>;

/// Retry budget and delay schedule for a single logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,

    /// Delay before the first retry. Acts as a floor for later delays.
    pub delay: Duration,

    /// Multiplier applied per retry; `1.0` keeps the delay fixed.
    pub backoff: f64,

    /// Ceiling for the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            backoff: DEFAULT_BACKOFF,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: 1.0,
            max_delay: delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff.max(1.0).powi(exponent);
        let ceiling = self.max_delay.max(self.delay);
        Duration::try_from_secs_f64(self.delay.as_secs_f64() * factor)
            .map_or(ceiling, |delay| delay.clamp(self.delay, ceiling))
    }

    /// Drive `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Attempt::Success(value) => return Ok((value, attempt)),
                Attempt::Failed(failure) if attempt >= max_attempts => {
                    return Err((failure, attempt));
                }
                Attempt::Failed(failure) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        status = ?failure.status,
                        "attempt failed, retrying in {:?}: {}",
                        delay,
                        failure.error
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
