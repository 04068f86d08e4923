//! Bounded retry with an escalating per-attempt timeout.
//!
//! Both remote collaborators share this policy. Each call site supplies a
//! classify function that maps its error type onto a [`RetryAction`]:
//!
//! - `Escalate`: transient (timeout-class). Retry with the timeout raised by
//!   one step; give up once the next timeout would exceed the cap.
//! - `Repeat`: remote refused (e.g. HTTP 5xx). Retry with the same timeout,
//!   up to `max_repeats` times.
//! - `Abort`: stop immediately.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Escalate,
    Repeat,
    Abort,
}

/// Why [`RetryPolicy::run`] gave up
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Classified as non-retryable
    #[error("{0}")]
    Aborted(E),

    /// Retry budget spent; carries the last error
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted(e) => e,
            RetryError::Exhausted { source, .. } => source,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Timeout for the first attempt
    pub initial_timeout: Duration,
    /// Added to the timeout after each escalating failure
    pub timeout_step: Duration,
    /// Largest timeout an attempt may use
    pub max_timeout: Duration,
    /// Same-timeout retries allowed for `Repeat` failures
    pub max_repeats: u32,
    /// Pause before a `Repeat` retry
    pub repeat_delay: Duration,
}

impl RetryPolicy {
    /// Exchange-rate service: 0.1s, 0.2s, 0.3s; five retries on HTTP errors
    pub fn rate_service() -> Self {
        Self {
            initial_timeout: Duration::from_millis(100),
            timeout_step: Duration::from_millis(100),
            max_timeout: Duration::from_millis(300),
            max_repeats: 5,
            repeat_delay: Duration::from_millis(200),
        }
    }

    /// Spreadsheet reads: 1s, 1.5s, 2s; API errors are never repeated
    pub fn sheet_source() -> Self {
        Self {
            initial_timeout: Duration::from_secs(1),
            timeout_step: Duration::from_millis(500),
            max_timeout: Duration::from_secs(2),
            max_repeats: 0,
            repeat_delay: Duration::ZERO,
        }
    }

    pub fn with_repeat_delay(mut self, delay: Duration) -> Self {
        self.repeat_delay = delay;
        self
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// The operation receives the timeout to apply to this attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
        classify: impl Fn(&E) -> RetryAction,
    ) -> Result<T, RetryError<E>>
    where
        E: std::fmt::Display,
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut timeout = self.initial_timeout;
        let mut attempts = 0u32;
        let mut repeats = 0u32;

        loop {
            attempts += 1;
            let error = match operation(timeout).await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(
                            "Operation '{}' succeeded after {} attempts",
                            operation_name,
                            attempts
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            match classify(&error) {
                RetryAction::Abort => {
                    tracing::debug!(
                        "Operation '{}' failed with non-retryable error: {}",
                        operation_name,
                        error
                    );
                    return Err(RetryError::Aborted(error));
                }
                RetryAction::Escalate => {
                    let next = timeout + self.timeout_step;
                    if self.timeout_step.is_zero() || next > self.max_timeout {
                        return Err(RetryError::Exhausted {
                            attempts,
                            source: error,
                        });
                    }
                    tracing::debug!(
                        "Operation '{}' timed out after {:?} (attempt {}), retrying with {:?}",
                        operation_name,
                        timeout,
                        attempts,
                        next
                    );
                    timeout = next;
                }
                RetryAction::Repeat => {
                    if repeats >= self.max_repeats {
                        return Err(RetryError::Exhausted {
                            attempts,
                            source: error,
                        });
                    }
                    repeats += 1;
                    tracing::debug!(
                        "Operation '{}' failed (attempt {}), repeating in {:?}: {}",
                        operation_name,
                        attempts,
                        self.repeat_delay,
                        error
                    );
                    if !self.repeat_delay.is_zero() {
                        sleep(self.repeat_delay).await;
                    }
                }
            }
        }
    }
}
