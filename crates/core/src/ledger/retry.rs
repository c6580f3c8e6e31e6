//! Bounded retry for retryable ledger errors (lock timeouts).

use std::time::Duration;

use tracing::warn;

use kopa_shared::LedgerSettings;

use super::error::LedgerError;

/// Retry configuration: attempt count and linear backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&LedgerSettings::default())
    }
}

impl RetryPolicy {
    /// Builds the policy from ledger settings.
    #[must_use]
    pub fn from_settings(settings: &LedgerSettings) -> Self {
        Self {
            max_attempts: settings.retry_attempts.max(1),
            backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Runs `operation`, retrying while it fails with a retryable error.
    ///
    /// Non-retryable errors and the last retryable error are returned as-is.
    /// Blocks the calling thread between attempts.
    pub fn run<T, F>(&self, operation_name: &str, mut operation: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Result<T, LedgerError>,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        ?delay,
                        error = %err,
                        "Retrying after retryable ledger error"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> LedgerError {
        LedgerError::LockTimeout {
            resource: "account".into(),
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_retries_lock_timeouts_until_success() {
        let mut calls = 0;
        let result = quick(3).run("deposit", || {
            calls += 1;
            if calls < 3 { Err(timeout()) } else { Ok(calls) }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = quick(2).run("deposit", || {
            calls += 1;
            Err(timeout())
        });
        assert_eq!(result, Err(timeout()));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_does_not_retry_other_errors() {
        let mut calls = 0;
        let result: Result<(), _> = quick(5).run("withdraw", || {
            calls += 1;
            Err(LedgerError::Validation("bad".into()))
        });
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(50));
        assert_eq!(policy.delay(2), Duration::from_millis(100));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
