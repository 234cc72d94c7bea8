// src/storage/retry.rs
//! Exponential-backoff retry for transient storage failures.

use std::time::Duration;

use crate::error::Result;
use crate::log_debug;

/// Retry policy for one storage interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_base: f64,
    /// Ceiling for the per-attempt delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_base: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors (`BlobNotFound`, `PermissionDenied`,
/// `InvalidFormat`, semantic errors) propagate immediately; transient ones
/// (`Io`, `QuotaExceeded`) are retried up to the policy's attempt budget.
pub fn with_retries<T, F>(policy: &RetryPolicy, description: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delay = policy.initial_delay;
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                log_debug!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    description,
                    attempt,
                    attempts,
                    delay,
                    err
                );
                std::thread::sleep(delay);
                delay = delay.mul_f64(policy.backoff_base).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("retry loop always returns")
}
