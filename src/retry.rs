//! Bounded retry with exponential backoff and jitter
//!
//! Operations classify their own failures as [`Failure::Retryable`] or
//! [`Failure::Permanent`]; [`with_retry`] drives the attempts and reports
//! either the value or why it gave up.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::IngestError;
use crate::metrics;

/// Retry policy for one class of outbound call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Fraction of the delay added as random jitter
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy for resolving a file reference to a remote path
    #[must_use]
    pub fn metadata() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            backoff_factor: 1.5,
            ..Self::default()
        }
    }

    /// Policy for fetching binary content
    #[must_use]
    pub fn download() -> Self {
        Self {
            max_retries: 7,
            base_delay_ms: 1000,
            backoff_factor: 1.8,
            ..Self::default()
        }
    }

    /// Policy for object-storage uploads
    #[must_use]
    pub fn upload() -> Self {
        Self::default()
    }

    /// Policy that retries immediately; used by tests
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
            jitter_ratio: 0.0,
        }
    }

    /// Delay before retry number `retry` (1-based), jitter excluded
    #[must_use]
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let millis = (self.base_delay_ms as f64) * self.backoff_factor.powi(exponent);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let capped = millis.min(self.max_delay_ms as f64).max(0.0) as u64;
        Duration::from_millis(capped)
    }

    /// Delay before retry number `retry` with random jitter applied
    #[must_use]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = self.base_delay_for(retry);
        if self.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let fraction = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        base + base.mul_f64(fraction)
    }
}

/// Outcome of a single failed attempt
#[derive(Debug)]
pub enum Failure {
    /// Worth trying again
    Retryable(IngestError),
    /// Retrying cannot help
    Permanent(IngestError),
}

impl Failure {
    /// Classify an error by its kind
    #[must_use]
    pub fn classify(err: IngestError) -> Self {
        if err.is_transient() {
            Self::Retryable(err)
        } else {
            Self::Permanent(err)
        }
    }
}

/// Why [`with_retry`] gave up
#[derive(Debug)]
pub enum RetryError {
    /// Every allowed attempt failed with a retryable error
    Exhausted {
        /// Attempts made, first one included
        attempts: u32,
        /// Error from the final attempt
        last_error: IngestError,
    },
    /// An attempt failed permanently
    Permanent(IngestError),
}

impl RetryError {
    /// The underlying error
    #[must_use]
    pub fn into_inner(self) -> IngestError {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Permanent(err) => err,
        }
    }
}

impl From<RetryError> for IngestError {
    fn from(err: RetryError) -> Self {
        err.into_inner()
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy runs out.
///
/// `op` is called at most `max_retries + 1` times; a permanent failure stops
/// after the attempt that produced it.
pub async fn with_retry<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut op: F) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        metrics::record_retry_attempt(operation);
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(Failure::Permanent(err)) => {
                warn!(operation, attempt, error = %err, "Permanent failure, not retrying");
                return Err(RetryError::Permanent(err));
            }
            Err(Failure::Retryable(err)) => {
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, error = %err, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                debug!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
