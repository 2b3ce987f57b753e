//! Resilient invocation of external-service calls.
//!
//! [`ResilientInvoker::invoke`] runs a call, and on failure consults the
//! [`ErrorKind`](crate::error::ErrorKind) of the returned [`ServiceError`]:
//!
//! - `RateLimit` / `Transient` → sleep and try again
//! - `Quota` / `Other` → return the error immediately
//!
//! # Backoff
//!
//! Retry `n` (1-based) waits `min(base × 2^(n-1), max)` plus a uniformly
//! random jitter in `[0, jitter]`. With the defaults that is 500ms, 1s, 2s,
//! 4s (+ up to 250ms each) over at most 4 retries, i.e. 5 attempts in total.
//! When the budget is exhausted the last error is returned unchanged.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ServiceError;
use crate::observer::{PipelineEvent, PipelineObserver};

/// Backoff parameters for retryable failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8000),
            jitter: Duration::from_millis(250),
            max_retries: 4,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_retries: config.max_retries,
        }
    }

    /// A policy that retries immediately. Useful for tests and offline tools.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            max_retries,
        }
    }

    /// Deterministic part of the delay before retry `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Full delay before retry `retry`, including random jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        self.backoff(retry) + jitter
    }
}

/// Wraps external calls with classification-driven retry.
#[derive(Debug, Clone, Default)]
pub struct ResilientInvoker {
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the retry budget runs out.
    ///
    /// `service` labels the call in [`PipelineEvent::RetryScheduled`] events.
    pub async fn invoke<T, F, Fut>(
        &self,
        service: &str,
        observer: &dyn PipelineObserver,
        mut call: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut retries = 0u32;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.kind.is_retryable() || retries >= self.policy.max_retries {
                return Err(err);
            }

            retries += 1;
            let delay = self.policy.delay(retries);
            observer.report(PipelineEvent::RetryScheduled {
                service: service.to_string(),
                attempt: retries,
                delay,
                kind: err.kind,
            });
            tokio::time::sleep(delay).await;
        }
    }
}
