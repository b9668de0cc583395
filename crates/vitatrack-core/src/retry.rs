//! Retry with exponential backoff
//!
//! Delays grow as `base_delay_ms * multiplier^attempt`, capped at
//! `max_delay_ms`. With jitter enabled the delays come from a randomized
//! `backoff::ExponentialBackoff` instead.

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::{is_retryable, NormalizedError};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomize delays to spread out retries from many clients
    pub jitter: bool,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: false,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, millis: u64) -> Self {
        self.base_delay_ms = millis;
        self
    }

    pub fn with_max_delay(mut self, millis: u64) -> Self {
        self.max_delay_ms = millis;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Randomized backoff used when jitter is enabled
    pub fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.base_delay_ms),
            max_interval: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        };
        if !self.jitter {
            backoff.randomization_factor = 0.0;
        }
        backoff
    }
}

/// Decision on whether to retry a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    NoRetry,
}

/// Tracks attempts for one retried operation
#[derive(Debug)]
pub struct RetryHandler {
    policy: RetryPolicy,
    attempts: u32,
    backoff: Option<ExponentialBackoff>,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = policy.jitter.then(|| policy.create_backoff());
        Self {
            policy,
            attempts: 0,
            backoff,
        }
    }

    /// Decide given whether the last failure is retryable
    pub fn next(&mut self, retryable: bool) -> RetryDecision {
        if self.attempts >= self.policy.max_retries || !retryable {
            return RetryDecision::NoRetry;
        }

        let delay = match self.backoff.as_mut() {
            Some(backoff) => backoff
                .next_backoff()
                .unwrap_or(Duration::from_millis(self.policy.max_delay_ms)),
            None => self.policy.delay_for(self.attempts),
        };
        self.attempts += 1;
        RetryDecision::Retry { delay }
    }

    /// Retries scheduled so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of retries
pub async fn retry<F, Fut, T>(operation: F, policy: &RetryPolicy) -> Result<T, NormalizedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NormalizedError>>,
{
    retry_with(operation, policy, is_retryable).await
}

/// [`retry`] with a caller-supplied retryability predicate
pub async fn retry_with<F, Fut, T, E, P>(
    mut operation: F,
    policy: &RetryPolicy,
    predicate: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut handler = RetryHandler::new(policy.clone());

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => match handler.next(predicate(&error)) {
                RetryDecision::Retry { delay } => {
                    log::warn!(
                        "Request failed (attempt {}), retrying after {:?}: {}",
                        handler.attempts(),
                        delay,
                        error
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::NoRetry => {
                    log::error!(
                        "Request failed after {} attempts, not retrying: {}",
                        handler.attempts() + 1,
                        error
                    );
                    return Err(error);
                }
            },
        }
    }
}
