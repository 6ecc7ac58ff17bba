// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! The delay before attempt `n` (n >= 2) is `base × growth^(n−1)`, capped at
//! `max_delay`, then perturbed by a uniform ±`jitter` fraction so concurrent
//! callers do not retry in lockstep. Overload responses raise the pre-jitter
//! delay to `exhausted_floor`. Within one run a delay is never shorter than
//! the one before it.
//!
//! # Example
//!
//! ```
//! use material_resolver::RetryConfig;
//! use std::time::Duration;
//!
//! let query = RetryConfig::query();
//! assert_eq!(query.max_attempts, 3);
//!
//! // Second attempt waits base × growth, before jitter
//! assert_eq!(query.backoff(2), Duration::from_millis(400));
//! ```

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::network::{AlwaysOnline, NetworkStatusProvider};
use super::notify::NotificationThrottle;
use crate::error::{ErrorCategory, FetchError};

/// Backoff parameters.
///
/// [`RetryConfig::query()`] is the quick schedule for individual backing
/// store queries; the resolver derives its own from `ResolverConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Multiplier per attempt (>= 1.0)
    pub growth: f64,
    /// Cap on the pre-jitter delay
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay (0.15 = ±15%)
    pub jitter: f64,
    /// Minimum pre-jitter delay after a resource-exhausted response
    pub exhausted_floor: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Quick retry for individual queries (don't block the resolver).
    /// 3 attempts; if they fail the strategy is recorded as failed.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            growth: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: 0.15,
            exhausted_floor: Duration::from_secs(2),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            growth: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: 0.15,
            exhausted_floor: Duration::from_millis(5),
        }
    }

    /// Pre-jitter delay before attempt `attempt` (1-based). Zero for the first attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.growth.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64()).max(0.0);
        secs_to_duration(capped)
    }

    /// Delay before attempt `attempt` given the category of the last failure
    /// and a jitter sample `unit` in `[-1.0, 1.0]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, category: ErrorCategory, unit: f64) -> Duration {
        let mut delay = self.backoff(attempt);
        if category == ErrorCategory::ResourceExhausted {
            delay = delay.max(self.exhausted_floor.min(self.max_delay));
        }
        let unit = if unit.is_finite() { unit.clamp(-1.0, 1.0) } else { 0.0 };
        let scale = 1.0 + self.jitter.clamp(0.0, 1.0) * unit;
        secs_to_duration(delay.as_secs_f64() * scale)
    }

    /// Delay before attempt `attempt`, never shorter than `previous`.
    ///
    /// Keeps a retry sequence non-decreasing when jitter or the
    /// resource-exhausted floor would otherwise shrink the next delay.
    #[must_use]
    pub fn next_delay(&self, attempt: u32, category: ErrorCategory, unit: f64, previous: Duration) -> Duration {
        self.delay_for(attempt, category, unit)
            .max(previous)
            .min(self.max_jittered_delay())
    }

    /// Upper bound any jittered delay can reach.
    #[must_use]
    pub fn max_jittered_delay(&self) -> Duration {
        secs_to_duration(self.max_delay.as_secs_f64() * (1.0 + self.jitter.clamp(0.0, 1.0)))
    }
}

/// Nanosecond-rounded conversion (float error must not shave a nanosecond).
fn secs_to_duration(secs: f64) -> Duration {
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((secs * 1e9).round() as u64)
}

/// Runs fallible operations under a [`RetryConfig`].
///
/// The policy checks an injected [`NetworkStatusProvider`] before every
/// attempt and offers each failure to a [`NotificationThrottle`]. Throttled
/// notifications never change the number of attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    network: Arc<dyn NetworkStatusProvider>,
    notifications: Arc<NotificationThrottle>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            network: Arc::new(AlwaysOnline),
            notifications: Arc::new(NotificationThrottle::default()),
        }
    }

    #[must_use]
    pub fn with_network_status(mut self, network: Arc<dyn NetworkStatusProvider>) -> Self {
        self.network = network;
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, notifications: Arc<NotificationThrottle>) -> Self {
        self.notifications = notifications;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationThrottle> {
        &self.notifications
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out.
    ///
    /// Returns the last error when every attempt fails.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        let mut previous = Duration::ZERO;

        loop {
            if !self.network.is_online() {
                let err = FetchError::Offline;
                self.notifications.notify(err.category(), &err.to_string());
                debug!(operation = operation_name, "Network not viable, skipping attempt");
                return Err(err);
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = operation_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let category = err.category();
                    crate::metrics::record_attempt_failure(operation_name, category.as_str());
                    self.notifications.notify(category, &err.to_string());

                    if !err.is_retryable() {
                        debug!(operation = operation_name, attempt, error = %err, "Terminal failure, not retrying");
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }

                    attempt += 1;
                    let unit = rand::rng().random_range(-1.0..=1.0);
                    let delay = self.config.next_delay(attempt, category, unit, previous);
                    previous = delay;
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempt - 1,
                        max_attempts,
                        err,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
