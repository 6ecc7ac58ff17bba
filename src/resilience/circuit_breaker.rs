// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breakers per backing store endpoint, using the recloser crate.
//!
//! A query surface that keeps failing trips its breaker; further calls are
//! rejected immediately so the strategy chain moves on without spending
//! retries on it. After `open_wait` a few probe calls decide whether to close.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Surface unhealthy, requests fail fast without attempting
//! - HalfOpen: Probing whether the surface recovered

use dashmap::DashMap;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Failure rate (0.0 - 1.0) over the closed window that trips the circuit
    pub failure_rate: f32,
    /// Number of recent calls evaluated while closed
    pub window: usize,
    /// Number of probe calls evaluated while half-open
    pub probe_calls: usize,
    /// How long to stay open before probing
    pub open_wait: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.5,
            window: 10,
            probe_calls: 2,
            open_wait: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_rate: 0.5,
            window: 2,
            probe_calls: 1,
            open_wait: Duration::from_millis(50),
        }
    }
}

/// A named circuit breaker with call accounting
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.failure_rate.clamp(0.0, 1.0))
            .closed_len(config.window.max(1))
            .half_open_len(config.probe_calls.max(1))
            .open_wait(config.open_wait)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a fetch through the breaker.
    ///
    /// A rejected call becomes [`FetchError::CircuitOpen`], which the retry
    /// policy treats as terminal.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call(f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                crate::metrics::record_circuit_call(&self.name, "rejected");
                Err(FetchError::CircuitOpen { endpoint: self.name.clone() })
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, error = %e, "Circuit call failed");
                crate::metrics::record_circuit_call(&self.name, "failure");
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Lazily created breakers keyed by endpoint.
pub struct EndpointCircuits {
    config: CircuitConfig,
    circuits: DashMap<String, Arc<CircuitBreaker>>,
}

impl EndpointCircuits {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Breaker for `endpoint`, created on first use.
    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.circuits.get(endpoint) {
            return existing.value().clone();
        }
        self.circuits
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, &self.config)))
            .value()
            .clone()
    }

    /// Total rejections across all endpoints.
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.circuits.iter().map(|c| c.value().rejections()).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}

impl Default for EndpointCircuits {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
