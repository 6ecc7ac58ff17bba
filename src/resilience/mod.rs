//! Resilience primitives: retry with backoff, circuit breakers, network
//! viability and throttled user-facing notifications.

pub mod circuit_breaker;
pub mod network;
pub mod notify;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, EndpointCircuits};
pub use network::{AlwaysOnline, ManualNetworkStatus, NetworkStatusProvider};
pub use notify::{ErrorNotifier, NotificationThrottle, TracingNotifier};
pub use retry::{RetryConfig, RetryPolicy};
