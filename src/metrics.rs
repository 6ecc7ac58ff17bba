// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for material-resolver.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `material_resolver_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: cache, network, fallback
//! - `strategy`: primary_table, precomputed_view, ...
//! - `endpoint`: backing-store table or view
//! - `status`: success, failure, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════════════════════

/// Record a completed resolution and the tier that served it
pub fn record_resolution(tier: &str, degraded: bool) {
    counter!(
        "material_resolver_resolutions_total",
        "tier" => tier.to_string(),
        "degraded" => degraded.to_string()
    )
    .increment(1);
}

/// Record the outcome of one network attempt (full strategy chain run)
pub fn record_network_attempt(outcome: &str) {
    counter!(
        "material_resolver_network_attempts_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a network attempt skipped because of the failure cooldown
pub fn record_cooldown_skip() {
    counter!("material_resolver_cooldown_skips_total").increment(1);
}

/// Record a batch resolution that exceeded its caller deadline
pub fn record_deadline_exceeded() {
    counter!("material_resolver_deadline_exceeded_total").increment(1);
}

/// Set whether the resolver is currently serving degraded data
pub fn set_degraded(degraded: bool) {
    gauge!("material_resolver_degraded").set(if degraded { 1.0 } else { 0.0 });
}

/// Record a record synthesized for an unresolved identifier
pub fn record_synthesized(category: &str) {
    counter!(
        "material_resolver_synthesized_total",
        "category" => category.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache read (fresh, stale, empty)
pub fn record_cache_lookup(result: &str) {
    counter!(
        "material_resolver_cache_lookups_total",
        "result" => result.to_string()
    )
    .increment(1);
}

/// Set the number of records in the current snapshot
pub fn set_cache_records(count: usize) {
    gauge!("material_resolver_cache_records").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// Strategies
// ═══════════════════════════════════════════════════════════════════════════

/// Record one strategy execution
pub fn record_strategy_call(strategy: &str, status: &str) {
    counter!(
        "material_resolver_strategy_calls_total",
        "strategy" => strategy.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record strategy latency
pub fn record_latency(stage: &str, operation: &str, duration: Duration) {
    histogram!(
        "material_resolver_operation_seconds",
        "stage" => stage.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows a strategy could not decode
pub fn record_rows_rejected(strategy: &str, count: usize) {
    counter!(
        "material_resolver_rows_rejected_total",
        "strategy" => strategy.to_string()
    )
    .increment(count as u64);
}

/// Record records dropped as cross-strategy duplicates
pub fn record_duplicates_dropped(count: usize) {
    counter!("material_resolver_duplicates_dropped_total").increment(count as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// Retry, circuit breakers, notifications
// ═══════════════════════════════════════════════════════════════════════════

/// Record a failed attempt by error category
pub fn record_attempt_failure(operation: &str, category: &str) {
    counter!(
        "material_resolver_attempt_failures_total",
        "operation" => operation.to_string(),
        "category" => category.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "material_resolver_circuit_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a notification offered to the throttle
pub fn record_notification(category: &str, forwarded: bool) {
    let status = if forwarded { "sent" } else { "suppressed" };
    counter!(
        "material_resolver_notifications_total",
        "category" => category.to_string(),
        "status" => status
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════════

/// Set active operations for one endpoint
pub fn set_scheduler_active(endpoint: &str, count: usize) {
    gauge!(
        "material_resolver_scheduler_active",
        "endpoint" => endpoint.to_string()
    )
    .set(count as f64);
}

/// Set queued tickets across all tiers
pub fn set_scheduler_queued(count: usize) {
    gauge!("material_resolver_scheduler_queued").set(count as f64);
}

/// Record how long a ticket waited before dispatch
pub fn record_ticket_wait(priority: &str, waited: Duration) {
    histogram!(
        "material_resolver_ticket_wait_seconds",
        "priority" => priority.to_string()
    )
    .record(waited.as_secs_f64());
}

/// Record a scheduled operation that hit its deadline
pub fn record_ticket_timeout(endpoint: &str, stage: &str) {
    counter!(
        "material_resolver_ticket_timeouts_total",
        "endpoint" => endpoint.to_string(),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    stage: &'static str,
    operation: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(stage: &'static str, operation: impl Into<String>) -> Self {
        Self {
            stage,
            operation: operation.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.stage, &self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($stage:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($stage, $op)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // These verify the API doesn't panic without an installed recorder.

    #[test]
    fn test_resolution_metrics() {
        record_resolution("cache", false);
        record_resolution("fallback", true);
        record_network_attempt("success");
        record_network_attempt("total_failure");
        record_cooldown_skip();
        record_deadline_exceeded();
        set_degraded(true);
        record_synthesized("Steel");
    }

    #[test]
    fn test_cache_and_strategy_metrics() {
        record_cache_lookup("fresh");
        set_cache_records(120);
        record_strategy_call("primary_table", "success");
        record_rows_rejected("backup_table", 2);
        record_duplicates_dropped(5);
    }

    #[test]
    fn test_resilience_metrics() {
        record_attempt_failure("primary_table", "network");
        record_circuit_call("materials", "rejected");
        record_notification("offline", false);
    }

    #[test]
    fn test_scheduler_metrics() {
        set_scheduler_active("materials", 3);
        set_scheduler_queued(7);
        record_ticket_wait("high", Duration::from_millis(12));
        record_ticket_timeout("materials_backup", "queued");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = crate::time_operation!("strategy", "primary_table");
            std::thread::sleep(Duration::from_micros(10));
        }
        // Timer recorded on drop
    }
}
