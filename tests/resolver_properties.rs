//! End-to-end behavioural guarantees of the material resolver.
//!
//! Everything here runs against the in-memory backing store; no external
//! services are needed.
//!
//! ```bash
//! cargo test --test resolver_properties
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use material_resolver::{
    BackingError, ErrorCategory, FallbackProvider, FetchStrategy, InMemoryBackingStore, ManualClock,
    MaterialResolver, Priority, RequestScheduler, ResolutionTier, ResolverConfig, RetryConfig, Row,
    SchedulerConfig, TableStrategy,
};

// =============================================================================
// Helpers
// =============================================================================

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object literal")
}

fn material_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            row(json!({
                "material_id": format!("m-{i}"),
                "material_name": format!("Material {i}"),
                "carbon_factor": 0.25 + i as f64 / 100.0,
                "category": "Concrete",
            }))
        })
        .collect()
}

/// Small delays so failing paths finish quickly.
fn fast_config() -> ResolverConfig {
    ResolverConfig {
        retry_base_ms: 1,
        retry_max_delay_ms: 5,
        retry_exhausted_floor_ms: 2,
        ..ResolverConfig::default()
    }
}

fn resolver_with(store: Arc<InMemoryBackingStore>, config: ResolverConfig, clock: Arc<ManualClock>) -> MaterialResolver {
    MaterialResolver::builder(store)
        .config(config)
        .clock(clock)
        .build()
        .expect("valid config")
}

// =============================================================================
// Totality
// =============================================================================

#[tokio::test]
async fn test_resolve_is_total_for_known_and_unknown_ids() {
    let store = Arc::new(InMemoryBackingStore::new());
    store.set_rows("materials", material_rows(60));
    let resolver = resolver_with(store.clone(), fast_config(), Arc::new(ManualClock::new(0)));

    let ids = ["m-1", "steel", "unknown-xyz", "", "   ", "Ünïcödé béton", "m-999", "CONCRETE"];
    for id in ids {
        let record = resolver.resolve(id).await;
        assert!(record.factor >= 0.0 && record.factor.is_finite(), "{id:?}: {}", record.factor);
        assert!(!record.name.is_empty(), "{id:?} resolved without a name");
    }

    // Same guarantee with the store gone
    store.fail_always(BackingError::Network("connection reset".into()));
    resolver.refresh(true).await;
    for id in ids {
        let record = resolver.resolve(id).await;
        assert!(record.factor >= 0.0);
        assert!(!record.name.is_empty());
    }
}

// =============================================================================
// Cache idempotence
// =============================================================================

#[tokio::test]
async fn test_cache_idempotence_within_ttl() {
    let store = Arc::new(InMemoryBackingStore::new());
    store.set_rows("materials", material_rows(60));
    let clock = Arc::new(ManualClock::new(0));
    let resolver = resolver_with(store.clone(), fast_config(), clock.clone());

    let first = resolver.resolve("m-42").await;
    let calls = store.calls();

    clock.advance(Duration::from_secs(600));
    let second = resolver.resolve("m-42").await;

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(store.calls(), calls);
}

// =============================================================================
// Concurrency bound
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduler_respects_global_and_endpoint_ceilings() {
    let scheduler = RequestScheduler::new(SchedulerConfig {
        global_limit: 4,
        per_endpoint_limit: 2,
        max_queued: None,
    });

    let in_flight = Arc::new(AtomicUsize::new(0));
    let observed_peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..90 {
        let scheduler = scheduler.clone();
        let in_flight = in_flight.clone();
        let observed_peak = observed_peak.clone();
        let endpoint = ["materials", "material_factors_view", "materials_backup"][i % 3];
        handles.push(tokio::spawn(async move {
            scheduler
                .submit(endpoint, Priority::Normal, Duration::from_secs(30), move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    observed_peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = scheduler.stats();
    assert!(stats.peak_active <= 4, "global peak {}", stats.peak_active);
    assert!(observed_peak.load(Ordering::SeqCst) <= 4);
    for (endpoint, peak) in &stats.peak_by_endpoint {
        assert!(*peak <= 2, "{endpoint} peaked at {peak}");
    }
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queued, 0);
}

// =============================================================================
// Priority ordering
// =============================================================================

#[tokio::test]
async fn test_high_priority_overtakes_queued_normal_tickets() {
    let scheduler = RequestScheduler::new(SchedulerConfig {
        global_limit: 1,
        per_endpoint_limit: 1,
        max_queued: None,
    });
    let order = Arc::new(Mutex::new(Vec::new()));

    // Saturate
    let blocker = scheduler.acquire("materials", Priority::Normal).await.unwrap();

    let mut handles = Vec::new();
    for (label, priority) in [
        ("n1", Priority::Normal),
        ("n2", Priority::Normal),
        ("h", Priority::High),
        ("n3", Priority::Normal),
    ] {
        let scheduler = scheduler.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            scheduler
                .submit("materials", priority, Duration::from_secs(5), move || async move {
                    order.lock().push(label);
                    Ok::<_, ()>(())
                })
                .await
        }));
        // Let the ticket reach the queue before the next one
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(scheduler.stats().queued, 4);

    drop(blocker);
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(*order.lock(), vec!["h", "n1", "n2", "n3"]);
}

// =============================================================================
// Backoff growth
// =============================================================================

#[test]
fn test_backoff_is_non_decreasing_and_bounded() {
    let config = RetryConfig {
        max_attempts: 12,
        base_delay: Duration::from_millis(100),
        growth: 2.0,
        max_delay: Duration::from_secs(3),
        jitter: 0.15,
        exhausted_floor: Duration::from_secs(1),
    };
    let ceiling = config.max_delay.mul_f64(1.15);
    assert!(config.max_jittered_delay() <= ceiling + Duration::from_nanos(1));

    let mut previous = Duration::ZERO;
    for attempt in 1..=config.max_attempts {
        let delay = config.backoff(attempt);
        assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
        assert!(delay <= config.max_delay);
        previous = delay;

        for unit in [-1.0, -0.3, 0.0, 0.7, 1.0] {
            for category in [ErrorCategory::Network, ErrorCategory::ResourceExhausted] {
                let jittered = config.delay_for(attempt, category, unit);
                assert!(jittered <= config.max_jittered_delay(), "{jittered:?}");
            }
        }
    }
    assert_eq!(previous, config.max_delay);
}

// =============================================================================
// Fallback guarantee
// =============================================================================

#[tokio::test]
async fn test_fallback_guarantee_under_total_failure() {
    let store = Arc::new(InMemoryBackingStore::new());
    store.fail_always(BackingError::Network("connection refused".into()));
    let resolver = resolver_with(store, fast_config(), Arc::new(ManualClock::new(0)));

    let resolved = resolver.resolve_many(["concrete", "steel", "unknown-xyz"]).await;
    assert_eq!(resolved.len(), 3);

    let defaults = FallbackProvider::new();
    assert_eq!(resolved["concrete"], defaults.lookup("concrete").unwrap());
    assert_eq!(resolved["steel"], defaults.lookup("steel").unwrap());

    for record in resolved.values() {
        assert!(record.is_degraded());
        assert!(record.factor >= 0.0);
        assert!(!record.name.is_empty());
    }
    assert_eq!(resolved["unknown-xyz"].name, "Unknown Xyz");

    let stats = resolver.stats();
    assert!(stats.degraded);
    assert_eq!(stats.last_tier, Some(ResolutionTier::Fallback));
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn test_first_strategy_wins_on_duplicate_id() {
    let store = Arc::new(InMemoryBackingStore::new());
    store.set_rows(
        "primary",
        vec![row(json!({"id": "m-1", "name": "Concrete C30", "factor": 0.14, "score": 62}))],
    );
    store.set_rows(
        "secondary",
        vec![
            row(json!({"id": "m-1", "name": "Concrete C30", "factor": 0.14, "score": 18})),
            row(json!({"id": "m-2", "name": "Glulam", "factor": 0.5})),
        ],
    );

    let strategies: Vec<Arc<dyn FetchStrategy>> = vec![
        Arc::new(TableStrategy::new("primary", "primary")),
        Arc::new(TableStrategy::new("secondary", "secondary")),
    ];
    let resolver = MaterialResolver::builder(store)
        .config(ResolverConfig { min_record_count: 1, ..fast_config() })
        .strategies(strategies)
        .build()
        .unwrap();

    let all = resolver.resolve_all().await;
    let m1: Vec<_> = all.iter().filter(|r| r.id == "m-1").collect();
    assert_eq!(m1.len(), 1);
    assert_eq!(m1[0].sustainability_score, 62);
    assert_eq!(all.len(), 2);
}

// =============================================================================
// TTL scenario
// =============================================================================

#[tokio::test]
async fn test_ttl_scenario() {
    let store = Arc::new(InMemoryBackingStore::new());
    store.set_rows("materials", material_rows(120));
    let clock = Arc::new(ManualClock::new(0));
    let config = ResolverConfig { cache_ttl_secs: 900, ..fast_config() };
    let resolver = resolver_with(store.clone(), config, clock.clone());

    // t = 0
    resolver.resolve("m-0").await;
    let at_zero = resolver.resolve_all().await;
    assert_eq!(at_zero.len(), 120);
    assert_eq!(resolver.stats().network_attempts, 1);
    let calls = store.calls();

    // t = 500
    clock.set(500_000);
    let at_500 = resolver.resolve_all().await;
    assert_eq!(at_500, at_zero);
    assert_eq!(store.calls(), calls);
    assert_eq!(resolver.stats().network_attempts, 1);

    // t = 1000
    clock.set(1_000_000);
    resolver.resolve("m-0").await;
    assert_eq!(resolver.stats().network_attempts, 2);
    assert!(store.calls() > calls);

    resolver.resolve("m-0").await;
    assert_eq!(resolver.stats().network_attempts, 2);
}

// =============================================================================
// Concurrent misses share one network attempt
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_single_flight() {
    let store = Arc::new(InMemoryBackingStore::new());
    store.set_rows("materials", material_rows(80));
    store.set_latency(Duration::from_millis(20));
    let resolver = Arc::new(resolver_with(store, fast_config(), Arc::new(ManualClock::new(0))));

    let mut handles = Vec::new();
    for i in 0..16 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move { resolver.resolve(&format!("m-{i}")).await }));
    }
    for handle in handles {
        let record = handle.await.unwrap();
        assert!(!record.is_degraded());
    }

    assert_eq!(resolver.stats().network_attempts, 1);
}
