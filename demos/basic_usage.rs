// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic material-resolver usage example.
//!
//! Demonstrates:
//! 1. Seeding an in-memory backing store
//! 2. Resolving single and batched identifiers (network, then cache)
//! 3. Degrading to curated defaults when the store goes down
//! 4. Recovering with a refresh
//! 5. Displaying resolver stats and raw metrics
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=material_resolver=debug cargo run --example basic_usage
//! ```

use material_resolver::{
    BackingError, InMemoryBackingStore, MaterialResolver, ResolverConfig, ResolverStats,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("material_resolver=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         material-resolver: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Seed the backing store and build the resolver
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Seeding backing store...");
    let store = Arc::new(InMemoryBackingStore::new());

    let rows = (0..60u32)
        .map(|i| {
            json!({
                "material_id": format!("mat-{i:03}"),
                "material_name": format!("Sample Material {i}"),
                "carbon_factor": 0.1 + f64::from(i) * 0.05,
                "category": if i % 2 == 0 { "Concrete" } else { "Timber" },
                "sustainability_score": 40 + (i % 50),
            })
        })
        .filter_map(|v| v.as_object().cloned())
        .collect();
    store.set_rows("materials", rows);
    println!("   └─ 60 rows in 'materials'");

    let config = ResolverConfig {
        retry_base_ms: 20,
        retry_max_delay_ms: 200,
        failure_cooldown_secs: 1,
        ..ResolverConfig::default()
    };
    let resolver = MaterialResolver::builder(store.clone()).config(config).build()?;

    println!("\n🚀 Starting resolver...");
    resolver.start().await;
    println!("   ✅ State: {}", resolver.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Resolve (first call hits the network, later calls the cache)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Resolving...");
    for id in ["mat-007", "mat-007", "steel"] {
        let start = Instant::now();
        let record = resolver.resolve(id).await;
        println!(
            "   └─ {id} → {} ({} kgCO2e/{}, {:?}) in {:?}",
            record.name,
            record.factor,
            record.unit,
            record.provenance,
            start.elapsed()
        );
    }

    let batch = resolver.resolve_many(["mat-001", "mat-002", "reclaimed-brick"]).await;
    let mut ids: Vec<_> = batch.keys().cloned().collect();
    ids.sort();
    println!("   Batch:");
    for id in ids {
        let record = &batch[&id];
        println!("   └─ {id} → {} [{}] degraded={}", record.name, record.category, record.is_degraded());
    }
    print_stats(&resolver.stats());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Backing store outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n💥 Simulating outage with forced refresh...");
    store.fail_always(BackingError::Network("connection refused".into()));
    let resolution = resolver.refresh(true).await;
    println!("   └─ tier={} degraded={}", resolution.tier(), resolution.is_degraded());

    let concrete = resolver.resolve("concrete").await;
    println!("   └─ concrete → {} ({:?})", concrete.factor, concrete.provenance);
    print_stats(&resolver.stats());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Recovery
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🩹 Restoring backing store...");
    store.clear_failures();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let resolution = resolver.refresh(false).await;
    println!(
        "   └─ tier={} degraded={} records={}",
        resolution.tier(),
        resolution.is_degraded(),
        resolution.snapshot_len()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn print_stats(stats: &ResolverStats) {
    println!("\n📊 Resolver Stats:");
    println!("   ├─ Records: {}", stats.count);
    println!("   ├─ Degraded: {}", stats.degraded);
    println!("   ├─ Last tier: {:?}", stats.last_tier);
    println!(
        "   ├─ Network attempts/failures: {}/{}",
        stats.network_attempts, stats.network_failures
    );
    println!(
        "   └─ Cache hits fresh/stale/miss: {}/{}/{}",
        stats.cache.fresh_hits, stats.cache.stale_hits, stats.cache.misses
    );
}

/// Dump all captured metrics, sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, value) in &counters {
        println!("   │  └─ {name} = {value}");
    }
    println!("   ├─ Gauges");
    for (name, value) in &gauges {
        println!("   │  └─ {name} = {value:.2}");
    }
    println!("   └─ Histograms");
    for (name, count, sum) in &histograms {
        let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
        println!("      └─ {name} count={count} avg={avg:.4}");
    }
}
