//! # Material Resolver
//!
//! Tiered resolution of construction material records (carbon factors,
//! categories, sustainability scores) that keeps answering when the backing
//! data service is slow, partial or down.
//!
//! ## Architecture
//!
//! Every resolution walks the same three tiers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Tier 1: Local Cache                     │
//! │  • Whole record set behind one TTL (default 15 min)        │
//! │  • Atomic snapshot swap, optional SQLite persistence        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ stale / empty
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tier 2: Strategy Chain                     │
//! │  • Ordered query surfaces, results merged and deduplicated │
//! │  • Retry with jittered backoff, per-surface circuits       │
//! │  • Prioritized scheduler bounding in-flight requests       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ total failure / deadline
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Tier 3: Static Fallback                    │
//! │  • Curated defaults, merged behind any stale snapshot      │
//! │  • Synthesized record for any unknown identifier           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Resolution never fails: the worst case is a degraded record carrying
//! [`Provenance::Fallback`]. The only error a caller sees is
//! [`ResolveError::Timeout`] from [`MaterialResolver::resolve_many_within`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use material_resolver::{InMemoryBackingStore, MaterialResolver, ResolverConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(InMemoryBackingStore::new());
//!     store.set_rows("materials", vec![
//!         json!({"id": "m-1", "name": "Recycled Steel", "carbon_factor": 0.9})
//!             .as_object().cloned().unwrap(),
//!     ]);
//!
//!     let resolver = MaterialResolver::builder(store)
//!         .config(ResolverConfig::default())
//!         .build()
//!         .expect("valid config");
//!     resolver.start().await;
//!
//!     let record = resolver.resolve("m-1").await;
//!     println!("{} = {} kgCO2e/{}", record.name, record.factor, record.unit);
//!
//!     let unknown = resolver.resolve("mystery-panel").await;
//!     assert!(unknown.is_degraded());
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`ResolverConfig`]; values load from an optional file and
//! `MATERIAL_RESOLVER_*` environment variables.
//!
//! ## Modules
//!
//! - [`resolver`]: The [`MaterialResolver`] facade
//! - [`cache`]: TTL snapshot cache and its persistence
//! - [`strategy`]: Fetch strategies, row decoding, merge/dedup
//! - [`scheduler`]: Priority request scheduler with global and per-endpoint limits
//! - [`resilience`]: Retry, circuit breakers, network status, error notifications
//! - [`fallback`]: Curated defaults and record synthesis
//! - [`backing`]: Backing store abstraction and in-memory implementation

pub mod backing;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod material;
pub mod metrics;
pub mod resilience;
pub mod resolver;
pub mod scheduler;
pub mod strategy;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use backing::{BackingError, BackingStore, InMemoryBackingStore, Row};
pub use cache::{
    CacheLookup, CacheSnapshot, CacheStats, Clock, LocalCache, ManualClock, MemorySnapshotStore, NoPersistence,
    SnapshotStore, SqliteSnapshotStore, SystemClock,
};
pub use config::ResolverConfig;
pub use error::{ConfigError, ErrorCategory, FetchError, PersistError, ResolveError};
pub use fallback::FallbackProvider;
pub use material::{MaterialRecord, Provenance, Recyclability};
pub use metrics::LatencyTimer;
pub use resilience::{
    AlwaysOnline, CircuitBreaker, CircuitConfig, EndpointCircuits, ErrorNotifier, ManualNetworkStatus,
    NetworkStatusProvider, NotificationThrottle, RetryConfig, RetryPolicy, TracingNotifier,
};
pub use resolver::{MaterialResolver, Resolution, ResolutionTier, ResolverBuilder, ResolverState, ResolverStats};
pub use scheduler::{Priority, RequestScheduler, ScheduleError, SchedulerConfig, SchedulerStats, TimeoutStage};
pub use strategy::{ChainOutcome, FetchStrategy, FetchStrategyChain, RawMaterialRow, StrategyFailure, TableStrategy};
