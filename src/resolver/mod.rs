// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Material resolver facade.
//!
//! The [`MaterialResolver`] is the public entry point. It ties together:
//! - the [`LocalCache`] of the last resolved record set
//! - the [`FetchStrategyChain`] (scheduler, retry and circuit breakers inside)
//! - the [`FallbackProvider`] of curated defaults
//!
//! # Resolution cycle
//!
//! ```text
//! CacheCheck ──fresh──→ done (tier = cache)
//!     │ stale / empty
//!     ▼
//! NetworkAttempt ──records──→ replace + persist → done (tier = network)
//!     │ total failure / deadline / cooldown
//!     ▼
//! FallbackAttempt → stale snapshot (if any) + static set → done (degraded)
//! ```
//!
//! A network result smaller than `min_record_count` is cached as-is and
//! served with the static set merged behind it, flagged degraded.
//!
//! Concurrent misses share one NetworkAttempt. It runs on its own task, so
//! a caller that stops waiting does not cancel it; the result still lands
//! in the cache for everyone else.
//!
//! # Example
//!
//! ```rust,no_run
//! use material_resolver::{InMemoryBackingStore, MaterialResolver, ResolverConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(InMemoryBackingStore::new());
//! let resolver = MaterialResolver::builder(store)
//!     .config(ResolverConfig::default())
//!     .build()
//!     .expect("valid config");
//! resolver.start().await;
//!
//! let steel = resolver.resolve("steel").await;
//! assert!(steel.factor >= 0.0);
//! # }
//! ```

mod api;
mod flight;
mod lifecycle;
mod types;

pub use types::{Resolution, ResolutionTier, ResolverState, ResolverStats};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use self::flight::{fallback_resolution, Joined, NetworkFlight};
use crate::backing::BackingStore;
use crate::cache::{CacheLookup, CacheSnapshot, Clock, LocalCache, SnapshotStore};
use crate::config::ResolverConfig;
use crate::error::ConfigError;
use crate::fallback::FallbackProvider;
use crate::material::MaterialRecord;
use crate::resilience::{
    EndpointCircuits, ErrorNotifier, NetworkStatusProvider, NotificationThrottle, RetryPolicy,
};
use crate::scheduler::RequestScheduler;
use crate::strategy::{dedup_records, default_strategies, FetchStrategy, FetchStrategyChain};

/// Tiered material resolver.
///
/// Owns its cache and scheduler; construct one per consumer with
/// [`MaterialResolver::builder`]. `Send + Sync`, share it behind an `Arc`.
pub struct MaterialResolver {
    pub(super) config: ResolverConfig,
    pub(super) cache: Arc<LocalCache>,
    /// Single-flight network tier
    pub(super) flight: Arc<NetworkFlight>,
    pub(super) fallback: FallbackProvider,
    pub(super) scheduler: RequestScheduler,
    pub(super) circuits: Arc<EndpointCircuits>,

    pub(super) state: watch::Sender<ResolverState>,
    pub(super) state_rx: watch::Receiver<ResolverState>,
    /// Whether persistence was injected (otherwise `start` may open SQLite)
    pub(super) persistence_injected: bool,

    pub(super) degraded: AtomicBool,
    pub(super) last_tier: Mutex<Option<ResolutionTier>>,
    pub(super) cooldown_skips: AtomicU64,
}

/// Builder for [`MaterialResolver`].
pub struct ResolverBuilder {
    store: Arc<dyn BackingStore>,
    config: ResolverConfig,
    strategies: Option<Vec<Arc<dyn FetchStrategy>>>,
    clock: Option<Arc<dyn Clock>>,
    persistence: Option<Arc<dyn SnapshotStore>>,
    network: Option<Arc<dyn NetworkStatusProvider>>,
    notifier: Option<Arc<dyn ErrorNotifier>>,
    fallback: Option<FallbackProvider>,
}

impl ResolverBuilder {
    #[must_use]
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default strategy chain.
    #[must_use]
    pub fn strategies(mut self, strategies: Vec<Arc<dyn FetchStrategy>>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn SnapshotStore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[must_use]
    pub fn network_status(mut self, network: Arc<dyn NetworkStatusProvider>) -> Self {
        self.network = Some(network);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: FallbackProvider) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Validate the configuration and assemble the resolver.
    pub fn build(self) -> Result<MaterialResolver, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let scheduler = RequestScheduler::new(config.scheduler_config());
        let circuits = Arc::new(EndpointCircuits::new(config.circuit_config()));

        let notifications = Arc::new(match self.notifier {
            Some(notifier) => NotificationThrottle::with_notifier(notifier, config.notification_cooldown()),
            None => NotificationThrottle::new(config.notification_cooldown()),
        });
        let mut retry = RetryPolicy::new(config.retry_config()).with_notifications(notifications);
        if let Some(network) = self.network {
            retry = retry.with_network_status(network);
        }

        let chain = FetchStrategyChain::new(
            self.strategies.unwrap_or_else(default_strategies),
            self.store,
            scheduler.clone(),
            retry,
        )
        .with_circuits(Arc::clone(&circuits))
        .with_operation_timeout(config.operation_timeout());

        let mut cache = LocalCache::new(config.cache_ttl());
        if let Some(clock) = self.clock {
            cache = cache.with_clock(clock);
        }
        let persistence_injected = self.persistence.is_some();
        if let Some(persistence) = self.persistence {
            cache = cache.with_persistence(persistence);
        }

        let cache = Arc::new(cache);
        let flight = Arc::new(NetworkFlight::new(
            Arc::clone(&cache),
            chain,
            config.resolution_deadline(),
            config.failure_cooldown(),
            config.min_record_count,
        ));

        let (state, state_rx) = watch::channel(ResolverState::Created);

        Ok(MaterialResolver {
            config,
            cache,
            flight,
            fallback: self.fallback.unwrap_or_default(),
            scheduler,
            circuits,
            state,
            state_rx,
            persistence_injected,
            degraded: AtomicBool::new(false),
            last_tier: Mutex::new(None),
            cooldown_skips: AtomicU64::new(0),
        })
    }
}

impl MaterialResolver {
    /// Start building a resolver over `store`.
    pub fn builder(store: Arc<dyn BackingStore>) -> ResolverBuilder {
        ResolverBuilder {
            store,
            config: ResolverConfig::default(),
            strategies: None,
            clock: None,
            persistence: None,
            network: None,
            notifier: None,
            fallback: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ResolverState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ResolverState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn fallback_provider(&self) -> &FallbackProvider {
        &self.fallback
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Resolution cycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run one resolution cycle: cache, then network, then fallback.
    pub(super) async fn cycle(&self) -> Resolution {
        let lookup = self.cache.get();
        if let CacheLookup::Fresh(snapshot) = &lookup {
            debug!(records = snapshot.len(), "Fresh cache hit");
            return self.finish(self.flight.serve_snapshot(Arc::clone(snapshot), ResolutionTier::Cache));
        }

        if self.in_cooldown() {
            return self.finish(self.cooldown_fallback(lookup.snapshot().cloned()));
        }

        let resolution = match self.flight.join() {
            Joined::Fresh(snapshot) => {
                debug!("Cache refreshed by a concurrent resolution");
                self.flight.serve_snapshot(snapshot, ResolutionTier::Cache)
            }
            Joined::CoolingDown(stale) => self.cooldown_fallback(stale),
            Joined::Waiting(rx) => self.flight.wait(rx).await,
        };
        self.finish(resolution)
    }

    fn cooldown_fallback(&self, stale: Option<Arc<CacheSnapshot>>) -> Resolution {
        self.cooldown_skips.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cooldown_skip();
        debug!("Network cooling down after failure, serving fallback");
        fallback_resolution(stale, Vec::new())
    }

    fn finish(&self, resolution: Resolution) -> Resolution {
        let degraded = resolution.is_degraded();
        let was_degraded = self.degraded.swap(degraded, Ordering::Relaxed);
        if degraded && !was_degraded {
            warn!(tier = %resolution.tier(), "Resolution degraded to default data");
        } else if !degraded && was_degraded {
            info!(tier = %resolution.tier(), "Resolution recovered from degraded mode");
        }
        *self.last_tier.lock() = Some(resolution.tier());
        crate::metrics::set_degraded(degraded);
        crate::metrics::record_resolution(resolution.tier().as_str(), degraded);
        resolution
    }

    pub(super) fn in_cooldown(&self) -> bool {
        self.flight.in_cooldown()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Per-id lookup
    // ═══════════════════════════════════════════════════════════════════════════

    /// Resolved set → curated static set → synthesized record.
    pub(super) fn lookup(&self, resolution: &Resolution, id: &str) -> MaterialRecord {
        if let Some(record) = resolution.snapshot.as_ref().and_then(|s| s.get(id)) {
            return record.clone();
        }
        if let Some(record) = self.fallback.lookup(id) {
            return record;
        }
        self.fallback.synthesize(id)
    }

    /// Every record the resolution serves, snapshot first.
    pub(super) fn materialize(&self, resolution: &Resolution) -> Vec<MaterialRecord> {
        let live = resolution
            .snapshot
            .as_ref()
            .map(|s| s.records().to_vec())
            .unwrap_or_default();
        if resolution.augmented {
            dedup_records([live, self.fallback.static_set()])
        } else {
            live
        }
    }
}
