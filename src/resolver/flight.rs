//! Shared network attempts.
//!
//! At most one strategy-chain run is in flight. It runs on its own task and
//! publishes its [`Resolution`] through a watch channel; every caller that
//! misses the cache meanwhile waits on that same channel. A caller that
//! gives up (deadline, dropped future) only drops its receiver, the attempt
//! still finishes and writes through to the cache.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Resolution, ResolutionTier};
use crate::cache::{CacheLookup, CacheSnapshot, LocalCache};
use crate::strategy::{FetchStrategyChain, StrategyFailure};

pub(super) type AttemptReceiver = watch::Receiver<Option<Resolution>>;

/// What a cache-missing caller should do.
pub(super) enum Joined {
    /// Another attempt refreshed the cache first
    Fresh(Arc<CacheSnapshot>),
    /// A total failure is still cooling down; holds the stale snapshot
    CoolingDown(Option<Arc<CacheSnapshot>>),
    /// Wait for the in-flight attempt
    Waiting(AttemptReceiver),
}

/// Owner of the network tier: the chain, the write-through cache and the
/// failure bookkeeping the cooldown reads.
pub(super) struct NetworkFlight {
    pub(super) cache: Arc<LocalCache>,
    chain: FetchStrategyChain,
    deadline: Duration,
    cooldown: Duration,
    min_record_count: usize,

    in_flight: Mutex<Option<AttemptReceiver>>,
    /// When the last total network failure happened
    pub(super) last_failure: Mutex<Option<Instant>>,
    pub(super) attempts: AtomicU64,
    pub(super) failures: AtomicU64,
}

/// Clears the in-flight slot when the attempt task ends, even by panic.
struct SlotGuard(Arc<NetworkFlight>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        *self.0.in_flight.lock() = None;
    }
}

impl NetworkFlight {
    pub(super) fn new(
        cache: Arc<LocalCache>,
        chain: FetchStrategyChain,
        deadline: Duration,
        cooldown: Duration,
        min_record_count: usize,
    ) -> Self {
        Self {
            cache,
            chain,
            deadline,
            cooldown,
            min_record_count,
            in_flight: Mutex::new(None),
            last_failure: Mutex::new(None),
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub(super) fn in_cooldown(&self) -> bool {
        match *self.last_failure.lock() {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    pub(super) fn clear_failure(&self) {
        *self.last_failure.lock() = None;
    }

    /// Join the running attempt, or start one unless the cache turned
    /// fresh or a cooldown began while the caller was getting here.
    pub(super) fn join(self: &Arc<Self>) -> Joined {
        let mut slot = self.in_flight.lock();
        if let Some(rx) = slot.as_ref() {
            debug!("Joining in-flight network attempt");
            return Joined::Waiting(rx.clone());
        }
        if let CacheLookup::Fresh(snapshot) = self.cache.get() {
            return Joined::Fresh(snapshot);
        }
        if self.in_cooldown() {
            return Joined::CoolingDown(self.cache.current());
        }
        Joined::Waiting(self.launch(&mut slot))
    }

    /// Join the running attempt or start one, skipping freshness and cooldown.
    pub(super) fn join_or_launch(self: &Arc<Self>) -> AttemptReceiver {
        let mut slot = self.in_flight.lock();
        match slot.as_ref() {
            Some(rx) => rx.clone(),
            None => self.launch(&mut slot),
        }
    }

    fn launch(self: &Arc<Self>, slot: &mut Option<AttemptReceiver>) -> AttemptReceiver {
        let (tx, rx) = watch::channel(None);
        *slot = Some(rx.clone());

        let flight = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = SlotGuard(Arc::clone(&flight));
            let resolution = flight.attempt().await;
            tx.send_replace(Some(resolution));
        });
        rx
    }

    /// Wait for the attempt behind `rx` to publish its resolution.
    pub(super) async fn wait(&self, mut rx: AttemptReceiver) -> Resolution {
        let shared = match rx.wait_for(Option::is_some).await {
            Ok(published) => (*published).clone(),
            Err(_) => None,
        };
        shared.unwrap_or_else(|| {
            warn!("Network attempt ended without a result, serving fallback");
            fallback_resolution(self.cache.current(), Vec::new())
        })
    }

    /// Run the strategy chain under the resolution deadline.
    async fn attempt(&self) -> Resolution {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let _timer = crate::time_operation!("resolver", "network_attempt");
        let stale = self.cache.current();

        let outcome = match tokio::time::timeout(self.deadline, self.chain.resolve_all()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline = ?self.deadline, "Network attempt exceeded resolution deadline");
                crate::metrics::record_network_attempt("deadline");
                return self.total_failure(stale);
            }
        };

        match outcome {
            Ok(outcome) if !outcome.records.is_empty() => {
                self.clear_failure();
                let failures = outcome.failures;
                let snapshot = self.cache.replace(outcome.records);
                self.cache.persist(&snapshot).await;

                info!(
                    records = snapshot.len(),
                    failed_strategies = failures.len(),
                    "Network refresh succeeded"
                );
                crate::metrics::record_network_attempt("success");

                let mut resolution = self.serve_snapshot(snapshot, ResolutionTier::Network);
                resolution.failures = failures;
                resolution
            }
            Ok(outcome) => {
                // Reachable but empty: nothing to cache, no cooldown
                warn!(
                    failed_strategies = outcome.failures.len(),
                    "Network returned no records, serving defaults"
                );
                crate::metrics::record_network_attempt("empty");
                fallback_resolution(stale, outcome.failures)
            }
            Err(error) => {
                warn!(error = %error, "All strategies failed");
                crate::metrics::record_network_attempt("total_failure");
                self.total_failure(stale)
            }
        }
    }

    fn total_failure(&self, stale: Option<Arc<CacheSnapshot>>) -> Resolution {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
        fallback_resolution(stale, Vec::new())
    }

    /// Serve a snapshot, merging defaults behind it when it is too small.
    pub(super) fn serve_snapshot(&self, snapshot: Arc<CacheSnapshot>, tier: ResolutionTier) -> Resolution {
        let augmented = snapshot.len() < self.min_record_count;
        if augmented {
            debug!(
                records = snapshot.len(),
                min = self.min_record_count,
                "Below minimum record count, merging defaults"
            );
        }
        Resolution {
            snapshot: Some(snapshot),
            tier,
            augmented,
            failures: Vec::new(),
        }
    }
}

pub(super) fn fallback_resolution(
    stale: Option<Arc<CacheSnapshot>>,
    failures: Vec<StrategyFailure>,
) -> Resolution {
    Resolution {
        snapshot: stale,
        tier: ResolutionTier::Fallback,
        augmented: true,
        failures,
    }
}
