//! Public resolution API.
//!
//! - `resolve()` - One identifier, never fails
//! - `resolve_many()` - Batch over one shared resolution cycle
//! - `resolve_many_within()` - Batch with a caller deadline
//! - `resolve_all()` - The complete resolved record set
//! - `refresh()` - Force a network attempt
//! - `stats()` - Freshness, size and degradation

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::material::MaterialRecord;

use super::{MaterialResolver, Resolution, ResolverStats};

impl MaterialResolver {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Resolution
    // ═══════════════════════════════════════════════════════════════════════════

    /// Resolve one material identifier.
    ///
    /// Never fails: the worst case is a synthesized record flagged degraded.
    pub async fn resolve(&self, id: &str) -> MaterialRecord {
        let resolution = self.cycle().await;
        self.lookup(&resolution, id)
    }

    /// Resolve many identifiers from a single resolution cycle.
    ///
    /// Each id is looked up in the resolved set, then the curated static
    /// set, then synthesized. Duplicate ids collapse to one entry.
    pub async fn resolve_many<I, S>(&self, ids: I) -> HashMap<String, MaterialRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<S> = ids.into_iter().collect();
        let resolution = self.cycle().await;

        let resolved: HashMap<String, MaterialRecord> = ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.lookup(&resolution, id))
            })
            .collect();

        debug!(
            requested = resolved.len(),
            tier = %resolution.tier(),
            degraded = resolution.is_degraded(),
            "Batch resolved"
        );
        resolved
    }

    /// [`resolve_many`](Self::resolve_many) bounded by `deadline`.
    ///
    /// The only operation that returns an error: [`ResolveError::Timeout`]
    /// when the deadline elapses first. Only this caller's wait is dropped;
    /// a network attempt it started or joined still completes and populates
    /// the cache.
    pub async fn resolve_many_within<I, S>(
        &self,
        ids: I,
        deadline: Duration,
    ) -> Result<HashMap<String, MaterialRecord>, ResolveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match tokio::time::timeout(deadline, self.resolve_many(ids)).await {
            Ok(resolved) => Ok(resolved),
            Err(_) => {
                warn!(?deadline, "Batch resolution exceeded caller deadline");
                crate::metrics::record_deadline_exceeded();
                Err(ResolveError::Timeout { deadline })
            }
        }
    }

    /// Every record the resolver currently serves.
    ///
    /// When degraded, the curated defaults are included after any live or
    /// stale records.
    pub async fn resolve_all(&self) -> Vec<MaterialRecord> {
        let resolution = self.cycle().await;
        self.materialize(&resolution)
    }

    /// Run a network attempt now, regardless of freshness or cooldown.
    ///
    /// Joins an attempt that is already in flight instead of starting a
    /// second one. With `force`, the cached snapshot is dropped first, so a
    /// failing network leaves only the static defaults.
    pub async fn refresh(&self, force: bool) -> Resolution {
        if force {
            self.cache.invalidate();
        }
        self.flight.clear_failure();

        info!(force, "Refreshing material data");
        let rx = self.flight.join_or_launch();
        let resolution = self.flight.wait(rx).await;
        self.finish(resolution)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Introspection
    // ═══════════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn stats(&self) -> ResolverStats {
        let degraded = self.degraded.load(Ordering::Relaxed);
        let snapshot = self.cache.current();

        let count = match (&snapshot, degraded) {
            (Some(s), false) => s.len(),
            (snapshot, true) => {
                let view = Resolution {
                    snapshot: snapshot.clone(),
                    tier: super::ResolutionTier::Fallback,
                    augmented: true,
                    failures: Vec::new(),
                };
                self.materialize(&view).len()
            }
            (None, false) => 0,
        };

        ResolverStats {
            last_updated: snapshot.as_ref().map(|s| s.last_updated()),
            count,
            degraded,
            last_tier: *self.last_tier.lock(),
            network_attempts: self.flight.attempts.load(Ordering::Relaxed),
            network_failures: self.flight.failures.load(Ordering::Relaxed),
            cooldown_skips: self.cooldown_skips.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            scheduler: self.scheduler.stats(),
            circuit_rejections: self.circuits.rejections(),
        }
    }

    /// Whether total-failure cooldown is currently suppressing network attempts.
    #[must_use]
    pub fn is_cooling_down(&self) -> bool {
        self.in_cooldown()
    }
}
