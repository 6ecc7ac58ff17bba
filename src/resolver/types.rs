//! Public types for the material resolver.

use std::sync::Arc;

use crate::cache::{CacheSnapshot, CacheStats};
use crate::scheduler::SchedulerStats;
use crate::strategy::StrategyFailure;

/// Resolver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    /// Constructed, persisted snapshot not yet restored
    Created,
    /// Opening persistence and restoring the last snapshot
    Restoring,
    /// Serving resolutions
    Ready,
}

impl std::fmt::Display for ResolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Restoring => write!(f, "Restoring"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Which tier served a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionTier {
    /// Fresh cache hit
    Cache,
    /// Live strategy chain run
    Network,
    /// Network unavailable: stale snapshot (if any) plus static defaults
    Fallback,
}

impl ResolutionTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Network => "network",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one resolution cycle.
///
/// Holds the snapshot that served it; when `augmented`, the curated static
/// set is logically merged behind the snapshot.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub(super) snapshot: Option<Arc<CacheSnapshot>>,
    pub(super) tier: ResolutionTier,
    pub(super) augmented: bool,
    pub(super) failures: Vec<StrategyFailure>,
}

impl Resolution {
    #[must_use]
    pub fn tier(&self) -> ResolutionTier {
        self.tier
    }

    /// True when static defaults had to stand in for live data.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.augmented || self.tier == ResolutionTier::Fallback
    }

    /// Epoch millis of the snapshot behind this resolution.
    #[must_use]
    pub fn last_updated(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.last_updated())
    }

    /// Records that came from the snapshot (live or stale), excluding defaults.
    #[must_use]
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.len())
    }

    /// Strategies that failed during this cycle, if it ran the chain.
    #[must_use]
    pub fn failures(&self) -> &[StrategyFailure] {
        &self.failures
    }
}

/// Point-in-time view of the resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
    /// Epoch millis of the current snapshot
    pub last_updated: Option<u64>,
    /// Records in the current resolved set (defaults included when degraded)
    pub count: usize,
    /// Whether the last resolution was degraded
    pub degraded: bool,
    pub last_tier: Option<ResolutionTier>,
    /// Strategy chain runs started
    pub network_attempts: u64,
    /// Chain runs that produced nothing usable
    pub network_failures: u64,
    /// Resolutions that skipped the network during failure cooldown
    pub cooldown_skips: u64,
    pub cache: CacheStats,
    pub scheduler: SchedulerStats,
    /// Requests rejected by open circuit breakers
    pub circuit_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialRecord;

    #[test]
    fn test_state_display() {
        assert_eq!(ResolverState::Created.to_string(), "Created");
        assert_eq!(ResolverState::Ready.to_string(), "Ready");
    }

    #[test]
    fn test_degraded_flag() {
        let snapshot = Arc::new(CacheSnapshot::new(vec![MaterialRecord::new("a", "A", 1.0)], 0));
        let live = Resolution {
            snapshot: Some(snapshot.clone()),
            tier: ResolutionTier::Network,
            augmented: false,
            failures: Vec::new(),
        };
        assert!(!live.is_degraded());
        assert_eq!(live.snapshot_len(), 1);

        let partial = Resolution { augmented: true, ..live.clone() };
        assert!(partial.is_degraded());

        let fallback = Resolution { snapshot: None, tier: ResolutionTier::Fallback, augmented: false, failures: vec![] };
        assert!(fallback.is_degraded());
        assert_eq!(fallback.last_updated(), None);
    }
}
