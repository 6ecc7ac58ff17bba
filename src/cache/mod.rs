// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Freshness-bounded local cache of the last resolved record set.
//!
//! The cache holds at most one [`CacheSnapshot`]. A snapshot is never edited:
//! [`LocalCache::replace`] swaps in a new `Arc` wholesale, so readers see
//! either the old set or the new one.
//!
//! ```text
//! get() ─→ no snapshot ............................ Empty
//!      ─→ now - last_updated <= ttl ............... Fresh(snapshot)
//!      ─→ otherwise ............................... Stale(snapshot)  (kept)
//! ```

pub mod clock;
pub mod persist;

pub use clock::{Clock, ManualClock, SystemClock};
pub use persist::{MemorySnapshotStore, NoPersistence, SnapshotStore, SqliteSnapshotStore};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::material::{normalize_key, MaterialRecord, Provenance};

/// Immutable record set plus the time it was produced.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    records: Vec<MaterialRecord>,
    /// Epoch millis
    last_updated: u64,
    by_id: HashMap<String, usize>,
}

impl CacheSnapshot {
    pub fn new(records: Vec<MaterialRecord>, last_updated: u64) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            by_id.entry(normalize_key(&record.id)).or_insert(i);
        }
        Self {
            records,
            last_updated,
            by_id,
        }
    }

    #[must_use]
    pub fn records(&self) -> &[MaterialRecord] {
        &self.records
    }

    #[must_use]
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record with this id (case-insensitive).
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&MaterialRecord> {
        self.by_id.get(&normalize_key(id)).map(|&i| &self.records[i])
    }

    /// Milliseconds since the snapshot was produced.
    #[must_use]
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_updated)
    }

    #[must_use]
    pub fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        u128::from(self.age_millis(now)) <= ttl.as_millis()
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Fresh(Arc<CacheSnapshot>),
    /// Past its TTL; still usable as a last resort
    Stale(Arc<CacheSnapshot>),
    Empty,
}

impl CacheLookup {
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    /// The snapshot regardless of freshness.
    #[must_use]
    pub fn snapshot(&self) -> Option<&Arc<CacheSnapshot>> {
        match self {
            Self::Fresh(s) | Self::Stale(s) => Some(s),
            Self::Empty => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Stale(_) => "stale",
            Self::Empty => "empty",
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Epoch millis of the current snapshot
    pub last_updated: Option<u64>,
    pub count: usize,
    pub fresh: bool,
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub replacements: u64,
}

/// The resolver's local cache.
pub struct LocalCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Arc<CacheSnapshot>>>,
    persistence: RwLock<Arc<dyn SnapshotStore>>,

    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    replacements: AtomicU64,
}

impl LocalCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            clock: Arc::new(SystemClock),
            current: RwLock::new(None),
            persistence: RwLock::new(Arc::new(NoPersistence)),
            fresh_hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            replacements: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_persistence(self, persistence: Arc<dyn SnapshotStore>) -> Self {
        self.set_persistence(persistence);
        self
    }

    /// Swap the persistence layer (e.g. once a database has been opened).
    pub fn set_persistence(&self, persistence: Arc<dyn SnapshotStore>) {
        *self.persistence.write() = persistence;
    }

    fn persistence(&self) -> Arc<dyn SnapshotStore> {
        Arc::clone(&self.persistence.read())
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// The current snapshot, without freshness classification or accounting.
    #[must_use]
    pub fn current(&self) -> Option<Arc<CacheSnapshot>> {
        self.current.read().clone()
    }

    /// Read the current snapshot and classify its freshness.
    pub fn get(&self) -> CacheLookup {
        let current = self.current.read().clone();
        let lookup = match current {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Empty
            }
            Some(snapshot) if snapshot.is_fresh(self.clock.now_millis(), self.ttl) => {
                self.fresh_hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Fresh(snapshot)
            }
            Some(snapshot) => {
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Stale(snapshot)
            }
        };
        crate::metrics::record_cache_lookup(lookup.label());
        lookup
    }

    /// Install `records` as the new snapshot, stamped now.
    pub fn replace(&self, records: Vec<MaterialRecord>) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(CacheSnapshot::new(records, self.clock.now_millis()));
        self.install(Arc::clone(&snapshot));
        snapshot
    }

    fn install(&self, snapshot: Arc<CacheSnapshot>) {
        let count = snapshot.len();
        *self.current.write() = Some(snapshot);
        self.replacements.fetch_add(1, Ordering::Relaxed);
        crate::metrics::set_cache_records(count);
        debug!(records = count, "Cache snapshot replaced");
    }

    /// Drop the in-memory snapshot.
    pub fn invalidate(&self) {
        *self.current.write() = None;
        crate::metrics::set_cache_records(0);
        debug!("Cache invalidated");
    }

    /// Write `snapshot` to the persistence layer. Failures are logged only.
    pub async fn persist(&self, snapshot: &CacheSnapshot) {
        if let Err(e) = self.persistence().save(snapshot).await {
            error!(error = %e, records = snapshot.len(), "Failed to persist cache snapshot");
        }
    }

    /// Remove the persisted snapshot. Failures are logged only.
    pub async fn clear_persisted(&self) {
        if let Err(e) = self.persistence().clear().await {
            warn!(error = %e, "Failed to clear persisted cache snapshot");
        }
    }

    /// Load the persisted snapshot, if any, keeping its original timestamp.
    ///
    /// Restored records are stamped [`Provenance::Cache`]. A load failure
    /// leaves the cache empty. Returns whether a snapshot was installed.
    pub async fn restore(&self) -> bool {
        match self.persistence().load().await {
            Ok(Some(snapshot)) if !snapshot.is_empty() => {
                let last_updated = snapshot.last_updated();
                let records = snapshot
                    .records
                    .into_iter()
                    .map(|r| r.with_provenance(Provenance::Cache))
                    .collect();
                let restored = Arc::new(CacheSnapshot::new(records, last_updated));
                info!(
                    records = restored.len(),
                    age_ms = restored.age_millis(self.clock.now_millis()),
                    "Restored persisted cache snapshot"
                );
                self.install(restored);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Persisted snapshot unreadable, starting empty");
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let current = self.current.read().clone();
        CacheStats {
            last_updated: current.as_ref().map(|s| s.last_updated()),
            count: current.as_ref().map_or(0, |s| s.len()),
            fresh: current
                .as_ref()
                .is_some_and(|s| s.is_fresh(self.clock.now_millis(), self.ttl)),
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<MaterialRecord> {
        (0..n)
            .map(|i| MaterialRecord::new(format!("m-{i}"), format!("Material {i}"), 0.5))
            .collect()
    }

    fn cache_at(start: u64) -> (LocalCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let cache = LocalCache::new(Duration::from_secs(900)).with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_empty_cache() {
        let (cache, _) = cache_at(0);
        assert!(matches!(cache.get(), CacheLookup::Empty));
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().last_updated, None);
    }

    #[test]
    fn test_fresh_until_ttl_then_stale() {
        let (cache, clock) = cache_at(1_000);
        cache.replace(records(3));

        clock.advance(Duration::from_secs(900));
        assert!(cache.get().is_fresh(), "exactly TTL old is still fresh");

        clock.advance(Duration::from_millis(1));
        match cache.get() {
            CacheLookup::Stale(snapshot) => assert_eq!(snapshot.len(), 3),
            other => panic!("expected stale, got {other:?}"),
        }

        // Stale data is kept, not deleted
        assert_eq!(cache.stats().count, 3);
        assert!(!cache.stats().fresh);
    }

    #[test]
    fn test_replace_is_wholesale() {
        let (cache, clock) = cache_at(0);
        let first = cache.replace(records(5));
        clock.advance(Duration::from_secs(10));
        let second = cache.replace(records(2));

        // Earlier readers keep their snapshot
        assert_eq!(first.len(), 5);
        assert_eq!(second.len(), 2);
        assert_eq!(second.last_updated(), 10_000);

        let stats = cache.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.replacements, 2);
    }

    #[test]
    fn test_invalidate_clears() {
        let (cache, _) = cache_at(0);
        cache.replace(records(1));
        cache.invalidate();
        assert!(cache.get().snapshot().is_none());
    }

    #[test]
    fn test_snapshot_lookup_by_id() {
        let snapshot = CacheSnapshot::new(records(2), 0);
        assert_eq!(snapshot.get("M-1").unwrap().name, "Material 1");
        assert!(snapshot.get("m-9").is_none());
    }

    #[tokio::test]
    async fn test_restore_keeps_timestamp_and_marks_cache_provenance() {
        let store = Arc::new(MemorySnapshotStore::new());
        let (writer, _) = cache_at(5_000);
        let writer = writer.with_persistence(store.clone());
        let snapshot = writer.replace(records(4));
        writer.persist(&snapshot).await;

        let (reader, clock) = cache_at(5_000);
        let reader = reader.with_persistence(store);
        assert!(reader.restore().await);

        let CacheLookup::Fresh(restored) = reader.get() else {
            panic!("restored snapshot should be fresh");
        };
        assert_eq!(restored.last_updated(), 5_000);
        assert!(restored.records().iter().all(|r| r.provenance == Provenance::Cache));

        clock.advance(Duration::from_secs(901));
        assert!(matches!(reader.get(), CacheLookup::Stale(_)));
    }

    #[tokio::test]
    async fn test_restore_without_snapshot() {
        let (cache, _) = cache_at(0);
        assert!(!cache.restore().await);
        assert!(matches!(cache.get(), CacheLookup::Empty));
    }

    #[tokio::test]
    async fn test_clear_persisted_drops_saved_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let (cache, _) = cache_at(0);
        let cache = cache.with_persistence(store.clone());
        let snapshot = cache.replace(records(2));
        cache.persist(&snapshot).await;

        cache.clear_persisted().await;

        let (reader, _) = cache_at(0);
        assert!(!reader.with_persistence(store).restore().await);
    }
}
