//! Resolver startup: open persistence and restore the last snapshot.

use std::sync::Arc;
use tracing::{info, warn};

use super::{MaterialResolver, ResolverState};
use crate::cache::SqliteSnapshotStore;

impl MaterialResolver {
    /// Restore the persisted snapshot, then mark the resolver ready.
    ///
    /// When no persistence was injected and `snapshot_path` is configured,
    /// the SQLite snapshot store is opened here. Persistence problems are
    /// logged and the resolver starts with an empty cache.
    ///
    /// Resolutions work before `start` too; they just begin cold.
    pub async fn start(&self) {
        if self.state() == ResolverState::Ready {
            return;
        }
        let _ = self.state.send(ResolverState::Restoring);

        if !self.persistence_injected {
            if let Some(path) = self.config.snapshot_path.as_deref() {
                match SqliteSnapshotStore::open(path).await {
                    Ok(store) => self.cache.set_persistence(Arc::new(store)),
                    Err(e) => warn!(path, error = %e, "Snapshot store unavailable, running without persistence"),
                }
            }
        }

        let restored = self.cache.restore().await;
        let _ = self.state.send(ResolverState::Ready);
        info!(restored, "Material resolver ready");
    }
}
