// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable storage for the cache snapshot.
//!
//! Persistence is advisory. A snapshot that cannot be loaded is treated as
//! an empty cache; one that cannot be saved is logged and the in-memory
//! copy stays authoritative.
//!
//! The SQLite implementation keeps a single row:
//!
//! ```sql
//! CREATE TABLE material_cache (
//!     slot TEXT PRIMARY KEY,          -- always 'current'
//!     last_updated INTEGER NOT NULL,  -- epoch millis
//!     payload TEXT NOT NULL           -- JSON array of records
//! );
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::CacheSnapshot;
use crate::error::PersistError;
use crate::material::MaterialRecord;

const SLOT: &str = "current";

static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Where snapshots are persisted between process runs.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The last saved snapshot, if any.
    async fn load(&self) -> Result<Option<CacheSnapshot>, PersistError>;

    /// Overwrite the saved snapshot.
    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), PersistError>;

    /// Remove the saved snapshot.
    async fn clear(&self) -> Result<(), PersistError>;
}

/// Keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

#[async_trait]
impl SnapshotStore for NoPersistence {
    async fn load(&self) -> Result<Option<CacheSnapshot>, PersistError> {
        Ok(None)
    }

    async fn save(&self, _snapshot: &CacheSnapshot) -> Result<(), PersistError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Holds the encoded snapshot in memory; survives resolver restarts
/// within one process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    saved: Mutex<Option<(u64, String)>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved.lock().is_none()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, PersistError> {
        let saved = self.saved.lock().clone();
        match saved {
            Some((last_updated, payload)) => {
                let records: Vec<MaterialRecord> = serde_json::from_str(&payload)?;
                Ok(Some(CacheSnapshot::new(records, last_updated)))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), PersistError> {
        let payload = serde_json::to_string(snapshot.records())?;
        *self.saved.lock() = Some((snapshot.last_updated(), payload));
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistError> {
        *self.saved.lock() = None;
        Ok(())
    }
}

/// SQLite-backed snapshot store (sqlx `Any` driver, WAL mode).
pub struct SqliteSnapshotStore {
    pool: AnyPool,
}

impl SqliteSnapshotStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, PersistError> {
        Self::connect(&format!("sqlite://{}?mode=rwc", path)).await
    }

    /// Connect with a full `sqlite:` URL.
    pub async fn connect(url: &str) -> Result<Self, PersistError> {
        install_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| PersistError::Backend(format!("Failed to open snapshot DB: {}", e)))?;

        let store = Self { pool };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        info!(url, "Snapshot store ready");
        Ok(store)
    }

    async fn enable_wal_mode(&self) -> Result<(), PersistError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS material_cache (
                slot TEXT PRIMARY KEY,
                last_updated INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PersistError::Backend(format!("Failed to create material_cache table: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, PersistError> {
        let row = sqlx::query("SELECT last_updated, payload FROM material_cache WHERE slot = ?")
            .bind(SLOT)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PersistError::Backend(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_updated: i64 = row
            .try_get("last_updated")
            .map_err(|e| PersistError::Backend(e.to_string()))?;

        // TEXT may come back as bytes through the Any driver
        let payload: String = match row.try_get::<String, _>("payload") {
            Ok(text) => text,
            Err(_) => row
                .try_get::<Vec<u8>, _>("payload")
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .ok_or_else(|| PersistError::Backend("unreadable payload column".into()))?,
        };

        let records: Vec<MaterialRecord> = serde_json::from_str(&payload)?;
        debug!(records = records.len(), last_updated, "Loaded persisted snapshot");
        Ok(Some(CacheSnapshot::new(records, last_updated.max(0) as u64)))
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), PersistError> {
        let payload = serde_json::to_string(snapshot.records())?;

        sqlx::query(
            r#"
            INSERT INTO material_cache (slot, last_updated, payload)
            VALUES (?, ?, ?)
            ON CONFLICT(slot) DO UPDATE SET
                last_updated = excluded.last_updated,
                payload = excluded.payload
            "#,
        )
        .bind(SLOT)
        .bind(snapshot.last_updated() as i64)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| PersistError::Backend(e.to_string()))?;

        debug!(records = snapshot.len(), "Persisted snapshot");
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistError> {
        sqlx::query("DELETE FROM material_cache WHERE slot = ?")
            .bind(SLOT)
            .execute(&self.pool)
            .await
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("material_cache_test_{}_{}.db", name, std::process::id()))
    }

    fn snapshot() -> CacheSnapshot {
        CacheSnapshot::new(
            vec![
                MaterialRecord::new("m-1", "Steel", 1.55).with_category("Steel"),
                MaterialRecord::new("m-2", "Concrete", 0.13),
            ],
            1_700_000_000_000,
        )
    }

    #[tokio::test]
    async fn test_no_persistence_is_always_empty() {
        let store = NoPersistence;
        store.save(&snapshot()).await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(&snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.last_updated(), 1_700_000_000_000);

        store.clear().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_save_load_clear() {
        let path = temp_db_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let store = SqliteSnapshotStore::open(&path.display().to_string()).await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        store.save(&snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.records()[0].id, "m-1");
        assert_eq!(loaded.records()[0].category, "Steel");
        assert_eq!(loaded.last_updated(), 1_700_000_000_000);

        // Overwrites the single slot
        store
            .save(&CacheSnapshot::new(vec![MaterialRecord::new("m-3", "Glass", 1.4)], 5))
            .await
            .unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.last_updated(), 5);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let path = temp_db_path("reopen");
        let _ = std::fs::remove_file(&path);
        let path_str = path.display().to_string();

        {
            let store = SqliteSnapshotStore::open(&path_str).await.unwrap();
            store.save(&snapshot()).await.unwrap();
        }

        let reopened = SqliteSnapshotStore::open(&path_str).await.unwrap();
        let loaded = reopened.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);

        let _ = std::fs::remove_file(&path);
    }
}
