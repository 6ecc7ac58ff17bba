use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::traits::{BackingError, BackingStore, Row};

/// In-process backing store.
///
/// Holds rows per query surface and supports scripted failures, so the
/// resolver can be exercised without a remote service.
pub struct InMemoryBackingStore {
    sources: DashMap<String, Vec<Row>>,
    /// Errors returned (front first) before a source answers normally
    scripted_failures: DashMap<String, VecDeque<BackingError>>,
    /// When set, every query fails with this error
    fail_all: Mutex<Option<BackingError>>,
    offline: AtomicBool,
    latency: Mutex<Duration>,
    calls: AtomicU64,
    calls_by_source: DashMap<String, u64>,
}

impl InMemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            scripted_failures: DashMap::new(),
            fail_all: Mutex::new(None),
            offline: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
            calls_by_source: DashMap::new(),
        }
    }

    /// Replace the rows served by `source`.
    pub fn set_rows(&self, source: impl Into<String>, rows: Vec<Row>) {
        self.sources.insert(source.into(), rows);
    }

    /// Append one row to `source`.
    pub fn push_row(&self, source: &str, row: Row) {
        self.sources.entry(source.to_string()).or_default().push(row);
    }

    /// Queue an error for the next query against `source`.
    pub fn fail_next(&self, source: &str, error: BackingError) {
        self.scripted_failures
            .entry(source.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail every query with `error` until [`clear_failures`](Self::clear_failures).
    pub fn fail_always(&self, error: BackingError) {
        *self.fail_all.lock() = Some(error);
    }

    /// Drop all scripted and permanent failures.
    pub fn clear_failures(&self) {
        *self.fail_all.lock() = None;
        self.scripted_failures.clear();
        self.offline.store(false, Ordering::Release);
    }

    /// Simulate a dropped connection on every query.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Delay every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Total queries received (including failed ones).
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Acquire)
    }

    /// Queries received for one source.
    #[must_use]
    pub fn calls_for(&self, source: &str) -> u64 {
        self.calls_by_source.get(source).map_or(0, |c| *c)
    }

    /// Reset call counters.
    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::Release);
        self.calls_by_source.clear();
    }

    #[must_use]
    pub fn len(&self, source: &str) -> usize {
        self.sources.get(source).map_or(0, |rows| rows.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.iter().all(|entry| entry.value().is_empty())
    }

    fn next_failure(&self, source: &str) -> Option<BackingError> {
        if let Some(err) = self.fail_all.lock().clone() {
            return Some(err);
        }
        if self.offline.load(Ordering::Acquire) {
            return Some(BackingError::Network("connection refused".into()));
        }
        self.scripted_failures
            .get_mut(source)
            .and_then(|mut queue| queue.pop_front())
    }
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a `column=value` filter. Anything else is rejected.
fn parse_filter(filter: &str) -> Result<(&str, &str), BackingError> {
    let (column, value) = filter
        .split_once('=')
        .ok_or_else(|| BackingError::InvalidQuery(format!("expected column=value, got '{}'", filter)))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(BackingError::InvalidQuery("empty filter column".into()));
    }
    Ok((column, value.trim()))
}

fn matches_filter(row: &Row, column: &str, expected: &str) -> bool {
    match row.get(column) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    async fn query(&self, source: &str, filter: Option<&str>) -> Result<Vec<Row>, BackingError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        *self.calls_by_source.entry(source.to_string()).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.next_failure(source) {
            return Err(err);
        }

        let rows = self
            .sources
            .get(source)
            .map(|rows| rows.value().clone())
            .ok_or_else(|| BackingError::NotFound(source.to_string()))?;

        match filter {
            None => Ok(rows),
            Some(expr) => {
                let (column, value) = parse_filter(expr)?;
                Ok(rows.into_iter().filter(|row| matches_filter(row, column, value)).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = InMemoryBackingStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len("materials"), 0);
    }

    #[tokio::test]
    async fn test_query_returns_rows() {
        let store = InMemoryBackingStore::new();
        store.set_rows("materials", vec![row(json!({"id": "m-1", "name": "Steel"}))]);

        let rows = store.query("materials", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Steel");
        assert_eq!(store.calls(), 1);
        assert_eq!(store.calls_for("materials"), 1);
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_found() {
        let store = InMemoryBackingStore::new();
        let err = store.query("nope", None).await.unwrap_err();
        assert_eq!(err, BackingError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_filter_by_column() {
        let store = InMemoryBackingStore::new();
        store.push_row("materials", row(json!({"id": "a", "category": "Metal"})));
        store.push_row("materials", row(json!({"id": "b", "category": "Wood"})));
        store.push_row("materials", row(json!({"id": "c", "category": "Metal", "score": 4})));

        let metals = store.query("materials", Some("category = Metal")).await.unwrap();
        assert_eq!(metals.len(), 2);

        let scored = store.query("materials", Some("score=4")).await.unwrap();
        assert_eq!(scored.len(), 1);

        let err = store.query("materials", Some("garbage")).await.unwrap_err();
        assert!(matches!(err, BackingError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let store = InMemoryBackingStore::new();
        store.set_rows("materials", vec![]);
        store.fail_next("materials", BackingError::Network("reset".into()));
        store.fail_next("materials", BackingError::Overloaded("busy".into()));

        assert!(matches!(store.query("materials", None).await, Err(BackingError::Network(_))));
        assert!(matches!(store.query("materials", None).await, Err(BackingError::Overloaded(_))));
        assert!(store.query("materials", None).await.is_ok());
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn test_fail_always_and_clear() {
        let store = InMemoryBackingStore::new();
        store.set_rows("materials", vec![]);
        store.fail_always(BackingError::Status { code: 500, message: "down".into() });

        for _ in 0..3 {
            assert!(store.query("materials", None).await.is_err());
        }

        store.clear_failures();
        assert!(store.query("materials", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_simulation() {
        let store = InMemoryBackingStore::new();
        store.set_rows("materials", vec![]);
        store.set_offline(true);
        assert!(matches!(store.query("materials", None).await, Err(BackingError::Network(_))));
        store.set_offline(false);
        assert!(store.query("materials", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryBackingStore::new());
        store.set_rows("materials", vec![row(json!({"id": "m"}))]);

        let mut handles = vec![];
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store.query("materials", None).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.calls(), 100);
        assert_eq!(store.calls_for("materials"), 100);
    }

    #[tokio::test]
    async fn test_reset_calls() {
        let store = InMemoryBackingStore::new();
        store.set_rows("materials", vec![row(json!({"id": "m"}))]);
        store.query("materials", None).await.unwrap();
        store.query("materials", None).await.unwrap();
        assert_eq!(store.calls(), 2);

        store.reset_calls();
        assert_eq!(store.calls(), 0);
        assert_eq!(store.calls_for("materials"), 0);
    }
}
