// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ordered execution of every fetch strategy, with union and dedup.
//!
//! Each strategy call goes through three layers, outermost first:
//!
//! 1. [`RetryPolicy`]: bounded attempts with jittered backoff
//! 2. [`CircuitBreaker`](crate::resilience::CircuitBreaker) for the source
//! 3. [`RequestScheduler`]: global and per-endpoint slots, per-call timeout
//!
//! A strategy that fails after all of that is recorded as a
//! [`StrategyFailure`] and the chain moves on to the next one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::row::RawMaterialRow;
use super::FetchStrategy;
use crate::backing::{BackingStore, Row};
use crate::error::FetchError;
use crate::material::MaterialRecord;
use crate::resilience::{EndpointCircuits, RetryPolicy};
use crate::scheduler::RequestScheduler;

/// A strategy that produced nothing usable.
#[derive(Debug, Clone)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: FetchError,
}

/// Merged result of one chain run.
#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    /// Deduplicated records, in first-seen order
    pub records: Vec<MaterialRecord>,
    /// Strategies that failed, in execution order
    pub failures: Vec<StrategyFailure>,
    /// Names of strategies that answered (possibly with zero rows)
    pub succeeded: Vec<String>,
}

impl ChainOutcome {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Runs every strategy in order and merges their records.
pub struct FetchStrategyChain {
    strategies: Vec<Arc<dyn FetchStrategy>>,
    store: Arc<dyn BackingStore>,
    scheduler: RequestScheduler,
    retry: RetryPolicy,
    circuits: Arc<EndpointCircuits>,
    operation_timeout: Duration,
}

impl FetchStrategyChain {
    pub fn new(
        strategies: Vec<Arc<dyn FetchStrategy>>,
        store: Arc<dyn BackingStore>,
        scheduler: RequestScheduler,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            strategies,
            store,
            scheduler,
            retry,
            circuits: Arc::new(EndpointCircuits::default()),
            operation_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_circuits(mut self, circuits: Arc<EndpointCircuits>) -> Self {
        self.circuits = circuits;
        self
    }

    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn circuits(&self) -> &Arc<EndpointCircuits> {
        &self.circuits
    }

    /// Run all strategies and merge the results.
    ///
    /// Succeeds (possibly with no records) when at least one strategy
    /// answered. Returns the first collected error only when every
    /// strategy failed.
    pub async fn resolve_all(&self) -> Result<ChainOutcome, FetchError> {
        let mut batches = Vec::with_capacity(self.strategies.len());
        let mut outcome = ChainOutcome::default();

        for strategy in &self.strategies {
            match self.run_strategy(strategy.as_ref()).await {
                Ok(records) => {
                    debug!(strategy = %strategy.name(), records = records.len(), "Strategy succeeded");
                    crate::metrics::record_strategy_call(strategy.name(), "success");
                    outcome.succeeded.push(strategy.name().to_string());
                    batches.push(records);
                }
                Err(error) => {
                    warn!(strategy = %strategy.name(), error = %error, "Strategy failed, continuing chain");
                    crate::metrics::record_strategy_call(strategy.name(), "failure");
                    outcome.failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error,
                    });
                }
            }
        }

        if outcome.succeeded.is_empty() && !outcome.failures.is_empty() {
            let first = outcome.failures.swap_remove(0);
            return Err(first.error);
        }

        let total: usize = batches.iter().map(Vec::len).sum();
        outcome.records = dedup_records(batches);
        let dropped = total - outcome.records.len();
        if dropped > 0 {
            debug!(dropped, kept = outcome.records.len(), "Dropped duplicate records across strategies");
            crate::metrics::record_duplicates_dropped(dropped);
        }

        info!(
            records = outcome.records.len(),
            succeeded = outcome.succeeded.len(),
            failed = outcome.failures.len(),
            "Strategy chain complete"
        );
        Ok(outcome)
    }

    async fn run_strategy(&self, strategy: &dyn FetchStrategy) -> Result<Vec<MaterialRecord>, FetchError> {
        let _timer = crate::metrics::LatencyTimer::new("strategy", strategy.name());
        let rows = self.fetch_rows(strategy).await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = 0usize;
        for (index, row) in rows.iter().enumerate() {
            match RawMaterialRow::decode(row) {
                Ok(raw) => records.push(strategy.map_row(raw, index)),
                Err(e) => {
                    rejected += 1;
                    debug!(strategy = %strategy.name(), index, error = %e, "Skipping undecodable row");
                }
            }
        }
        if rejected > 0 {
            warn!(strategy = %strategy.name(), rejected, "Rows rejected during decoding");
            crate::metrics::record_rows_rejected(strategy.name(), rejected);
        }

        Ok(records)
    }

    async fn fetch_rows(&self, strategy: &dyn FetchStrategy) -> Result<Vec<Row>, FetchError> {
        let source = strategy.source().to_string();
        let filter = strategy.filter().map(str::to_string);
        let priority = strategy.priority();
        let circuit = self.circuits.get(&source);

        self.retry
            .run(strategy.name(), || {
                let store = Arc::clone(&self.store);
                let source = source.clone();
                let filter = filter.clone();
                let circuit = Arc::clone(&circuit);
                let scheduler = self.scheduler.clone();
                let timeout = self.operation_timeout;

                async move {
                    circuit
                        .call(|| async move {
                            let endpoint = source.clone();
                            scheduler
                                .submit(&endpoint, priority, timeout, move || async move {
                                    store
                                        .query(&source, filter.as_deref())
                                        .await
                                        .map_err(|e| FetchError::Backing { endpoint: source.clone(), source: e })
                                })
                                .await
                                .map_err(FetchError::from)
                        })
                        .await
                }
            })
            .await
    }
}

/// Union record batches, keeping the first occurrence of each entity.
///
/// Two records are the same entity when their real ids match, or, when
/// either id is synthetic, when their normalized names match.
#[must_use]
pub fn dedup_records<I>(batches: I) -> Vec<MaterialRecord>
where
    I: IntoIterator<Item = Vec<MaterialRecord>>,
{
    let mut real_ids: HashSet<String> = HashSet::new();
    let mut all_names: HashSet<String> = HashSet::new();
    let mut synthetic_names: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for record in batches.into_iter().flatten() {
        let name = record.name_key();
        let duplicate = if record.has_synthetic_id() {
            all_names.contains(&name)
        } else {
            real_ids.contains(&record.id) || synthetic_names.contains(&name)
        };
        if duplicate {
            continue;
        }

        if record.has_synthetic_id() {
            synthetic_names.insert(name.clone());
        } else {
            real_ids.insert(record.id.clone());
        }
        all_names.insert(name);
        merged.push(record);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::{BackingError, InMemoryBackingStore};
    use crate::material::Provenance;
    use crate::resilience::RetryConfig;
    use crate::scheduler::SchedulerConfig;
    use crate::strategy::{default_strategies, TableStrategy, BACKUP_TABLE, PRECOMPUTED_VIEW, PRIMARY_TABLE};
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn chain_over(store: Arc<InMemoryBackingStore>) -> FetchStrategyChain {
        FetchStrategyChain::new(
            default_strategies(),
            store,
            RequestScheduler::new(SchedulerConfig::default()),
            RetryPolicy::new(RetryConfig::test()),
        )
    }

    fn record(id: &str, name: &str) -> MaterialRecord {
        MaterialRecord::new(id, name, 1.0)
    }

    #[test]
    fn test_dedup_by_real_id_first_wins() {
        let a = record("m-1", "Steel").with_score(40);
        let b = record("m-1", "Steel").with_score(90);

        let merged = dedup_records(vec![vec![a], vec![b]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].sustainability_score, 40);
    }

    #[test]
    fn test_dedup_synthetic_ids_match_by_name() {
        let real = record("m-7", "Cross Laminated Timber");
        let synthetic = record("synthetic-backup_table-0", "  cross   laminated timber ");

        let merged = dedup_records(vec![vec![real.clone()], vec![synthetic.clone()]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "m-7");

        // Synthetic first: the later real id with the same name is the same entity
        let merged = dedup_records(vec![vec![synthetic], vec![real]]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].has_synthetic_id());
    }

    #[test]
    fn test_dedup_keeps_distinct_real_ids_with_same_name() {
        let merged = dedup_records(vec![vec![record("m-1", "Glass"), record("m-2", "Glass")]]);
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn test_chain_merges_all_strategies() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_rows(PRIMARY_TABLE, vec![row(json!({"id": "m-1", "name": "Steel", "factor": 1.5, "score": 40}))]);
        store.set_rows(
            PRECOMPUTED_VIEW,
            vec![
                row(json!({"id": "m-1", "name": "Steel", "factor": 1.9, "score": 90})),
                row(json!({"id": "m-2", "name": "Concrete", "factor": 0.12})),
            ],
        );
        store.set_rows(BACKUP_TABLE, vec![row(json!({"name": "Brick", "factor": 0.24}))]);

        let outcome = chain_over(store).resolve_all().await.unwrap();

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m-1", "m-2", "synthetic-backup_table-0"]);
        assert_eq!(outcome.records[0].sustainability_score, 40);
        assert_eq!(outcome.records[0].provenance, Provenance::Network { strategy: "primary_table".into() });

        // dependent view was never populated: NotFound is terminal and recorded
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].strategy, "dependent_view");
        assert!(outcome.is_partial());
    }

    #[tokio::test]
    async fn test_chain_survives_failing_first_strategy() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_rows(PRIMARY_TABLE, vec![]);
        store.set_rows(BACKUP_TABLE, vec![row(json!({"id": "m-9", "name": "Timber"}))]);
        for _ in 0..3 {
            store.fail_next(PRIMARY_TABLE, BackingError::Network("reset".into()));
        }

        let outcome = chain_over(store.clone()).resolve_all().await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.failures.iter().any(|f| f.strategy == "primary_table"));
        assert_eq!(store.calls_for(PRIMARY_TABLE), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_rows(PRIMARY_TABLE, vec![row(json!({"id": "m-1", "name": "Steel"}))]);
        store.fail_next(PRIMARY_TABLE, BackingError::Overloaded("busy".into()));

        let chain = FetchStrategyChain::new(
            vec![Arc::new(TableStrategy::new("primary_table", PRIMARY_TABLE))],
            store.clone(),
            RequestScheduler::default(),
            RetryPolicy::new(RetryConfig::test()),
        );

        let outcome = chain.resolve_all().await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.failures.is_empty());
        assert_eq!(store.calls_for(PRIMARY_TABLE), 2);
    }

    #[tokio::test]
    async fn test_all_failing_returns_first_error() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.fail_always(BackingError::InvalidQuery("bad".into()));

        let err = chain_over(store).resolve_all().await.unwrap_err();
        match err {
            FetchError::Backing { endpoint, source } => {
                assert_eq!(endpoint, PRIMARY_TABLE);
                assert!(matches!(source, BackingError::InvalidQuery(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_but_valid_success() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_rows(PRIMARY_TABLE, vec![]);

        let chain = FetchStrategyChain::new(
            vec![Arc::new(TableStrategy::new("primary_table", PRIMARY_TABLE))],
            store,
            RequestScheduler::default(),
            RetryPolicy::new(RetryConfig::test()),
        );

        let outcome = chain.resolve_all().await.unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.succeeded, vec!["primary_table"]);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let store = Arc::new(InMemoryBackingStore::new());
        store.set_rows(
            PRIMARY_TABLE,
            vec![
                row(json!({"id": "ok", "name": "Glass"})),
                row(json!({"id": "dup", "factor": 1, "carbon_factor": 2})),
            ],
        );

        let chain = FetchStrategyChain::new(
            vec![Arc::new(TableStrategy::new("primary_table", PRIMARY_TABLE))],
            store,
            RequestScheduler::default(),
            RetryPolicy::new(RetryConfig::test()),
        );

        let outcome = chain.resolve_all().await.unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].id, "ok");
    }

    #[test]
    fn test_strategy_names_follow_chain_order() {
        let chain = chain_over(Arc::new(InMemoryBackingStore::new()));
        assert_eq!(
            chain.strategy_names(),
            vec!["primary_table", "precomputed_view", "backup_table", "dependent_view"]
        );
    }
}
