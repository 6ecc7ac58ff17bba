// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fetch strategies: named ways of querying the backing store.
//!
//! A strategy pairs one query (source + optional filter) with a row adapter.
//! The [`FetchStrategyChain`] runs every strategy in order and merges what
//! they return.
//!
//! ```text
//! primary_table ──┐
//! precomputed_view ─┼─→ decode rows → records → union + dedup → ChainOutcome
//! backup_table ───┤
//! dependent_view ─┘
//! ```

pub mod chain;
pub mod row;

pub use chain::{dedup_records, ChainOutcome, FetchStrategyChain, StrategyFailure};
pub use row::RawMaterialRow;

use std::sync::Arc;

use crate::material::MaterialRecord;
use crate::scheduler::Priority;

/// Primary materials table.
pub const PRIMARY_TABLE: &str = "materials";
/// Precomputed factor view maintained alongside the primary table.
pub const PRECOMPUTED_VIEW: &str = "material_factors_view";
/// Periodically copied backup of the primary table.
pub const BACKUP_TABLE: &str = "materials_backup";
/// View of substitute materials keyed by the material they replace.
pub const DEPENDENT_VIEW: &str = "material_alternatives_view";

/// One way of fetching material rows.
pub trait FetchStrategy: Send + Sync {
    /// Name used for provenance, logging and synthetic ids.
    fn name(&self) -> &str;

    /// Table or view queried.
    fn source(&self) -> &str;

    fn filter(&self) -> Option<&str> {
        None
    }

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Map one decoded row to a record.
    fn map_row(&self, raw: RawMaterialRow, index: usize) -> MaterialRecord {
        raw.into_record(self.name(), index)
    }
}

/// Strategy over a single table or view.
#[derive(Debug, Clone)]
pub struct TableStrategy {
    name: String,
    source: String,
    filter: Option<String>,
    priority: Priority,
    /// Category applied to rows that carry none
    category_hint: Option<String>,
}

impl TableStrategy {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            filter: None,
            priority: Priority::Normal,
            category_hint: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_category_hint(mut self, category: impl Into<String>) -> Self {
        self.category_hint = Some(category.into());
        self
    }
}

impl FetchStrategy for TableStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn map_row(&self, mut raw: RawMaterialRow, index: usize) -> MaterialRecord {
        if raw.category.is_none() {
            raw.category = self.category_hint.clone();
        }
        raw.into_record(&self.name, index)
    }
}

/// The standard chain order: primary, precomputed view, backup, dependents.
#[must_use]
pub fn default_strategies() -> Vec<Arc<dyn FetchStrategy>> {
    vec![
        Arc::new(TableStrategy::new("primary_table", PRIMARY_TABLE).with_priority(Priority::High)),
        Arc::new(TableStrategy::new("precomputed_view", PRECOMPUTED_VIEW)),
        Arc::new(TableStrategy::new("backup_table", BACKUP_TABLE)),
        Arc::new(
            TableStrategy::new("dependent_view", DEPENDENT_VIEW)
                .with_priority(Priority::Low)
                .with_category_hint("Alternative"),
        ),
    ]
}
