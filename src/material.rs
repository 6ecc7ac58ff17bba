// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Material record data structure.
//!
//! The [`MaterialRecord`] is the core data unit that flows through the resolver.
//! Every record handed to a caller is complete: missing source fields are filled
//! with the defaults below when raw rows are decoded, never left undefined.
//!
//! # Example
//!
//! ```
//! use material_resolver::{MaterialRecord, Provenance};
//!
//! let record = MaterialRecord::new("m-1", "Ready-mix concrete", 0.13);
//! assert_eq!(record.unit, "kg");
//! assert_eq!(record.sustainability_score, 50);
//! assert!(!record.is_degraded());
//! assert_eq!(record.provenance, Provenance::Fallback);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name used when a source supplies none.
pub const DEFAULT_NAME: &str = "Unknown Material";
/// Conservative carbon intensity (kgCO2e per unit) used when a factor is absent or invalid.
pub const DEFAULT_FACTOR: f64 = 1.0;
pub const DEFAULT_UNIT: &str = "kg";
pub const DEFAULT_REGION: &str = "Global";
pub const DEFAULT_CATEGORY: &str = "General";
/// Neutral midpoint of the 0-100 sustainability scale.
pub const DEFAULT_SUSTAINABILITY_SCORE: u8 = 50;
/// Prefix marking ids assigned by the resolver rather than a source.
pub const SYNTHETIC_ID_PREFIX: &str = "synthetic-";

/// Recyclability class of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Recyclability {
    High,
    #[default]
    Medium,
    Low,
}

impl Recyclability {
    /// Parse a loosely formatted source value ("high", " LOW ", "med").
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "h" => Some(Self::High),
            "medium" | "med" | "m" | "moderate" => Some(Self::Medium),
            "low" | "l" | "none" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Recyclability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
        }
    }
}

/// Which tier produced a record.
///
/// Carried for observability only; business logic never branches on it,
/// except that [`Provenance::Fallback`] marks degraded data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Provenance {
    /// Restored from a persisted snapshot (live origin unknown).
    Cache,
    /// Fetched live by the named strategy.
    Network { strategy: String },
    /// Curated static default or synthesized record.
    Fallback,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Network { strategy } => write!(f, "network:{}", strategy),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// A validated carbon-factor record for one material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    /// Stable identifier, unique within its source
    pub id: String,
    /// Display name (never empty)
    pub name: String,
    /// Carbon intensity in kgCO2e per `unit` (finite, >= 0)
    pub factor: f64,
    pub unit: String,
    pub region: String,
    pub category: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// 0-100
    pub sustainability_score: u8,
    pub recyclability: Recyclability,
    /// Id of the record this material can substitute for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_to: Option<String>,
    #[serde(default)]
    pub notes: String,
    pub provenance: Provenance,
}

impl MaterialRecord {
    /// Create a record with defaults for every optional field.
    ///
    /// The factor and name are sanitized; provenance starts as
    /// [`Provenance::Fallback`] until a producer stamps its own.
    pub fn new(id: impl Into<String>, name: impl Into<String>, factor: f64) -> Self {
        Self {
            id: id.into(),
            name: sanitize_name(Some(name.into())),
            factor: sanitize_factor(Some(factor)),
            unit: DEFAULT_UNIT.to_string(),
            region: DEFAULT_REGION.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            tags: BTreeSet::new(),
            sustainability_score: DEFAULT_SUSTAINABILITY_SCORE,
            recyclability: Recyclability::default(),
            alternative_to: None,
            notes: String::new(),
            provenance: Provenance::Fallback,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: u8) -> Self {
        self.sustainability_score = score.min(100);
        self
    }

    #[must_use]
    pub fn with_recyclability(mut self, recyclability: Recyclability) -> Self {
        self.recyclability = recyclability;
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    #[must_use]
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    /// True when the record came from static defaults rather than a live source.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.provenance, Provenance::Fallback)
    }

    /// True when the id was assigned by the resolver (source row had none).
    #[must_use]
    pub fn has_synthetic_id(&self) -> bool {
        self.id.is_empty() || self.id.starts_with(SYNTHETIC_ID_PREFIX)
    }

    /// Normalized name used for identity comparison.
    #[must_use]
    pub fn name_key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Check the caller-facing invariants.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.factor.is_finite()
            && self.factor >= 0.0
            && !self.name.trim().is_empty()
            && self.sustainability_score <= 100
    }
}

/// Lowercase, whitespace-collapsed form used for id and name matching.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Replace an absent or blank name with [`DEFAULT_NAME`].
#[must_use]
pub fn sanitize_name(raw: Option<String>) -> String {
    match raw {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => DEFAULT_NAME.to_string(),
    }
}

/// Replace an absent, negative or non-finite factor with [`DEFAULT_FACTOR`].
///
/// Zero is kept: it is valid, if suspicious.
#[must_use]
pub fn sanitize_factor(raw: Option<f64>) -> f64 {
    match raw {
        Some(f) if f.is_finite() && f >= 0.0 => f,
        _ => DEFAULT_FACTOR,
    }
}

/// Clamp a raw score into 0-100, defaulting to the neutral midpoint.
#[must_use]
pub fn sanitize_score(raw: Option<f64>) -> u8 {
    match raw {
        Some(s) if s.is_finite() => s.round().clamp(0.0, 100.0) as u8,
        _ => DEFAULT_SUSTAINABILITY_SCORE,
    }
}
