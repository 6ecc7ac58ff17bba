// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Last-resort material data.
//!
//! The [`FallbackProvider`] holds a small curated record set that is always
//! available, and can synthesize a best-effort record for any identifier.
//! Everything it produces carries [`Provenance::Fallback`].

use std::collections::HashMap;
use tracing::debug;

use crate::material::{
    normalize_key, MaterialRecord, Provenance, Recyclability, DEFAULT_CATEGORY, DEFAULT_FACTOR, DEFAULT_NAME,
    DEFAULT_SUSTAINABILITY_SCORE,
};

/// Substring tokens mapped to (category, id of the curated representative).
const CATEGORY_TOKENS: &[(&[&str], &str, &str)] = &[
    (&["aluminium", "aluminum"], "Aluminum", "aluminum"),
    (&["steel", "rebar", "iron"], "Steel", "steel"),
    (&["concrete", "cement", "mortar"], "Concrete", "concrete"),
    (&["timber", "wood", "lumber", "glulam", "plywood", "clt"], "Timber", "timber"),
    (&["glass", "glazing"], "Glass", "glass"),
    (&["insulation", "wool", "foam", "eps", "xps"], "Insulation", "insulation"),
    (&["brick", "masonry", "block"], "Masonry", "brick"),
    (&["copper"], "Metal", "copper"),
    (&["gypsum", "plaster"], "Finishes", "plasterboard"),
];

/// The curated static set.
fn curated() -> Vec<MaterialRecord> {
    use Recyclability::{High, Low, Medium};

    let entry = |id: &str, name: &str, factor: f64, category: &str, score: u8, recyclability: Recyclability| {
        MaterialRecord::new(id, name, factor)
            .with_category(category)
            .with_score(score)
            .with_recyclability(recyclability)
            .with_tags(["default"])
            .with_provenance(Provenance::Fallback)
    };

    vec![
        entry("concrete", "Concrete", 0.13, "Concrete", 45, Medium),
        entry("steel", "Steel", 1.55, "Steel", 55, High),
        entry("timber", "Timber", 0.45, "Timber", 70, Medium),
        entry("glass", "Glass", 1.44, "Glass", 50, High),
        entry("insulation", "Mineral Wool Insulation", 1.28, "Insulation", 50, Low),
        entry("brick", "Brick", 0.24, "Masonry", 55, Medium),
        entry("aluminum", "Aluminum", 8.24, "Aluminum", 40, High),
        entry("rebar", "Reinforcing Steel", 1.99, "Steel", 50, High),
        entry("cement", "Portland Cement", 0.91, "Concrete", 35, Low),
        entry("copper", "Copper", 2.71, "Metal", 45, High),
        entry("plasterboard", "Plasterboard", 0.39, "Finishes", 55, Medium),
        entry("clt", "Cross Laminated Timber", 0.42, "Timber", 70, Medium).with_notes("Engineered timber panel"),
    ]
}

/// Static defaults and single-record synthesis.
#[derive(Debug, Clone)]
pub struct FallbackProvider {
    records: Vec<MaterialRecord>,
    by_id: HashMap<String, usize>,
}

impl FallbackProvider {
    /// Provider over the built-in curated set.
    #[must_use]
    pub fn new() -> Self {
        Self::with_records(curated())
    }

    /// Provider over a custom static set. Records are re-stamped as fallback.
    #[must_use]
    pub fn with_records(records: Vec<MaterialRecord>) -> Self {
        let records: Vec<MaterialRecord> = records
            .into_iter()
            .map(|r| r.with_provenance(Provenance::Fallback))
            .collect();
        let mut by_id = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            by_id.entry(normalize_key(&record.id)).or_insert(i);
        }
        Self { records, by_id }
    }

    /// The complete static set.
    #[must_use]
    pub fn static_set(&self) -> Vec<MaterialRecord> {
        self.records.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Curated record for `identifier` (case-insensitive), if any.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<MaterialRecord> {
        self.by_id
            .get(&normalize_key(identifier))
            .map(|&i| self.records[i].clone())
    }

    /// Best-effort record for an identifier nothing else resolved.
    ///
    /// The category is guessed from substrings of the identifier; the factor
    /// is borrowed from that category's curated representative.
    #[must_use]
    pub fn synthesize(&self, identifier: &str) -> MaterialRecord {
        let lowered = identifier.to_lowercase();
        let guess = CATEGORY_TOKENS
            .iter()
            .find(|(tokens, _, _)| tokens.iter().any(|t| lowered.contains(t)));

        let (category, factor) = match guess {
            Some((_, category, representative)) => {
                let factor = self
                    .lookup(representative)
                    .map_or(DEFAULT_FACTOR, |r| r.factor);
                (category.to_string(), factor)
            }
            None => (DEFAULT_CATEGORY.to_string(), DEFAULT_FACTOR),
        };

        debug!(identifier, category = %category, factor, "Synthesized fallback record");
        crate::metrics::record_synthesized(&category);

        MaterialRecord::new(identifier, display_name(identifier), factor)
            .with_category(category)
            .with_score(DEFAULT_SUSTAINABILITY_SCORE)
            .with_notes("Synthesized default; no source data available")
            .with_provenance(Provenance::Fallback)
    }
}

impl Default for FallbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// "recycled-steel_beam" → "Recycled Steel Beam".
fn display_name(identifier: &str) -> String {
    let words: Vec<String> = identifier
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        words.join(" ")
    }
}
