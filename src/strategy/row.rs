//! Strict, fully-optional decoding of backing-store rows.
//!
//! Rows arrive as dynamically shaped JSON objects. They are decoded into
//! [`RawMaterialRow`] right at the strategy boundary; everything past that
//! point works with [`MaterialRecord`] only.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::backing::Row;
use crate::material::{
    sanitize_factor, sanitize_name, sanitize_score, MaterialRecord, Provenance, Recyclability, DEFAULT_CATEGORY,
    DEFAULT_REGION, DEFAULT_UNIT, SYNTHETIC_ID_PREFIX,
};

/// A source row with every field optional.
///
/// Numbers and strings are accepted interchangeably; values of the wrong
/// shape decode as absent rather than failing the row.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawMaterialRow {
    #[serde(alias = "material_id", deserialize_with = "lenient_string")]
    pub id: Option<String>,

    #[serde(alias = "material_name", deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(
        alias = "carbon_factor",
        alias = "emission_factor",
        alias = "embodied_carbon",
        deserialize_with = "lenient_f64"
    )]
    pub factor: Option<f64>,

    #[serde(deserialize_with = "lenient_string")]
    pub unit: Option<String>,

    #[serde(deserialize_with = "lenient_string")]
    pub region: Option<String>,

    #[serde(alias = "material_category", deserialize_with = "lenient_string")]
    pub category: Option<String>,

    #[serde(deserialize_with = "lenient_tags")]
    pub tags: Option<BTreeSet<String>>,

    #[serde(alias = "score", deserialize_with = "lenient_f64")]
    pub sustainability_score: Option<f64>,

    #[serde(deserialize_with = "lenient_string")]
    pub recyclability: Option<String>,

    #[serde(alias = "alternative_for", deserialize_with = "lenient_string")]
    pub alternative_to: Option<String>,

    #[serde(alias = "description", deserialize_with = "lenient_string")]
    pub notes: Option<String>,
}

impl RawMaterialRow {
    /// Decode one backing-store row.
    ///
    /// Fails only when the row names the same field twice under different
    /// aliases (e.g. both `factor` and `carbon_factor`).
    pub fn decode(row: &Row) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(row.clone()))
    }

    /// Fill defaults and stamp provenance.
    ///
    /// `index` is the row's position in its strategy's result, used to
    /// build a synthetic id when the row has none.
    #[must_use]
    pub fn into_record(self, strategy: &str, index: usize) -> MaterialRecord {
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => format!("{}{}-{}", SYNTHETIC_ID_PREFIX, strategy, index),
        };

        if self.factor == Some(0.0) {
            debug!(strategy, id = %id, "Source reported a zero carbon factor");
        }

        MaterialRecord {
            name: sanitize_name(self.name),
            factor: sanitize_factor(self.factor),
            unit: non_blank(self.unit).unwrap_or_else(|| DEFAULT_UNIT.to_string()),
            region: non_blank(self.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            category: non_blank(self.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            tags: self.tags.unwrap_or_default(),
            sustainability_score: sanitize_score(self.sustainability_score),
            recyclability: self
                .recyclability
                .as_deref()
                .and_then(Recyclability::parse)
                .unwrap_or_default(),
            alternative_to: non_blank(self.alternative_to),
            notes: self.notes.unwrap_or_default(),
            provenance: Provenance::Network { strategy: strategy.to_string() },
            id,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Tags come either as an array or as one comma-separated string.
fn lenient_tags<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BTreeSet<String>>, D::Error> {
    let split = |s: &str| -> BTreeSet<String> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    };

    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Some(Value::String(s)) => Some(split(&s)),
        _ => None,
    })
}
