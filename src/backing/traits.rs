// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ErrorCategory;

/// One opaque key-value row as returned by a query surface.
pub type Row = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackingError {
    #[error("connection failed: {0}")]
    Network(String),
    #[error("unexpected status {code}: {message}")]
    Status { code: u16, message: String },
    #[error("backing store overloaded: {0}")]
    Overloaded(String),
    #[error("query surface not found: {0}")]
    NotFound(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl BackingError {
    /// Map to the engine's error taxonomy.
    ///
    /// 429/503 mean the store is shedding load; other 5xx are transient;
    /// 404 is not-found; remaining 4xx are treated as validation failures.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::Overloaded(_) => ErrorCategory::ResourceExhausted,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::InvalidQuery(_) => ErrorCategory::Validation,
            Self::Status { code, .. } => match code {
                429 | 503 => ErrorCategory::ResourceExhausted,
                404 => ErrorCategory::NotFound,
                400..=499 => ErrorCategory::Validation,
                _ => ErrorCategory::Network,
            },
        }
    }
}

/// Client for the remote material data surfaces (tables and views).
///
/// One call is one logical query; retries, scheduling and timeouts are
/// layered on top by the resolver.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Query `source` (a table or view name) with an optional filter expression.
    async fn query(&self, source: &str, filter: Option<&str>) -> Result<Vec<Row>, BackingError>;
}
