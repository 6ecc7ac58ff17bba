// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the resolution engine.
//!
//! Component-internal failures ([`FetchError`]) are data by the time they
//! reach the facade: strategies record them, the resolver logs them and
//! degrades. Only [`ResolveError::Timeout`] on a caller-supplied deadline
//! escapes to a caller.

use std::time::Duration;
use thiserror::Error;

use crate::backing::traits::BackingError;
use crate::scheduler::TimeoutStage;

/// Coarse error class, used for retry decisions, notification throttling
/// and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Timeout,
    ResourceExhausted,
    NotFound,
    Validation,
    CircuitOpen,
    Offline,
    Capacity,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ResourceExhausted => "resource_exhausted",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::CircuitOpen => "circuit_open",
            Self::Offline => "offline",
            Self::Capacity => "capacity",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one fetch against one endpoint.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("backing store error on '{endpoint}': {source}")]
    Backing {
        endpoint: String,
        #[source]
        source: BackingError,
    },

    #[error("'{endpoint}' timed out after {after:?} while {stage}")]
    Timeout {
        endpoint: String,
        after: Duration,
        stage: TimeoutStage,
    },

    #[error("scheduler queue full ({capacity} tickets)")]
    QueueFull { capacity: usize },

    #[error("circuit open for '{endpoint}', request rejected")]
    CircuitOpen { endpoint: String },

    #[error("network unavailable")]
    Offline,

    #[error("operation on '{endpoint}' aborted: {reason}")]
    Aborted { endpoint: String, reason: String },
}

impl FetchError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Backing { source, .. } => source.category(),
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::QueueFull { .. } => ErrorCategory::Capacity,
            Self::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            Self::Offline => ErrorCategory::Offline,
            Self::Aborted { .. } => ErrorCategory::Network,
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Network and overload failures are retryable, and so is a dispatched
    /// call that overran its timeout. A ticket that timed out in the queue,
    /// validation, not-found, open circuits, offline and capacity errors are
    /// terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { stage, .. } => *stage == TimeoutStage::Running,
            _ => matches!(
                self.category(),
                ErrorCategory::Network | ErrorCategory::ResourceExhausted
            ),
        }
    }
}

/// Error surfaced by the resolver facade.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A caller-specified deadline elapsed before resolution finished.
    #[error("resolution exceeded its deadline of {deadline:?}")]
    Timeout { deadline: Duration },
}

/// Failure loading or saving a persisted cache snapshot.
///
/// Persistence is advisory: callers log these and carry on.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot backend error: {0}")]
    Backend(String),

    #[error("snapshot encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Invalid resolver configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing(source: BackingError) -> FetchError {
        FetchError::Backing { endpoint: "materials".into(), source }
    }

    fn timeout(stage: TimeoutStage) -> FetchError {
        FetchError::Timeout { endpoint: "materials".into(), after: Duration::from_millis(100), stage }
    }

    #[test]
    fn test_slow_dispatched_call_is_retryable() {
        assert!(timeout(TimeoutStage::Running).is_retryable());
        assert!(!timeout(TimeoutStage::Queued).is_retryable());
        assert_eq!(timeout(TimeoutStage::Running).category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(backing(BackingError::Network("reset".into())).is_retryable());
        assert!(backing(BackingError::Overloaded("slow down".into())).is_retryable());
        assert!(backing(BackingError::Status { code: 502, message: "bad gateway".into() }).is_retryable());

        assert!(!backing(BackingError::NotFound("materials".into())).is_retryable());
        assert!(!backing(BackingError::InvalidQuery("bad filter".into())).is_retryable());
        assert!(!timeout(TimeoutStage::Queued).is_retryable());
        assert!(!FetchError::CircuitOpen { endpoint: "x".into() }.is_retryable());
        assert!(!FetchError::Offline.is_retryable());
        assert!(!FetchError::QueueFull { capacity: 4 }.is_retryable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(backing(BackingError::Overloaded("x".into())).category(), ErrorCategory::ResourceExhausted);
        assert_eq!(backing(BackingError::Status { code: 404, message: String::new() }).category(), ErrorCategory::NotFound);
        assert_eq!(FetchError::Offline.category(), ErrorCategory::Offline);
        assert_eq!(ErrorCategory::ResourceExhausted.to_string(), "resource_exhausted");
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::Timeout {
            endpoint: "materials_view".into(),
            after: Duration::from_millis(250),
            stage: TimeoutStage::Queued,
        };
        assert_eq!(err.to_string(), "'materials_view' timed out after 250ms while queued");

        let err = ResolveError::Timeout { deadline: Duration::from_secs(2) };
        assert!(err.to_string().contains("deadline"));
    }
}
