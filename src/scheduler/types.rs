//! Public types for the request scheduler.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::error::FetchError;

/// Priority class of a submission.
///
/// High tickets are dispatched before Normal before Low whenever a slot frees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    High = 0,
    Normal = 1,
    Low = 2,
}

impl Priority {
    /// All tiers in dispatch order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concurrency ceilings for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum operations in flight across all endpoints
    pub global_limit: usize,
    /// Maximum operations in flight against one endpoint
    pub per_endpoint_limit: usize,
    /// Hard cap on queued tickets; `None` = unbounded
    pub max_queued: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_limit: 8,
            per_endpoint_limit: 3,
            max_queued: None,
        }
    }
}

/// Where a submission was when its deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// Still waiting for a slot; the ticket was removed from its queue
    Queued,
    /// Dispatched; the operation keeps running but its result is discarded
    Running,
}

impl std::fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Error type for scheduled operations
#[derive(Debug, Error)]
pub enum ScheduleError<E> {
    #[error("'{endpoint}' timed out after {after:?} while {stage}")]
    Timeout {
        endpoint: String,
        after: Duration,
        stage: TimeoutStage,
    },

    /// Rejected synchronously: the queue is at its hard cap
    #[error("scheduler queue full ({capacity} tickets)")]
    QueueFull { capacity: usize },

    /// The operation ran and failed; its error is passed through unchanged
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    /// The operation's task panicked or was cancelled
    #[error("operation on '{endpoint}' aborted: {reason}")]
    Aborted { endpoint: String, reason: String },
}

impl From<ScheduleError<FetchError>> for FetchError {
    fn from(err: ScheduleError<FetchError>) -> Self {
        match err {
            ScheduleError::Timeout { endpoint, after, stage } => FetchError::Timeout { endpoint, after, stage },
            ScheduleError::QueueFull { capacity } => FetchError::QueueFull { capacity },
            ScheduleError::Operation(inner) => inner,
            ScheduleError::Aborted { endpoint, reason } => FetchError::Aborted { endpoint, reason },
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub active: usize,
    pub active_by_endpoint: HashMap<String, usize>,
    pub queued: usize,
    /// Queued tickets per tier, indexed by [`Priority::index`]
    pub queued_by_priority: [usize; 3],
    /// Highest number of simultaneously active operations observed
    pub peak_active: usize,
    /// Highest per-endpoint active count observed
    pub peak_by_endpoint: HashMap<String, usize>,
    /// Tickets that waited in a queue and were later dispatched
    pub dispatched_from_queue: u64,
    pub timeouts: u64,
}
