// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! User-facing error notifications, throttled per error category.
//!
//! At most one notification per [`ErrorCategory`] is forwarded per cooldown
//! window. Throttling only affects what reaches the notifier; it is
//! independent of retry counting.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::error::ErrorCategory;

/// Receiver of user-facing advisories (toast, banner, status line...).
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, category: ErrorCategory, message: &str);
}

/// Default notifier: a structured warning in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl ErrorNotifier for TracingNotifier {
    fn notify(&self, category: ErrorCategory, message: &str) {
        if category == ErrorCategory::ResourceExhausted {
            warn!(category = %category, "Material data service is overloaded: {}", message);
        } else {
            warn!(category = %category, "Material data unavailable: {}", message);
        }
    }
}

pub struct NotificationThrottle {
    notifier: Arc<dyn ErrorNotifier>,
    cooldown: Duration,
    last_sent: DashMap<ErrorCategory, Instant>,
    sent: AtomicU64,
    suppressed: AtomicU64,
}

impl NotificationThrottle {
    /// Default cooldown between notifications of the same category.
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

    pub fn new(cooldown: Duration) -> Self {
        Self::with_notifier(Arc::new(TracingNotifier), cooldown)
    }

    pub fn with_notifier(notifier: Arc<dyn ErrorNotifier>, cooldown: Duration) -> Self {
        Self {
            notifier,
            cooldown,
            last_sent: DashMap::new(),
            sent: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Offer a notification. Returns whether it was forwarded.
    pub fn notify(&self, category: ErrorCategory, message: &str) -> bool {
        let now = Instant::now();
        let forward = match self.last_sent.entry(category) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < self.cooldown {
                    false
                } else {
                    last.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        };

        if forward {
            self.sent.fetch_add(1, Ordering::Relaxed);
            self.notifier.notify(category, message);
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
        }
        crate::metrics::record_notification(category.as_str(), forward);
        forward
    }

    /// Notifications forwarded so far.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Notifications swallowed by the cooldown.
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COOLDOWN)
    }
}
