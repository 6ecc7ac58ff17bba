//! Network viability as an injected capability.
//!
//! The retry policy asks "is the network currently viable?" before each
//! attempt instead of listening to platform online/offline events.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Narrow query answered by whatever knows the host's connectivity.
pub trait NetworkStatusProvider: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Assumes the network is always reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl NetworkStatusProvider for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Status flipped explicitly by the embedding application (or tests).
#[derive(Debug)]
pub struct ManualNetworkStatus {
    online: AtomicBool,
}

impl ManualNetworkStatus {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self { online: AtomicBool::new(online) }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }
}

impl Default for ManualNetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatusProvider for ManualNetworkStatus {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

/// Subscription form: a publisher owns the `watch::Sender<bool>`.
impl NetworkStatusProvider for watch::Receiver<bool> {
    fn is_online(&self) -> bool {
        *self.borrow()
    }
}
