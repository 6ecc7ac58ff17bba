// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded, prioritized request scheduling.
//!
//! Every outbound backing-store operation passes through the
//! [`RequestScheduler`], which caps concurrency globally and per endpoint.
//!
//! ```text
//! submit(endpoint, priority, timeout, op)
//!       │
//!       ├─→ room under both ceilings → occupy slot, run now
//!       │
//!       └─→ otherwise → ticket into High / Normal / Low FIFO
//!                           │
//!              slot freed → dispatch: first eligible ticket,
//!                           scanning High → Normal → Low
//! ```
//!
//! Counters change only inside the scheduler's critical section. A slot is
//! an RAII guard: dropping it decrements the counters and re-runs dispatch.
//!
//! # Deadlines
//!
//! A submission whose deadline passes while queued is removed from its
//! queue. One whose deadline passes while running gets a timeout; the
//! operation itself keeps its slot and runs to completion on its own task.

mod queue;
mod types;

pub use types::{Priority, ScheduleError, SchedulerConfig, SchedulerStats, TimeoutStage};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use queue::{PriorityQueues, Ticket};

/// Bounded-concurrency scheduler. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queues: PriorityQueues,
    active: usize,
    active_by_endpoint: HashMap<String, usize>,
    next_seq: u64,
    peak_active: usize,
    peak_by_endpoint: HashMap<String, usize>,
    dispatched_from_queue: u64,
    timeouts: u64,
}

/// A held concurrency slot. Released on drop.
pub struct Slot {
    inner: Arc<Inner>,
    endpoint: String,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.inner.release(&self.endpoint);
    }
}

/// Removes a still-queued ticket if its waiter goes away.
struct QueuedTicket {
    inner: Arc<Inner>,
    seq: u64,
    priority: Priority,
    armed: bool,
}

impl Drop for QueuedTicket {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.state.lock();
        if state.queues.remove(self.priority, self.seq) {
            trace!(seq = self.seq, priority = %self.priority, "Cancelled ticket removed from queue");
            crate::metrics::set_scheduler_queued(state.queues.len());
        }
        // Otherwise it was already dispatched: the granted slot is dropped
        // with the channel and releases itself.
    }
}

/// Result of trying to take a slot without waiting.
enum Admission {
    Granted(Slot),
    Queued(u64, oneshot::Receiver<Slot>),
}

impl Inner {
    fn has_room(&self, state: &State, endpoint: &str) -> bool {
        state.active < self.config.global_limit
            && state.active_by_endpoint.get(endpoint).copied().unwrap_or(0) < self.config.per_endpoint_limit
    }

    fn occupy(state: &mut State, endpoint: &str) {
        state.active += 1;
        state.peak_active = state.peak_active.max(state.active);

        let count = state.active_by_endpoint.entry(endpoint.to_string()).or_insert(0);
        *count += 1;
        let current = *count;
        let peak = state.peak_by_endpoint.entry(endpoint.to_string()).or_insert(0);
        *peak = (*peak).max(current);

        crate::metrics::set_scheduler_active(endpoint, current);
    }

    fn release(self: &Arc<Self>, endpoint: &str) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            let remaining = match state.active_by_endpoint.get_mut(endpoint) {
                Some(count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                state.active_by_endpoint.remove(endpoint);
            }
            crate::metrics::set_scheduler_active(endpoint, remaining);
        }
        self.dispatch();
    }

    /// Hand freed capacity to queued tickets.
    ///
    /// Grants are collected under the lock and delivered after it is
    /// released: a grant whose waiter is gone comes back as an `Err(slot)`,
    /// and dropping that slot re-enters `release`.
    fn dispatch(self: &Arc<Self>) {
        let grants = {
            let mut state = self.state.lock();
            let mut grants = Vec::new();

            while state.active < self.config.global_limit && !state.queues.is_empty() {
                let per_endpoint = self.config.per_endpoint_limit;
                let State { queues, active_by_endpoint, .. } = &mut *state;
                let next = queues.pop_eligible(|endpoint| {
                    active_by_endpoint.get(endpoint).copied().unwrap_or(0) < per_endpoint
                });
                let Some(ticket) = next else { break };

                Self::occupy(&mut state, &ticket.endpoint);
                state.dispatched_from_queue += 1;
                crate::metrics::record_ticket_wait(ticket.priority.as_str(), ticket.enqueued_at.elapsed());
                debug!(
                    seq = ticket.seq,
                    endpoint = %ticket.endpoint,
                    priority = %ticket.priority,
                    "Dispatching queued ticket"
                );

                let slot = Slot {
                    inner: Arc::clone(self),
                    endpoint: ticket.endpoint.clone(),
                };
                grants.push((ticket.grant, slot));
            }

            crate::metrics::set_scheduler_queued(state.queues.len());
            grants
        };

        for (grant, slot) in grants {
            if let Err(orphaned) = grant.send(slot) {
                drop(orphaned);
            }
        }
    }
}

impl RequestScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let config = SchedulerConfig {
            global_limit: config.global_limit.max(1),
            per_endpoint_limit: config.per_endpoint_limit.max(1),
            max_queued: config.max_queued,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    fn admit(&self, endpoint: &str, priority: Priority) -> Result<Admission, ScheduleError<()>> {
        let mut state = self.inner.state.lock();

        // Dispatch runs whenever capacity frees, so no queued ticket is
        // eligible here; taking free room directly cannot overtake one.
        if self.inner.has_room(&state, endpoint) {
            Inner::occupy(&mut state, endpoint);
            return Ok(Admission::Granted(Slot {
                inner: Arc::clone(&self.inner),
                endpoint: endpoint.to_string(),
            }));
        }

        if let Some(capacity) = self.inner.config.max_queued {
            if state.queues.len() >= capacity {
                return Err(ScheduleError::QueueFull { capacity });
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let (grant, rx) = oneshot::channel();
        state.queues.push(Ticket {
            seq,
            endpoint: endpoint.to_string(),
            priority,
            enqueued_at: Instant::now(),
            grant,
        });
        crate::metrics::set_scheduler_queued(state.queues.len());
        trace!(seq, endpoint, priority = %priority, "Ticket queued");

        Ok(Admission::Queued(seq, rx))
    }

    /// Wait for a slot on `endpoint`.
    ///
    /// Fails immediately with `QueueFull` when the hard cap is reached.
    /// Dropping the returned future while queued removes the ticket.
    pub async fn acquire(&self, endpoint: &str, priority: Priority) -> Result<Slot, ScheduleError<()>> {
        let (seq, rx) = match self.admit(endpoint, priority)? {
            Admission::Granted(slot) => return Ok(slot),
            Admission::Queued(seq, rx) => (seq, rx),
        };

        let mut ticket = QueuedTicket {
            inner: Arc::clone(&self.inner),
            seq,
            priority,
            armed: true,
        };
        let granted = rx.await;
        ticket.armed = false;

        granted.map_err(|_| ScheduleError::Aborted {
            endpoint: endpoint.to_string(),
            reason: "ticket dropped before dispatch".into(),
        })
    }

    /// Run `operation` under a slot on `endpoint`, bounded by `timeout`.
    ///
    /// The timeout covers both the wait for a slot and the operation itself.
    /// Operation errors come back unchanged in [`ScheduleError::Operation`].
    pub async fn submit<F, Fut, T, E>(
        &self,
        endpoint: &str,
        priority: Priority,
        timeout: Duration,
        operation: F,
    ) -> Result<T, ScheduleError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let deadline = Instant::now() + timeout;

        let slot = match timeout_at(deadline, self.acquire(endpoint, priority)).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(err)) => return Err(Self::widen(err)),
            Err(_) => return Err(self.timed_out(endpoint, timeout, TimeoutStage::Queued)),
        };

        let fut = operation();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            fut.await
        });

        match timeout_at(deadline, handle).await {
            Ok(Ok(result)) => result.map_err(ScheduleError::Operation),
            Ok(Err(join_err)) => Err(ScheduleError::Aborted {
                endpoint: endpoint.to_string(),
                reason: join_err.to_string(),
            }),
            // The detached task finishes on its own and frees the slot
            Err(_) => Err(self.timed_out(endpoint, timeout, TimeoutStage::Running)),
        }
    }

    fn widen<E>(err: ScheduleError<()>) -> ScheduleError<E> {
        match err {
            ScheduleError::Timeout { endpoint, after, stage } => ScheduleError::Timeout { endpoint, after, stage },
            ScheduleError::QueueFull { capacity } => ScheduleError::QueueFull { capacity },
            ScheduleError::Aborted { endpoint, reason } => ScheduleError::Aborted { endpoint, reason },
            ScheduleError::Operation(()) => ScheduleError::Aborted {
                endpoint: String::new(),
                reason: "slot acquisition failed".into(),
            },
        }
    }

    fn timed_out<E>(&self, endpoint: &str, after: Duration, stage: TimeoutStage) -> ScheduleError<E> {
        self.inner.state.lock().timeouts += 1;
        crate::metrics::record_ticket_timeout(endpoint, &stage.to_string());
        debug!(endpoint, ?after, stage = %stage, "Scheduled operation timed out");
        ScheduleError::Timeout {
            endpoint: endpoint.to_string(),
            after,
            stage,
        }
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        SchedulerStats {
            active: state.active,
            active_by_endpoint: state.active_by_endpoint.clone(),
            queued: state.queues.len(),
            queued_by_priority: state.queues.len_by_priority(),
            peak_active: state.peak_active,
            peak_by_endpoint: state.peak_by_endpoint.clone(),
            dispatched_from_queue: state.dispatched_from_queue,
            timeouts: state.timeouts,
        }
    }

    /// Reset peak counters to the current activity.
    pub fn reset_peaks(&self) {
        let mut state = self.inner.state.lock();
        state.peak_active = state.active;
        state.peak_by_endpoint = state.active_by_endpoint.clone();
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
