//! Ticket queues, one FIFO per priority tier.

use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::types::Priority;
use super::Slot;

/// One queued unit of work awaiting a slot.
pub(super) struct Ticket {
    pub seq: u64,
    pub endpoint: String,
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Receives the slot when the ticket is dispatched
    pub grant: oneshot::Sender<Slot>,
}

#[derive(Default)]
pub(super) struct PriorityQueues {
    tiers: [VecDeque<Ticket>; 3],
}

impl PriorityQueues {
    pub fn push(&mut self, ticket: Ticket) {
        self.tiers[ticket.priority.index()].push_back(ticket);
    }

    /// Remove and return the first ticket, scanning High → Normal → Low,
    /// whose endpoint passes `eligible`.
    pub fn pop_eligible(&mut self, mut eligible: impl FnMut(&str) -> bool) -> Option<Ticket> {
        for tier in &mut self.tiers {
            if let Some(pos) = tier.iter().position(|t| eligible(&t.endpoint)) {
                return tier.remove(pos);
            }
        }
        None
    }

    /// Remove a specific ticket (cancelled by its caller). Returns whether it was still queued.
    pub fn remove(&mut self, priority: Priority, seq: u64) -> bool {
        let tier = &mut self.tiers[priority.index()];
        match tier.iter().position(|t| t.seq == seq) {
            Some(pos) => {
                tier.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    pub fn len_by_priority(&self) -> [usize; 3] {
        [self.tiers[0].len(), self.tiers[1].len(), self.tiers[2].len()]
    }
}
