//! Delayed operation queue
//!
//! Confirmation polls wait here until their fire time. The queue is a
//! min-heap on `(fire_at, insertion sequence)`, so popping due entries is
//! correct for any mix of delays, and entries due at the same instant come
//! out in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

use crate::operation::Operation;

struct Delayed {
    fire_at: Instant,
    sequence: u64,
    op: Operation,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.sequence == other.sequence
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest fire time, then lowest
        // sequence, must compare greatest
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Operations scheduled to be submitted later
#[derive(Default)]
pub struct DelayedQueue {
    heap: BinaryHeap<Delayed>,
    sequence: u64,
}

impl DelayedQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an operation until its fire time
    ///
    /// An operation without a fire time is due immediately.
    pub fn push(&mut self, op: Operation, now: Instant) {
        let fire_at = op.fire_at().unwrap_or(now);
        self.sequence += 1;
        self.heap.push(Delayed {
            fire_at,
            sequence: self.sequence,
            op,
        });
    }

    /// Remove every operation whose fire time has passed, earliest first
    ///
    /// Stops at the first entry that is not yet due.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Operation> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|d| d.fire_at <= now) {
            if let Some(entry) = self.heap.pop() {
                let mut op = entry.op;
                op.mark_released();
                due.push(op);
            }
        }
        due
    }

    /// Earliest pending fire time
    pub fn next_fire_at(&self) -> Option<Instant> {
        self.heap.peek().map(|d| d.fire_at)
    }

    /// Time until the earliest entry is due (zero if overdue)
    pub fn next_wait(&self, now: Instant) -> Option<Duration> {
        self.next_fire_at()
            .map(|fire_at| fire_at.saturating_duration_since(now))
    }

    /// Remove everything, in no particular order
    pub fn drain(&mut self) -> Vec<Operation> {
        self.heap.drain().map(|d| d.op).collect()
    }

    /// Number of parked operations
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is parked
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl std::fmt::Debug for DelayedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedQueue")
            .field("len", &self.heap.len())
            .field("next_fire_at", &self.next_fire_at())
            .finish()
    }
}
