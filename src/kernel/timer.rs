//! Timer System
//!
//! Two pieces:
//! - `PeriodicTimer`: the loop's tick, kept as an absolute deadline so that
//!   early wakeups (input arriving) never push the next tick back
//! - `TimerQueue`: deadline-ordered one-shot timers carrying a payload,
//!   used by the callback back end to store continuations
//!
//! Time is a `Duration` since the poller's origin, never wall-clock.

use slab::Slab;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

/// The loop's periodic tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTimer {
    period: Duration,
    deadline: Duration,
}

impl PeriodicTimer {
    /// Arm a timer that first fires one period after `now`
    pub fn new(period: Duration, now: Duration) -> Self {
        Self {
            period,
            deadline: now + period,
        }
    }

    /// Re-arm for exactly one full period from `now`
    pub fn rearm(&mut self, now: Duration) {
        self.deadline = now + self.period;
    }

    /// Time left until the deadline, clamped at zero
    pub fn remaining(&self, now: Duration) -> Duration {
        self.deadline.saturating_sub(now)
    }

    pub fn is_due(&self, now: Duration) -> bool {
        now >= self.deadline
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

/// Handle for a scheduled timer
///
/// Slots are reused, so the sequence number tells a live timer from a
/// stale handle to a slot that has since been recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    slot: usize,
    seq: u64,
}

#[derive(Debug)]
struct Slot<T> {
    seq: u64,
    payload: T,
}

/// Entry in the timer heap (for ordering)
#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline: Duration,
    seq: u64,
    slot: usize,
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest deadline first, then FIFO among equal deadlines
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Timer queue - one-shot timers ordered by deadline
#[derive(Debug)]
pub struct TimerQueue<T> {
    /// Min-heap of timer entries (cancelled entries are skipped lazily)
    heap: BinaryHeap<Reverse<TimerEntry>>,
    /// Live timers
    slots: Slab<Slot<T>>,
    next_seq: u64,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            slots: Slab::new(),
            next_seq: 0,
        }
    }

    /// Schedule `payload` to come due at `deadline`
    pub fn schedule(&mut self, deadline: Duration, payload: T) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = self.slots.insert(Slot { seq, payload });
        self.heap.push(Reverse(TimerEntry { deadline, seq, slot }));

        TimerId { slot, seq }
    }

    /// Cancel a pending timer, handing back its payload
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        if !self.is_pending(id) {
            return None;
        }
        Some(self.slots.remove(id.slot).payload)
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Duration) -> Vec<(TimerId, T)> {
        let mut due = Vec::new();
        while let Some(entry) = self.pop_next(now) {
            due.push(entry);
        }
        due
    }

    /// Remove and return the earliest timer due at `now`, if any
    pub fn pop_next(&mut self, now: Duration) -> Option<(TimerId, T)> {
        self.discard_stale();

        let Reverse(entry) = self.heap.peek()?;
        if entry.deadline > now {
            return None;
        }
        let Reverse(entry) = self.heap.pop()?;

        let id = TimerId {
            slot: entry.slot,
            seq: entry.seq,
        };
        Some((id, self.slots.remove(id.slot).payload))
    }

    /// Deadline of the earliest live timer
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_stale();
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Time until the next timer fires, clamped at zero
    pub fn time_until_next(&mut self, now: Duration) -> Option<Duration> {
        self.next_deadline().map(|deadline| deadline.saturating_sub(now))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.slots.get(id.slot).map(|s| s.seq == id.seq).unwrap_or(false)
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            let id = TimerId {
                slot: entry.slot,
                seq: entry.seq,
            };
            if self.is_pending(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
