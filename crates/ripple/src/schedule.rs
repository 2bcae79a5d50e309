//! Cooperative timers.
//!
//! Conduits never sleep. They register a deadline with a [`Scheduler`] and
//! the owning flow calls them back when the clock reaches it. [`VirtualClock`]
//! only moves when told to, which keeps every timing test deterministic.

use crate::arena::SlotId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Virtual milliseconds.
pub type Millis = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// A timer that came due.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fired {
    pub timer: TimerId,
    pub owner: SlotId,
    pub at: Millis,
}

pub trait Scheduler {
    fn now(&self) -> Millis;

    /// Register a one-shot timer firing `delay` ms from now on behalf of `owner`.
    fn schedule(&mut self, delay: Millis, owner: SlotId) -> TimerId;

    /// Returns false when the timer already fired or was cancelled.
    fn cancel(&mut self, timer: TimerId) -> bool;

    /// Cancel every pending timer of `owner`.
    fn cancel_owned(&mut self, owner: SlotId) -> usize;
}

#[derive(Debug, Clone)]
struct TimerEntry {
    fire_at_ms: Millis,
    id: TimerId,
    owner: SlotId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at_ms == other.fire_at_ms && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on fire time, then registration order.
        other
            .fire_at_ms
            .cmp(&self.fire_at_ms)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Virtual time clock.
///
/// Time only advances through [`VirtualClock::pop_due`] and
/// [`VirtualClock::advance_to`].
#[derive(Debug, Default)]
pub struct VirtualClock {
    current_time_ms: Millis,
    next_id: u64,
    pending_timers: BinaryHeap<TimerEntry>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its fire time. Timers scheduled while handling a fired timer are seen
    /// by the next call, so cascades resolve within one advance.
    pub fn pop_due(&mut self, until: Millis) -> Option<Fired> {
        if self.pending_timers.peek()?.fire_at_ms > until {
            return None;
        }
        let entry = self.pending_timers.pop()?;
        self.current_time_ms = self.current_time_ms.max(entry.fire_at_ms);
        Some(Fired {
            timer: entry.id,
            owner: entry.owner,
            at: entry.fire_at_ms,
        })
    }

    pub fn advance_to(&mut self, time: Millis) {
        self.current_time_ms = self.current_time_ms.max(time);
    }

    /// Fire everything due within `ms` and return it in firing order.
    pub fn advance_by(&mut self, ms: Millis) -> Vec<Fired> {
        let target = self.current_time_ms + ms;
        let mut fired = Vec::new();
        while let Some(timer) = self.pop_due(target) {
            fired.push(timer);
        }
        self.advance_to(target);
        fired
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.pending_timers.is_empty()
    }

    pub fn time_to_next_timer(&self) -> Option<Millis> {
        self.pending_timers
            .peek()
            .map(|entry| entry.fire_at_ms.saturating_sub(self.current_time_ms))
    }
}

impl Scheduler for VirtualClock {
    fn now(&self) -> Millis {
        self.current_time_ms
    }

    fn schedule(&mut self, delay: Millis, owner: SlotId) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending_timers.push(TimerEntry {
            fire_at_ms: self.current_time_ms + delay,
            id,
            owner,
        });
        id
    }

    fn cancel(&mut self, timer: TimerId) -> bool {
        let before = self.pending_timers.len();
        self.pending_timers.retain(|entry| entry.id != timer);
        self.pending_timers.len() != before
    }

    fn cancel_owned(&mut self, owner: SlotId) -> usize {
        let before = self.pending_timers.len();
        self.pending_timers.retain(|entry| entry.owner != owner);
        before - self.pending_timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn owners(count: usize) -> Vec<SlotId> {
        let mut arena = Arena::new();
        (0..count).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn clock_starts_at_zero() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), 0);
        assert!(!clock.has_pending_timers());
    }

    #[test]
    fn timers_fire_by_time_then_registration() {
        let ids = owners(3);
        let mut clock = VirtualClock::new();
        let late = clock.schedule(200, ids[0]);
        let first = clock.schedule(100, ids[1]);
        let second = clock.schedule(100, ids[2]);

        let fired: Vec<TimerId> = clock.advance_by(250).iter().map(|f| f.timer).collect();
        assert_eq!(fired, vec![first, second, late]);
        assert_eq!(clock.now(), 250);
    }

    #[test]
    fn timers_are_one_shot() {
        let ids = owners(1);
        let mut clock = VirtualClock::new();
        clock.schedule(100, ids[0]);
        assert_eq!(clock.advance_by(100).len(), 1);
        assert!(clock.advance_by(1000).is_empty());
    }

    #[test]
    fn pop_due_moves_the_clock_to_the_fire_time() {
        let ids = owners(1);
        let mut clock = VirtualClock::new();
        clock.schedule(40, ids[0]);
        let fired = clock.pop_due(100).unwrap();
        assert_eq!(fired.at, 40);
        assert_eq!(clock.now(), 40);
        assert_eq!(clock.pop_due(100), None);
    }

    #[test]
    fn cancel_removes_pending_timers() {
        let ids = owners(2);
        let mut clock = VirtualClock::new();
        let a = clock.schedule(10, ids[0]);
        clock.schedule(20, ids[1]);
        clock.schedule(30, ids[1]);

        assert!(clock.cancel(a));
        assert!(!clock.cancel(a));
        assert_eq!(clock.cancel_owned(ids[1]), 2);
        assert!(clock.advance_by(100).is_empty());
    }

    #[test]
    fn time_to_next_timer() {
        let ids = owners(1);
        let mut clock = VirtualClock::new();
        assert_eq!(clock.time_to_next_timer(), None);
        clock.schedule(500, ids[0]);
        clock.advance_by(200);
        assert_eq!(clock.time_to_next_timer(), Some(300));
    }
}
