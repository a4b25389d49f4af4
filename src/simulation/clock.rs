//! Per-node virtual clock and cooperative event queue.
//!
//! Every simulated node owns one `NodeClock`. Events are kept in a min-heap
//! keyed by cycle; events scheduled for the same cycle fire in insertion
//! order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::types::Cycle;

/// Callbacks a node can schedule on its own clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    /// Transmitter byte boundary.
    TransmitTick,
    /// Receiver scan or byte delivery.
    ReceiveTick,
    /// Crystal oscillator finished starting up.
    OscillatorStable,
    /// Progress heartbeat published to the synchronizer.
    Synchronize,
    /// Application-defined timer.
    App(u32),
}

#[derive(Debug)]
struct ScheduledEvent {
    time: Cycle,
    seq: u64,
    event: NodeEvent,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that BinaryHeap pops the earliest event first.
        other.time.cmp(&self.time).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct NodeClock {
    hz: u64,
    now: Cycle,
    next_seq: u64,
    queue: BinaryHeap<ScheduledEvent>,
}

impl NodeClock {
    pub fn new(hz: u64) -> Self {
        NodeClock {
            hz,
            now: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
        }
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }

    pub fn now(&self) -> Cycle {
        self.now
    }

    /// Schedule `event` to fire `delta` cycles from now.
    pub fn insert_event(&mut self, event: NodeEvent, delta: Cycle) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledEvent {
            time: self.now + delta,
            seq,
            event,
        });
    }

    /// Cancel every pending instance of `event`. Returns how many were removed.
    pub fn remove_event(&mut self, event: NodeEvent) -> usize {
        let before = self.queue.len();
        self.queue.retain(|e| e.event != event);
        before - self.queue.len()
    }

    pub fn next_event_time(&self) -> Option<Cycle> {
        self.queue.peek().map(|e| e.time)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pop the earliest event if it is due at or before `limit`, advancing
    /// the clock to its time.
    pub fn pop_until(&mut self, limit: Cycle) -> Option<NodeEvent> {
        if self.queue.peek()?.time > limit {
            return None;
        }
        let next = self.queue.pop()?;
        self.now = self.now.max(next.time);
        Some(next.event)
    }

    /// Move the clock forward without firing anything. Never moves it back.
    pub fn advance_to(&mut self, time: Cycle) {
        self.now = self.now.max(time);
    }

    pub fn cycles_to_millis(&self, cycles: Cycle) -> u64 {
        (cycles as u128 * 1000 / self.hz as u128) as u64
    }

    pub fn millis(&self) -> u64 {
        self.cycles_to_millis(self.now)
    }

    pub fn millis_to_cycles(&self, millis: u64) -> Cycle {
        (millis as u128 * self.hz as u128 / 1000) as Cycle
    }

    pub fn micros_to_cycles(&self, micros: u64) -> Cycle {
        (micros as u128 * self.hz as u128 / 1_000_000) as Cycle
    }
}
