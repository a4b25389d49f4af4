//! Cross-node causality barrier.
//!
//! Nodes run on their own threads with independent clocks. Before a receiver
//! scans the shared transmission list it asks the synchronizer to block until
//! every other node has advanced far enough that no earlier transmission can
//! still appear.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, PoisonError};

use super::types::{Cycle, NodeId};

pub trait Synchronizer: Send + Sync {
    /// Block the calling node until all other registered nodes have reached
    /// at least `time`.
    fn wait_for_neighbors(&self, node: NodeId, time: Cycle);
}

/// Barrier over the published clock of every registered node.
///
/// A published value is a promise: the node has completed every event
/// scheduled strictly before it.
#[derive(Debug, Default)]
pub struct ClockBarrier {
    clocks: Mutex<HashMap<NodeId, Cycle>>,
    progressed: Condvar,
}

impl ClockBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: NodeId) {
        let mut clocks = self.clocks.lock().unwrap_or_else(PoisonError::into_inner);
        clocks.entry(node).or_insert(0);
    }

    /// Publish progress of `node`. Published times never move backwards.
    pub fn advance(&self, node: NodeId, time: Cycle) {
        let mut clocks = self.clocks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = clocks.entry(node).or_insert(0);
        if time > *entry {
            *entry = time;
            drop(clocks);
            self.progressed.notify_all();
        }
    }

    /// Stop waiting on `node`, typically because it finished its run.
    pub fn remove_node(&self, node: NodeId) {
        let mut clocks = self.clocks.lock().unwrap_or_else(PoisonError::into_inner);
        if clocks.remove(&node).is_some() {
            log::debug!("Node {} left the clock barrier", node);
        }
        drop(clocks);
        self.progressed.notify_all();
    }

    pub fn published(&self, node: NodeId) -> Option<Cycle> {
        let clocks = self.clocks.lock().unwrap_or_else(PoisonError::into_inner);
        clocks.get(&node).copied()
    }

    pub fn node_count(&self) -> usize {
        self.clocks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Synchronizer for ClockBarrier {
    fn wait_for_neighbors(&self, node: NodeId, time: Cycle) {
        let clocks = self.clocks.lock().unwrap_or_else(PoisonError::into_inner);
        let _clocks = self
            .progressed
            .wait_while(clocks, |clocks| clocks.iter().any(|(id, t)| *id != node && *t < time))
            .unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lone_node_never_blocks() {
        let barrier = ClockBarrier::new();
        barrier.add_node(1);
        barrier.wait_for_neighbors(1, 1_000_000);
    }

    #[test]
    fn published_time_is_monotonic() {
        let barrier = ClockBarrier::new();
        barrier.add_node(1);
        barrier.advance(1, 50);
        barrier.advance(1, 20);
        assert_eq!(barrier.published(1), Some(50));
    }

    #[test]
    fn waiter_released_by_neighbor_progress() {
        let barrier = Arc::new(ClockBarrier::new());
        barrier.add_node(1);
        barrier.add_node(2);
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                barrier.wait_for_neighbors(1, 100);
                released.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!released.load(Ordering::SeqCst));
        barrier.advance(2, 99);
        thread::sleep(Duration::from_millis(20));
        assert!(!released.load(Ordering::SeqCst));
        barrier.advance(2, 100);
        waiter.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn removing_a_node_releases_waiters() {
        let barrier = Arc::new(ClockBarrier::new());
        barrier.add_node(1);
        barrier.add_node(2);
        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for_neighbors(1, 500))
        };
        thread::sleep(Duration::from_millis(10));
        barrier.remove_node(2);
        waiter.join().unwrap();
        assert_eq!(barrier.node_count(), 1);
    }
}
