//! Bounded byte queue between the framer and the firmware interface.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct ByteFifo {
    capacity: usize,
    bytes: VecDeque<u8>,
    saved: Option<VecDeque<u8>>,
    overflow: bool,
}

impl ByteFifo {
    pub fn new(capacity: usize) -> Self {
        ByteFifo {
            capacity,
            bytes: VecDeque::with_capacity(capacity),
            saved: None,
            overflow: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append `byte`. A full queue drops it and raises the overflow flag.
    pub fn add(&mut self, byte: u8) {
        if self.bytes.len() >= self.capacity {
            self.overflow = true;
            return;
        }
        self.bytes.push_back(byte);
    }

    /// Pop the oldest byte. An empty queue yields 0.
    pub fn remove(&mut self) -> u8 {
        self.bytes.pop_front().unwrap_or(0)
    }

    pub fn peek(&self, index: usize) -> Option<u8> {
        self.bytes.get(index).copied()
    }

    /// Remember the current contents so they can be restored by [`refill`](Self::refill).
    pub fn save_state(&mut self) {
        self.saved = Some(self.bytes.clone());
    }

    /// Restore the contents captured by the last [`save_state`](Self::save_state).
    pub fn refill(&mut self) {
        if let Some(saved) = &self.saved {
            self.bytes = saved.clone();
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.overflow = false;
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_and_flags() {
        let mut fifo = ByteFifo::new(2);
        fifo.add(1);
        fifo.add(2);
        assert!(!fifo.overflowed());
        fifo.add(3);
        assert!(fifo.overflowed());
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.remove(), 1);
        assert_eq!(fifo.remove(), 2);
    }

    #[test]
    fn empty_queue_reads_zero() {
        let mut fifo = ByteFifo::new(4);
        assert_eq!(fifo.remove(), 0);
        assert!(fifo.is_empty());
        fifo.add(7);
        assert_eq!(fifo.remove(), 7);
    }

    #[test]
    fn refill_restores_saved_contents() {
        let mut fifo = ByteFifo::new(8);
        for b in [5, 0xAA, 0xBB] {
            fifo.add(b);
        }
        fifo.save_state();
        fifo.remove();
        fifo.remove();
        assert_eq!(fifo.len(), 1);
        fifo.refill();
        assert_eq!((fifo.remove(), fifo.remove(), fifo.remove()), (5, 0xAA, 0xBB));
    }

    #[test]
    fn peek_leaves_bytes_queued() {
        let mut fifo = ByteFifo::new(8);
        fifo.add(1);
        fifo.add(2);
        assert_eq!(fifo.peek(1), Some(2));
        assert_eq!(fifo.peek(2), None);
        assert_eq!(fifo.len(), 2);
    }
}
