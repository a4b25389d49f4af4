//! Shared radio medium and the transmissions travelling through it.
//!
//! The medium owns the list of live transmissions. Every scan or append
//! happens under one mutex; each transmission's growing byte buffer sits
//! behind its own lock so a transmitter can keep appending while receivers
//! read.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::arbitrator::{Arbitrator, BasicArbitrator};
use super::synchronizer::Synchronizer;
use super::types::{BYTE_SIZE, Cycle, MediumConfig, NodeId, Timing};

/// Receiver attributes an arbitrator may inspect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiverInfo {
    pub id: NodeId,
    /// Tuned frequency in MHz.
    pub frequency: f64,
}

#[derive(Debug)]
struct TransmissionBody {
    data: Vec<u8>,
    last_bit: i64,
    end: Cycle,
}

/// One radio burst.
#[derive(Debug)]
pub struct Transmission {
    origin: NodeId,
    start: Cycle,
    first_bit: i64,
    power: f64,
    frequency: f64,
    body: Mutex<TransmissionBody>,
}

impl Transmission {
    fn new(origin: NodeId, timing: &Timing, start: Cycle, power: f64, frequency: f64, capacity: usize) -> Self {
        Transmission {
            origin,
            start,
            first_bit: timing.bit_num(start + timing.lead_cycles),
            power,
            frequency,
            body: Mutex::new(TransmissionBody {
                data: Vec::with_capacity(capacity),
                last_bit: i64::MAX,
                end: Cycle::MAX,
            }),
        }
    }

    fn body(&self) -> MutexGuard<'_, TransmissionBody> {
        self.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn origin(&self) -> NodeId {
        self.origin
    }

    pub fn start(&self) -> Cycle {
        self.start
    }

    /// `Cycle::MAX` while the transmission is ongoing.
    pub fn end(&self) -> Cycle {
        self.body().end
    }

    pub fn first_bit(&self) -> i64 {
        self.first_bit
    }

    /// `i64::MAX` until the transmitter stops appending bytes.
    pub fn last_bit(&self) -> i64 {
        self.body().last_bit
    }

    /// Transmit power in dBm.
    pub fn power(&self) -> f64 {
        self.power
    }

    /// Carrier frequency in MHz.
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn len(&self) -> usize {
        self.body().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> Vec<u8> {
        self.body().data.clone()
    }

    pub(crate) fn append(&self, byte: u8) {
        self.body().data.push(byte);
    }

    /// Freeze the bit range at the bytes sent so far.
    pub(crate) fn seal(&self) {
        let mut body = self.body();
        if body.last_bit == i64::MAX {
            body.last_bit = self.first_bit + body.data.len() as i64 * BYTE_SIZE;
        }
    }

    /// Record the byte-aligned cycle at which the transmitter went idle.
    pub(crate) fn finish(&self, end: Cycle) {
        self.seal();
        self.body().end = end;
    }

    /// True if `bit` falls inside this transmission's deliverable range.
    pub fn intersects(&self, bit: i64) -> bool {
        bit >= self.first_bit && bit < self.last_bit()
    }

    /// The eight bits on the air starting at `bit`.
    ///
    /// Receivers are not bit-aligned with the transmitter, so a window may
    /// straddle two bytes. Bytes not yet produced read as zero.
    pub fn byte_at_bit(&self, bit: i64) -> u8 {
        let offset = bit - self.first_bit;
        if offset < 0 {
            return 0;
        }
        let body = self.body();
        let byte = |i: usize| body.data.get(i).copied().unwrap_or(0);
        let shift = (offset % BYTE_SIZE) as u32;
        let index = (offset / BYTE_SIZE) as usize;
        let hi = byte(index) << shift;
        if shift > 0 {
            hi | byte(index + 1) >> (BYTE_SIZE as u32 - shift)
        } else {
            hi
        }
    }
}

pub struct Medium {
    config: MediumConfig,
    arbitrator: Box<dyn Arbitrator>,
    synchronizer: Option<Arc<dyn Synchronizer>>,
    transmissions: Mutex<Vec<Arc<Transmission>>>,
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Medium")
            .field("config", &self.config)
            .field("synchronized", &self.synchronizer.is_some())
            .field("transmissions", &self.active_transmissions())
            .finish()
    }
}

impl Medium {
    /// A private medium with the lossless arbitrator and no synchronizer.
    pub fn new(config: MediumConfig) -> Self {
        Self::with_arbitrator(config, Box::new(BasicArbitrator::default()), None)
    }

    pub fn with_arbitrator(
        config: MediumConfig,
        arbitrator: Box<dyn Arbitrator>,
        synchronizer: Option<Arc<dyn Synchronizer>>,
    ) -> Self {
        Medium {
            config,
            arbitrator,
            synchronizer,
            transmissions: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &MediumConfig {
        &self.config
    }

    pub fn arbitrator(&self) -> &dyn Arbitrator {
        self.arbitrator.as_ref()
    }

    fn transmissions(&self) -> MutexGuard<'_, Vec<Arc<Transmission>>> {
        self.transmissions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a transmission whose first bit lies one lead time after `now`
    /// and publish it to every receiver.
    pub fn new_transmission(&self, origin: NodeId, timing: &Timing, now: Cycle, power: f64, frequency: f64) -> Arc<Transmission> {
        let transmission = Arc::new(Transmission::new(origin, timing, now, power, frequency, self.config.max_length));
        self.transmissions().push(Arc::clone(&transmission));
        log::trace!(
            "Node {} opened transmission at cycle {} (first bit {}, {:.1} dBm, {:.0} MHz)",
            origin,
            now,
            transmission.first_bit,
            power,
            frequency
        );
        transmission
    }

    /// Earliest lockable transmission whose first bit is not yet behind `bit`.
    ///
    /// Transmissions that ended more than `8 + 2 × lead_bits` bits before
    /// `bit` are dropped from the medium as a side effect.
    pub(crate) fn earliest_new_transmission(&self, receiver: &ReceiverInfo, bit: i64, millis: u64) -> Option<Arc<Transmission>> {
        let stale_before = bit - BYTE_SIZE - 2 * self.config.lead_bits as i64;
        let mut earliest: Option<Arc<Transmission>> = None;
        self.transmissions().retain(|t| {
            if t.origin == receiver.id {
                return t.last_bit() >= stale_before;
            }
            if bit <= t.first_bit && self.arbitrator.lock_transmission(receiver, t, millis) {
                if earliest.as_ref().is_none_or(|e| t.first_bit < e.first_bit) {
                    earliest = Some(Arc::clone(t));
                }
                true
            } else {
                t.last_bit() >= stale_before
            }
        });
        earliest
    }

    /// Transmissions from other nodes covering `bit`, in creation order.
    pub(crate) fn intersection(&self, receiver: NodeId, bit: i64) -> Vec<Arc<Transmission>> {
        self.transmissions()
            .iter()
            .filter(|t| t.origin != receiver && t.intersects(bit))
            .cloned()
            .collect()
    }

    pub fn wait_for_neighbors(&self, node: NodeId, time: Cycle) {
        if let Some(synchronizer) = &self.synchronizer {
            synchronizer.wait_for_neighbors(node, time);
        }
    }

    pub fn active_transmissions(&self) -> usize {
        self.transmissions().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HZ: u64 = 8_000_000;

    fn timing() -> Timing {
        Timing::new(HZ, &MediumConfig::CC2420)
    }

    fn transmission_with(data: &[u8]) -> Transmission {
        let t = Transmission::new(1, &timing(), 0, 0.0, 2405.0, 128);
        for b in data {
            t.append(*b);
        }
        t
    }

    #[test]
    fn first_bit_is_one_lead_time_after_start() {
        let t = Transmission::new(1, &timing(), 320, 0.0, 2405.0, 128);
        assert_eq!(t.first_bit(), (320 + 1536) / 32);
        assert_eq!(t.last_bit(), i64::MAX);
        assert_eq!(t.end(), Cycle::MAX);
    }

    #[test]
    fn aligned_byte_lookup() {
        let t = transmission_with(&[0x12, 0x34, 0x56]);
        let first = t.first_bit();
        assert_eq!(t.byte_at_bit(first), 0x12);
        assert_eq!(t.byte_at_bit(first + 8), 0x34);
        assert_eq!(t.byte_at_bit(first + 16), 0x56);
        assert_eq!(t.byte_at_bit(first + 24), 0x00);
    }

    #[test]
    fn misaligned_lookup_stitches_adjacent_bytes() {
        let t = transmission_with(&[0b1010_1100, 0b1111_0000]);
        let first = t.first_bit();
        assert_eq!(t.byte_at_bit(first + 3), 0b0110_0111);
        assert_eq!(t.byte_at_bit(first + 4), 0b1100_1111);
        assert_eq!(t.byte_at_bit(first - 1), 0);
    }

    #[test]
    fn seal_fixes_last_bit_at_bytes_sent() {
        let t = transmission_with(&[1, 2, 3]);
        assert!(t.intersects(t.first_bit() + 1000));
        t.finish(4242);
        assert_eq!(t.last_bit(), t.first_bit() + 24);
        assert_eq!(t.end(), 4242);
        assert!(t.intersects(t.first_bit() + 23));
        assert!(!t.intersects(t.first_bit() + 24));
        assert!(!t.intersects(t.first_bit() - 1));
        t.append(9);
        t.seal();
        assert_eq!(t.last_bit(), t.first_bit() + 24);
    }

    #[test]
    fn earliest_candidate_and_pruning() {
        let medium = Medium::new(MediumConfig::CC2420);
        let timing = timing();
        let old = medium.new_transmission(2, &timing, 0, 0.0, 2405.0);
        old.append(0xAA);
        old.finish(256);
        let later = medium.new_transmission(3, &timing, 64_000, 0.0, 2405.0);
        let sooner = medium.new_transmission(4, &timing, 32_000, 0.0, 2405.0);
        assert_eq!(medium.active_transmissions(), 3);

        let info = ReceiverInfo { id: 1, frequency: 2405.0 };
        let found = medium.earliest_new_transmission(&info, 100, 0).unwrap();
        assert!(Arc::ptr_eq(&found, &sooner));
        // `old` ended at bit 56; 100 - 8 - 96 is not past it yet.
        assert_eq!(medium.active_transmissions(), 3);

        let found = medium.earliest_new_transmission(&info, 600, 0).unwrap();
        assert!(Arc::ptr_eq(&found, &sooner));
        assert_eq!(medium.active_transmissions(), 2);
        let overlapping = medium.intersection(1, sooner.first_bit());
        assert_eq!(overlapping.len(), 1);
        assert!(Arc::ptr_eq(&overlapping[0], &sooner));
        assert_eq!(medium.intersection(1, later.first_bit()).len(), 2);
    }

    #[test]
    fn own_transmissions_are_invisible() {
        let medium = Medium::new(MediumConfig::CC2420);
        let t = medium.new_transmission(1, &timing(), 0, 0.0, 2405.0);
        let info = ReceiverInfo { id: 1, frequency: 2405.0 };
        assert!(medium.earliest_new_transmission(&info, 0, 0).is_none());
        assert!(medium.intersection(1, t.first_bit()).is_empty());
        assert_eq!(medium.intersection(2, t.first_bit()).len(), 1);
    }
}
