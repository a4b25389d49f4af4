//! Pluggable propagation policy of a medium.
//!
//! An arbitrator decides whether a receiver can lock onto a transmission,
//! how overlapping transmissions merge into one delivered byte, and what
//! power reaches the receiver.

use std::sync::Arc;

use super::medium::{ReceiverInfo, Transmission};
use super::types::ChannelByte;

/// Ambient noise assumed when no noise trace is configured, in dBm.
pub const DEFAULT_NOISE_DBM: f64 = -95.0;

pub trait Arbitrator: Send + Sync {
    fn lock_transmission(&self, receiver: &ReceiverInfo, transmission: &Transmission, millis: u64) -> bool;

    /// Combine the bytes of all overlapping transmissions at `bit`.
    ///
    /// # Panics
    ///
    /// Implementations panic if `transmissions` is empty.
    fn merge_transmissions(&self, receiver: &ReceiverInfo, transmissions: &[Arc<Transmission>], bit: i64, millis: u64) -> ChannelByte;

    /// Power of `transmission` at the receiver, in dBm.
    fn compute_received_power(&self, transmission: &Transmission, receiver: &ReceiverInfo, millis: u64) -> f64;

    /// Ambient noise at simulated millisecond `millis`, in dBm.
    fn noise(&self, millis: u64) -> f64;
}

/// Merge bytes that overlapped on the air.
///
/// The delivered value is the wired-OR of every byte. The corruption mask
/// has a bit set wherever any two bytes disagree, which is the OR of each
/// byte XOR-ed with the first; the result does not depend on input order.
///
/// # Panics
///
/// Panics if `bytes` yields nothing.
pub fn merge_bytes<I: IntoIterator<Item = u8>>(bytes: I) -> ChannelByte {
    let mut bytes = bytes.into_iter();
    let first = bytes.next().expect("merging zero transmissions");
    let (value, corruption) = bytes.fold((first, 0u8), |(value, corruption), next| (value | next, corruption | (next ^ first)));
    ChannelByte::new(value, corruption)
}

/// Lossless channel: every transmission locks and arrives at full strength.
#[derive(Debug, Clone, Copy)]
pub struct BasicArbitrator {
    pub received_power: f64,
    pub noise: f64,
}

impl Default for BasicArbitrator {
    fn default() -> Self {
        BasicArbitrator {
            received_power: 0.0,
            noise: DEFAULT_NOISE_DBM,
        }
    }
}

impl Arbitrator for BasicArbitrator {
    fn lock_transmission(&self, _receiver: &ReceiverInfo, _transmission: &Transmission, _millis: u64) -> bool {
        true
    }

    fn merge_transmissions(&self, _receiver: &ReceiverInfo, transmissions: &[Arc<Transmission>], bit: i64, _millis: u64) -> ChannelByte {
        assert!(!transmissions.is_empty(), "merging zero transmissions");
        merge_bytes(transmissions.iter().map(|t| t.byte_at_bit(bit)))
    }

    fn compute_received_power(&self, _transmission: &Transmission, _receiver: &ReceiverInfo, _millis: u64) -> f64 {
        self.received_power
    }

    fn noise(&self, _millis: u64) -> f64 {
        self.noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_is_clean() {
        assert_eq!(merge_bytes([0x5A]), ChannelByte::clean(0x5A));
    }

    #[test]
    fn disagreeing_bits_are_flagged() {
        let merged = merge_bytes([0b1100_1010, 0b1010_1010]);
        assert_eq!(merged.corrupted_bits(), 0b0110_0000);
        assert_eq!(merged.value(), 0b1110_1010);
        // Agreeing bits carry the common value.
        assert_eq!(merged.value() & !merged.corrupted_bits(), 0b1000_1010);
    }

    #[test]
    fn identical_bytes_do_not_corrupt() {
        assert!(!merge_bytes([0x33, 0x33, 0x33]).is_corrupted());
    }

    #[test]
    fn three_way_merge_is_order_independent() {
        let a = merge_bytes([0x0F, 0x0F, 0x1F]);
        let b = merge_bytes([0x1F, 0x0F, 0x0F]);
        let c = merge_bytes([0x0F, 0x1F, 0x0F]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.corrupted_bits(), 0x10);
    }

    #[test]
    #[should_panic(expected = "merging zero transmissions")]
    fn merging_nothing_is_a_bug() {
        let _ = merge_bytes(std::iter::empty());
    }
}
