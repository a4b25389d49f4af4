//! Type definitions shared by the channel engine.
//!
//! Contains:
//! - Cycle and node identifiers
//! - The corruption-annotated byte delivered to receivers
//! - Medium construction parameters and the per-endpoint timing derived from them

use serde::Deserialize;

/// A point in simulated time, counted in cycles of the owning node's clock.
pub type Cycle = u64;

/// Identity of a simulated node. Transmitter and receiver of one radio share it.
pub type NodeId = u32;

/// Number of bits in one byte on the air.
pub const BYTE_SIZE: i64 = 8;

/// One unit of data delivered by the channel.
///
/// The low 8 bits hold the best-guess received byte, the high 8 bits hold a
/// corruption mask with a bit set wherever overlapping transmissions
/// disagreed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelByte(u16);

impl ChannelByte {
    pub const fn new(value: u8, corruption: u8) -> Self {
        ChannelByte(((corruption as u16) << 8) | value as u16)
    }

    /// A byte received from exactly one transmission.
    pub const fn clean(value: u8) -> Self {
        ChannelByte(value as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        ChannelByte(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn value(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub const fn corrupted_bits(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn is_corrupted(self) -> bool {
        self.corrupted_bits() != 0
    }
}

/// Immutable parameters of a shared medium.
///
/// Lengths are expressed in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MediumConfig {
    pub bits_per_second: u32,
    /// Quiet ramp-up time before the first deliverable bit, in bits.
    pub lead_bits: u32,
    pub min_length: usize,
    pub max_length: usize,
}

impl MediumConfig {
    /// 2.4 GHz IEEE 802.15.4 transceiver (O-QPSK, 250 kbps).
    pub const CC2420: MediumConfig = MediumConfig {
        bits_per_second: 250_000,
        lead_bits: 48,
        min_length: 1,
        max_length: 128,
    };

    /// Sub-GHz FSK transceiver (19.2 kbps Manchester).
    pub const CC1000: MediumConfig = MediumConfig {
        bits_per_second: 19_200,
        lead_bits: 4,
        min_length: 1,
        max_length: 128,
    };
}

/// Cycle constants an endpoint derives once from its clock and medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub cycles_per_bit: u64,
    pub cycles_per_byte: u64,
    pub lead_cycles: u64,
}

impl Timing {
    /// # Panics
    ///
    /// Panics if the clock is not strictly faster than the medium bit rate.
    pub fn new(hz: u64, config: &MediumConfig) -> Self {
        let bps = config.bits_per_second as u64;
        assert!(hz > bps, "clock of {} Hz cannot drive a {} bps medium", hz, bps);
        let cycles_per_bit = hz / bps;
        Timing {
            cycles_per_bit,
            cycles_per_byte: BYTE_SIZE as u64 * cycles_per_bit,
            lead_cycles: config.lead_bits as u64 * hz / bps,
        }
    }

    /// Index of the bit on the air at `time`.
    pub fn bit_num(&self, time: Cycle) -> i64 {
        (time / self.cycles_per_bit) as i64
    }

    /// First cycle of `bit`. Negative bit indices map to cycle 0.
    pub fn cycle_time(&self, bit: i64) -> Cycle {
        bit.max(0) as u64 * self.cycles_per_bit
    }
}
