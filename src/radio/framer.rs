//! IEEE 802.15.4 packet framing as performed by CC2420-class chips.
//!
//! On transmit the framer wraps the firmware's TX FIFO contents into
//! `preamble · sync word · length · body · CRC`. On receive it hunts for the
//! sync word in the decoded byte stream, collects the body into the RX FIFO,
//! optionally filters on destination address, checks the CRC and queues an
//! automatic acknowledgement when asked for one.
//!
//! The framer never touches the channel itself. It requests mode changes
//! through [`PacketFramer::take_mode_switch`]; the owning chip applies them
//! once the current byte has been handled.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::ModeSwitch;
use super::fifo::ByteFifo;
use crate::simulation::hooks::{ByteSink, ByteSource};
use crate::simulation::types::ChannelByte;

pub const FIFO_SIZE: usize = 128;

pub const BROADCAST_PAN: u16 = 0xFFFF;
pub const BROADCAST_SHORT: u16 = 0xFFFF;
pub const BROADCAST_LONG: u64 = u64::MAX;

/// Bytes of preamble and sync word that precede every frame.
const HEADER_BYTES: usize = 5;

/// Frame check sequence appended by the chip. Declared lengths up to this
/// carry no body.
const FCS_BYTES: usize = 2;

const FRAME_TYPE_BEACON: u8 = 0;
const FRAME_TYPE_DATA: u8 = 1;
const FRAME_TYPE_ACK: u8 = 2;
const FRAME_TYPE_COMMAND: u8 = 3;

const FCF_SECURITY: u8 = 0x04;
const FCF_FRAME_PENDING: u8 = 0x10;
const FCF_ACK_REQUEST: u8 = 0x20;

const ADDRESS_MODE_SHORT: u8 = 2;
const ADDRESS_MODE_LONG: u8 = 3;

/// Upper bound of the link correlation indicator, indexed by PER percent.
const CORRELATION_MAX: [u8; 101] = [
    110, 109, 109, 109, 107, 107, 107, 107, 107, 107, 107, 107, 103, 102, 102, 102, 101, 101, 101, 101, 99, 94, 92, 94,
    101, 97, 98, 97, 97, 97, 97, 97, 94, 94, 94, 94, 94, 94, 94, 94, 94, 94, 94, 94, 92, 89, 89, 89, 89, 89, 88, 88, 88,
    88, 88, 86, 86, 86, 86, 86, 86, 86, 86, 86, 85, 85, 85, 85, 85, 85, 83, 83, 83, 83, 83, 83, 83, 83, 79, 78, 78, 78,
    78, 78, 76, 76, 76, 74, 74, 74, 74, 74, 74, 74, 74, 74, 74, 66, 65, 65, 65,
];

/// Lower bound of the link correlation indicator, indexed by PER percent.
const CORRELATION_MIN: [u8; 101] = [
    95, 95, 94, 91, 90, 90, 89, 89, 89, 88, 88, 88, 82, 82, 82, 82, 76, 76, 76, 76, 76, 76, 74, 74, 74, 74, 74, 74, 72,
    72, 72, 72, 72, 72, 72, 72, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 69, 67, 67,
    67, 67, 67, 67, 65, 65, 65, 65, 65, 65, 65, 64, 64, 63, 63, 63, 63, 63, 63, 63, 63, 63, 61, 61, 61, 60, 60, 60, 58,
    58, 56, 56, 56, 55, 55, 55, 50, 50, 50, 50, 50, 50, 50,
];

/// One step of the CCITT CRC-16 (polynomial 0x1021, MSB first, zero seed).
pub fn crc_accumulate(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
    }
    crc
}

/// Chip behaviour that the framer needs from the modem registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerConfig {
    /// Zero bytes sent before the sync word.
    pub preamble_length: usize,
    /// Sent low byte first.
    pub sync_word: u16,
    pub auto_crc: bool,
    pub auto_ack: bool,
    pub address_decode: bool,
    pub pan_coordinator: bool,
    pub reserved_frame_mode: bool,
    /// RX FIFO fill level that raises FIFOP.
    pub fifop_threshold: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        FramerConfig {
            preamble_length: 3,
            sync_word: 0xA70F,
            auto_crc: true,
            auto_ack: false,
            address_decode: true,
            pan_coordinator: false,
            reserved_frame_mode: false,
            fifop_threshold: 64,
        }
    }
}

/// Identity used by hardware address recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressFilter {
    pub pan_id: u16,
    pub short_address: u16,
    pub ieee_address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Preamble,
    Sync1,
    Sync2,
    Length,
    Body,
    Crc1,
    Crc2,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Scan,
    SyncMatched1,
    SyncMatched2,
    Body,
    Crc1,
    Crc2,
    End,
    Overflow,
}

/// Frame counters kept for the end-of-run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub frames_sent: u64,
    pub acks_sent: u64,
    pub frames_received: u64,
    pub crc_failures: u64,
    pub frames_rejected: u64,
    pub frames_aborted: u64,
    pub overflows: u64,
    pub underflows: u64,
}

pub struct PacketFramer {
    config: FramerConfig,
    address: AddressFilter,
    tx_fifo: ByteFifo,
    rx_fifo: ByteFifo,

    tx_state: TxState,
    tx_counter: usize,
    tx_length: usize,
    tx_crc: u16,
    was_ack: bool,
    clear_flag: bool,
    tx_underflow: bool,
    underflow_index: Option<usize>,

    rx_state: RxState,
    rx_counter: usize,
    rx_length: usize,
    rx_crc: u16,
    crc_low: u8,
    frame_start: usize,
    send_ack: bool,
    send_ack_pend: bool,
    dsn: u8,

    fifo_pin: bool,
    fifop_pin: bool,
    sfd_pin: bool,

    rssi: u8,
    ber_samples: Vec<f64>,
    rng: StdRng,
    pending: Option<ModeSwitch>,
    stats: FramerStats,
}

impl PacketFramer {
    pub fn new(seed: u64) -> Self {
        PacketFramer {
            config: FramerConfig::default(),
            address: AddressFilter::default(),
            tx_fifo: ByteFifo::new(FIFO_SIZE),
            rx_fifo: ByteFifo::new(FIFO_SIZE),
            tx_state: TxState::Preamble,
            tx_counter: 0,
            tx_length: 0,
            tx_crc: 0,
            was_ack: false,
            clear_flag: false,
            tx_underflow: false,
            underflow_index: None,
            rx_state: RxState::Scan,
            rx_counter: 0,
            rx_length: 0,
            rx_crc: 0,
            crc_low: 0,
            frame_start: 0,
            send_ack: false,
            send_ack_pend: false,
            dsn: 0,
            fifo_pin: false,
            fifop_pin: false,
            sfd_pin: false,
            rssi: 0,
            ber_samples: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            pending: None,
            stats: FramerStats::default(),
        }
    }

    /// Return to power-on state, keeping configuration and counters.
    pub fn reset(&mut self) {
        self.tx_fifo.clear();
        self.rx_fifo.clear();
        self.tx_state = TxState::Preamble;
        self.tx_counter = 0;
        self.was_ack = false;
        self.clear_flag = false;
        self.tx_underflow = false;
        self.underflow_index = None;
        self.rx_state = RxState::Scan;
        self.rx_counter = 0;
        self.send_ack = false;
        self.send_ack_pend = false;
        self.fifo_pin = false;
        self.fifop_pin = false;
        self.sfd_pin = false;
        self.ber_samples.clear();
        self.pending = None;
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: FramerConfig) {
        self.config = config;
    }

    pub fn address(&self) -> &AddressFilter {
        &self.address
    }

    pub fn set_address(&mut self, address: AddressFilter) {
        self.address = address;
    }

    pub fn tx_state(&self) -> TxState {
        self.tx_state
    }

    pub fn rx_state(&self) -> RxState {
        self.rx_state
    }

    pub fn fifo_pin(&self) -> bool {
        self.fifo_pin
    }

    pub fn fifop_pin(&self) -> bool {
        self.fifop_pin
    }

    pub fn sfd_pin(&self) -> bool {
        self.sfd_pin
    }

    pub fn tx_underflow(&self) -> bool {
        self.tx_underflow
    }

    /// Body byte index at which the last transmit underflow happened.
    pub fn underflow_index(&self) -> Option<usize> {
        self.underflow_index
    }

    pub fn rx_overflow(&self) -> bool {
        self.rx_state == RxState::Overflow
    }

    pub fn ack_pending(&self) -> bool {
        self.send_ack || self.send_ack_pend
    }

    /// Sequence number of the last received frame that can be acknowledged.
    pub fn dsn(&self) -> u8 {
        self.dsn
    }

    /// Latched RSSI register byte, `dBm + 45`.
    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    pub fn rx_fifo_len(&self) -> usize {
        self.rx_fifo.len()
    }

    pub fn tx_fifo_len(&self) -> usize {
        self.tx_fifo.len()
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn take_mode_switch(&mut self) -> Option<ModeSwitch> {
        self.pending.take()
    }

    /// Rewind the transmit state machine to the start of a frame.
    pub fn start_tx(&mut self) {
        self.tx_state = TxState::Preamble;
        self.tx_counter = 0;
    }

    /// Rewind the receive state machine to sync-word hunting.
    pub fn start_rx(&mut self) {
        self.rx_state = RxState::Scan;
    }

    /// Firmware write into the TX FIFO. The first write after a completed
    /// frame discards the frame that was kept for retransmission.
    pub fn write_tx_fifo(&mut self, byte: u8) {
        if self.clear_flag {
            self.tx_fifo.clear();
            self.clear_flag = false;
        }
        self.tx_fifo.add(byte);
    }

    /// Firmware read from the RX FIFO.
    pub fn read_rx_fifo(&mut self) -> u8 {
        let byte = self.rx_fifo.remove();
        if self.rx_fifo.is_empty() {
            self.fifo_pin = false;
            self.fifop_pin = false;
        } else if self.rx_fifo.len() < self.config.fifop_threshold {
            self.fifop_pin = false;
        }
        byte
    }

    pub fn flush_rx(&mut self) {
        self.rx_fifo.clear();
        self.rx_state = RxState::Scan;
        self.fifo_pin = false;
        self.fifop_pin = false;
    }

    pub fn flush_tx(&mut self) {
        self.tx_fifo.clear();
        self.clear_flag = false;
        self.tx_underflow = false;
        self.underflow_index = None;
    }

    /// Queue an acknowledgement of the last received sequence number.
    pub fn request_ack(&mut self, frame_pending: bool) {
        if frame_pending {
            self.send_ack_pend = true;
        } else {
            self.send_ack = true;
        }
    }

    fn finish_tx_frame(&mut self) {
        self.tx_state = TxState::End;
        self.tx_counter = 0;
        self.sfd_pin = false;
        if self.was_ack {
            self.stats.acks_sent += 1;
        } else {
            self.tx_fifo.refill();
            self.clear_flag = true;
            self.stats.frames_sent += 1;
        }
        self.pending = Some(ModeSwitch::Receive);
    }

    fn next_body_byte(&mut self) -> u8 {
        let byte = if self.was_ack {
            let byte = match self.tx_counter {
                0 => {
                    if self.send_ack {
                        FRAME_TYPE_ACK
                    } else {
                        FRAME_TYPE_ACK | FCF_FRAME_PENDING
                    }
                }
                2 => {
                    if self.send_ack {
                        self.send_ack = false;
                    } else {
                        self.send_ack_pend = false;
                    }
                    self.dsn
                }
                _ => 0,
            };
            self.tx_counter += 1;
            byte
        } else {
            if self.tx_fifo.is_empty() {
                self.tx_underflow = true;
                self.underflow_index = Some(self.tx_counter);
                self.stats.underflows += 1;
                self.tx_state = TxState::End;
                self.sfd_pin = false;
                self.pending = Some(ModeSwitch::Receive);
                log::debug!("TX FIFO underflow after {} body bytes", self.tx_counter);
                return 0;
            }
            self.tx_counter += 1;
            self.tx_fifo.remove()
        };

        if self.config.auto_crc {
            self.tx_crc = crc_accumulate(self.tx_crc, byte);
            if self.tx_counter + 2 >= self.tx_length {
                self.tx_state = TxState::Crc1;
            }
        } else if self.tx_counter >= self.tx_length {
            self.finish_tx_frame();
        }
        byte
    }

    fn frame_byte(&self, offset: usize) -> u8 {
        self.rx_fifo.peek(self.frame_start + offset).unwrap_or(0)
    }

    fn frame_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.frame_byte(offset), self.frame_byte(offset + 1)])
    }

    fn frame_u64(&self, offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.frame_byte(offset + i);
        }
        u64::from_le_bytes(bytes)
    }

    /// Address recognition, checked as soon as each field is complete.
    /// `counter` is the number of body bytes received so far.
    fn address_matches(&self, counter: usize) -> bool {
        let fcf_low = self.frame_byte(1);
        let fcf_high = self.frame_byte(2);
        let frame_type = fcf_low & 0x07;
        let dest_mode = (fcf_high >> 2) & 0x03;
        let src_mode = (fcf_high >> 6) & 0x03;
        let local_pan = self.address.pan_id;

        match counter {
            1 => fcf_low & FCF_SECURITY == 0 || self.config.reserved_frame_mode,
            5 => {
                let pan = self.frame_u16(4);
                if dest_mode & 0x02 != 0 {
                    pan == local_pan || pan == BROADCAST_PAN
                } else if dest_mode == 0 && src_mode & 0x02 != 0 {
                    match frame_type {
                        FRAME_TYPE_BEACON => local_pan == BROADCAST_PAN || pan == local_pan,
                        FRAME_TYPE_DATA | FRAME_TYPE_COMMAND => self.config.pan_coordinator && pan == local_pan,
                        _ => true,
                    }
                } else {
                    true
                }
            }
            7 if dest_mode == ADDRESS_MODE_SHORT => {
                let short = self.frame_u16(6);
                short == self.address.short_address || short == BROADCAST_SHORT
            }
            13 if dest_mode == ADDRESS_MODE_LONG => {
                let long = self.frame_u64(6);
                long == self.address.ieee_address || long == BROADCAST_LONG
            }
            _ => true,
        }
    }

    fn discard_rx_frame(&mut self) {
        self.rx_fifo.clear();
        self.fifo_pin = false;
        self.fifop_pin = false;
    }

    fn receive_body_byte(&mut self, byte: u8) {
        self.rx_counter += 1;
        self.rx_fifo.add(byte);
        if self.rx_fifo.overflowed() {
            self.fifo_pin = false;
            self.fifop_pin = true;
            self.rx_state = RxState::Overflow;
            self.stats.overflows += 1;
            log::debug!("RX FIFO overflow");
            return;
        }
        self.fifo_pin = true;
        if self.rx_fifo.len() >= self.config.fifop_threshold {
            self.fifop_pin = true;
        }

        if self.config.auto_crc {
            self.rx_crc = crc_accumulate(self.rx_crc, byte);
            if self.rx_counter + 2 == self.rx_length {
                self.rx_state = RxState::Crc1;
            }
        } else if self.rx_counter == self.rx_length {
            self.complete_rx_frame();
        }

        if self.rx_state != RxState::Body {
            return;
        }
        if self.rx_counter == 3 {
            let fcf_low = self.frame_byte(1);
            let frame_type = fcf_low & 0x07;
            if frame_type != FRAME_TYPE_BEACON && fcf_low & FCF_SECURITY == 0 {
                self.dsn = byte;
            }
        }
        if self.config.address_decode && !self.address_matches(self.rx_counter) {
            self.discard_rx_frame();
            self.rx_state = RxState::End;
            self.sfd_pin = false;
            self.stats.frames_rejected += 1;
            log::trace!("Frame rejected by address filter after {} bytes", self.rx_counter);
        }
    }

    fn complete_rx_frame(&mut self) {
        self.rx_state = RxState::End;
        self.fifop_pin = true;
        self.sfd_pin = false;
        self.stats.frames_received += 1;
    }

    fn check_crc(&mut self, byte: u8) -> u8 {
        self.rx_state = RxState::End;
        self.sfd_pin = false;
        let received = ((byte as u16) << 8) | self.crc_low as u16;
        if received != self.rx_crc {
            self.discard_rx_frame();
            self.stats.crc_failures += 1;
            log::trace!("CRC mismatch: got {:#06x}, expected {:#06x}", received, self.rx_crc);
            return byte;
        }

        let status = self.correlation() | 0x80;
        self.rx_fifo.add(status);
        self.fifop_pin = true;
        self.stats.frames_received += 1;

        let fcf_low = self.frame_byte(1);
        if self.config.auto_ack && fcf_low & FCF_ACK_REQUEST != 0 && fcf_low & 0x07 != FRAME_TYPE_ACK {
            self.request_ack(fcf_low & FCF_FRAME_PENDING != 0);
        }
        status
    }

    /// Packet error rate implied by the bit error samples of the current frame.
    ///
    /// # Formula
    ///
    /// `PER = 1 − (1 − BER̄)^(8·n)` where `BER̄` averages the samples after
    /// the preamble and sync word and `n` counts them.
    ///
    /// The sample list is cleared.
    fn packet_error_rate(&mut self) -> f64 {
        let n = self.ber_samples.len();
        let per = if n > HEADER_BYTES {
            let body = &self.ber_samples[HEADER_BYTES..];
            let mean = body.iter().sum::<f64>() / body.len() as f64;
            1.0 - (1.0 - mean).powi((body.len() * 8) as i32)
        } else {
            0.0
        };
        self.ber_samples.clear();
        per
    }

    /// Link correlation indicator, drawn uniformly from the band measured
    /// for the current packet error rate.
    fn correlation(&mut self) -> u8 {
        let per = self.packet_error_rate();
        let index = ((per * 100.0) as usize).min(CORRELATION_MAX.len() - 1);
        self.rng.gen_range(CORRELATION_MIN[index]..=CORRELATION_MAX[index])
    }

    fn lock_lost(&mut self) {
        self.sfd_pin = false;
        self.ber_samples.clear();
        match self.rx_state {
            RxState::Body | RxState::Crc1 | RxState::Crc2 => {
                self.discard_rx_frame();
                self.stats.frames_aborted += 1;
                self.rx_state = RxState::Scan;
            }
            RxState::End => {
                if self.ack_pending() {
                    self.pending = Some(ModeSwitch::Transmit);
                } else {
                    self.rx_state = RxState::Scan;
                }
            }
            RxState::Overflow => {}
            _ => self.rx_state = RxState::Scan,
        }
    }
}

impl ByteSource for PacketFramer {
    fn produce_next_byte(&mut self) -> u8 {
        match self.tx_state {
            TxState::Preamble => {
                self.tx_counter += 1;
                if self.tx_counter >= self.config.preamble_length {
                    self.tx_state = TxState::Sync1;
                }
                0
            }
            TxState::Sync1 => {
                self.tx_state = TxState::Sync2;
                self.config.sync_word as u8
            }
            TxState::Sync2 => {
                self.tx_state = TxState::Length;
                (self.config.sync_word >> 8) as u8
            }
            TxState::Length => {
                if self.ack_pending() {
                    self.was_ack = true;
                    self.tx_length = 5;
                } else {
                    self.was_ack = false;
                    self.tx_fifo.save_state();
                    self.tx_length = (self.tx_fifo.remove() & 0x7f) as usize;
                }
                self.tx_state = TxState::Body;
                self.tx_counter = 0;
                self.tx_crc = 0;
                self.sfd_pin = true;
                if self.config.auto_crc && self.tx_length <= FCS_BYTES {
                    self.tx_state = TxState::Crc1;
                } else if !self.config.auto_crc && self.tx_length == 0 {
                    self.finish_tx_frame();
                }
                self.tx_length as u8
            }
            TxState::Body => self.next_body_byte(),
            TxState::Crc1 => {
                self.tx_state = TxState::Crc2;
                self.tx_crc as u8
            }
            TxState::Crc2 => {
                let byte = (self.tx_crc >> 8) as u8;
                self.finish_tx_frame();
                byte
            }
            TxState::End => {
                self.tx_state = TxState::Preamble;
                self.tx_counter = 0;
                0
            }
        }
    }
}

impl ByteSink for PacketFramer {
    fn consume_next_byte(&mut self, locked: bool, byte: ChannelByte) -> u8 {
        if !locked {
            self.lock_lost();
            return 0;
        }
        let value = byte.value();
        let sync_low = self.config.sync_word as u8;
        let sync_high = (self.config.sync_word >> 8) as u8;
        match self.rx_state {
            RxState::Scan => {
                if value == sync_low {
                    self.rx_state = RxState::SyncMatched1;
                }
            }
            RxState::SyncMatched1 => {
                if value == sync_high {
                    self.rx_state = RxState::SyncMatched2;
                    self.sfd_pin = true;
                } else if value != sync_low {
                    self.rx_state = RxState::Scan;
                }
            }
            RxState::SyncMatched2 => {
                self.rx_length = (value & 0x7f) as usize;
                self.frame_start = self.rx_fifo.len();
                self.rx_fifo.add(value);
                self.fifo_pin = true;
                self.rx_counter = 0;
                self.rx_crc = 0;
                self.rx_state = RxState::Body;
                if self.config.auto_crc && self.rx_length <= FCS_BYTES {
                    self.rx_state = RxState::Crc1;
                } else if !self.config.auto_crc && self.rx_length == 0 {
                    self.complete_rx_frame();
                }
            }
            RxState::Body => self.receive_body_byte(value),
            RxState::Crc1 => {
                self.crc_low = value;
                self.rx_fifo.add(self.rssi);
                self.rx_state = RxState::Crc2;
                return self.rssi;
            }
            RxState::Crc2 => return self.check_crc(value),
            RxState::End | RxState::Overflow => {}
        }
        value
    }

    fn set_rssi(&mut self, rssi_dbm: f64) {
        self.rssi = ((rssi_dbm + 45.0).round() as i64 & 0xff) as u8;
    }

    fn set_ber(&mut self, ber: f64) {
        self.ber_samples.push(ber);
    }
}
