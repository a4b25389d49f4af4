//! TI CC2420 2.4 GHz IEEE 802.15.4 transceiver.
//!
//! Models the register file, command strobes, FIFO interface and status
//! lines firmware sees. Framing is delegated to [`PacketFramer`]; channel
//! access goes through the radio's [`Transmitter`] and [`Receiver`].

use std::sync::Arc;

use super::energy::{EnergyMeter, EnergySummary, RadioMode, StateObserver};
use super::framer::{AddressFilter, FramerConfig, FramerStats, PacketFramer};
use super::{ModeSwitch, Radio};
use crate::simulation::clock::{NodeClock, NodeEvent};
use crate::simulation::hooks::ChannelProbe;
use crate::simulation::medium::Medium;
use crate::simulation::receiver::Receiver;
use crate::simulation::transmitter::Transmitter;
use crate::simulation::types::{MediumConfig, NodeId};

pub const MAIN: u8 = 0x10;
pub const MDMCTRL0: u8 = 0x11;
pub const MDMCTRL1: u8 = 0x12;
pub const RSSI: u8 = 0x13;
pub const SYNCWORD: u8 = 0x14;
pub const TXCTRL: u8 = 0x15;
pub const RXCTRL0: u8 = 0x16;
pub const RXCTRL1: u8 = 0x17;
pub const FSCTRL: u8 = 0x18;
pub const IOCFG0: u8 = 0x1c;
pub const IOCFG1: u8 = 0x1d;
pub const MANFIDL: u8 = 0x1e;
pub const MANFIDH: u8 = 0x1f;

const REGISTER_COUNT: usize = 0x40;

/// Crystal oscillator start-up time in microseconds.
pub const XOSC_START_MICROS: u64 = 1000;

const MAIN_RESET_N: u16 = 0x8000;

const MDMCTRL0_AUTOACK: u16 = 1 << 4;
const MDMCTRL0_AUTOCRC: u16 = 1 << 5;
const MDMCTRL0_ADR_DECODE: u16 = 1 << 11;
const MDMCTRL0_PAN_COORDINATOR: u16 = 1 << 12;
const MDMCTRL0_RESERVED_FRAME_MODE: u16 = 1 << 13;

/// Output power in dBm for each PA level.
const POWER_DBM: [f64; 32] = [
    -37.917, -32.984, -28.697, -25.0, -21.837, -19.153, -16.893, -15.0, -13.42, -12.097, -10.975, -10.0, -9.1238,
    -8.3343, -7.6277, -7.0, -6.4442, -5.9408, -5.467, -5.0, -4.5212, -4.0275, -3.5201, -3.0, -2.4711, -1.9492, -1.4526,
    -1.0, -0.6099, -0.3008, -0.0914, 0.0,
];

fn reset_value(address: usize) -> u16 {
    match address as u8 {
        MAIN => 0xF800,
        MDMCTRL0 => 0x0AE2,
        MDMCTRL1 => 0x0000,
        RSSI => 0xE080,
        SYNCWORD => 0xA70F,
        TXCTRL => 0xA0FF,
        RXCTRL0 => 0x12E5,
        RXCTRL1 => 0x0A56,
        FSCTRL => 0x4165,
        IOCFG0 => 0x0040,
        MANFIDL => 0x233D,
        MANFIDH => 0x3000,
        _ => 0x0000,
    }
}

/// Command strobes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strobe {
    Nop,
    XoscOn,
    TxCal,
    RxOn,
    TxOn,
    TxOnCca,
    RfOff,
    XoscOff,
    FlushRx,
    FlushTx,
    Ack,
    AckPend,
}

impl Strobe {
    pub fn from_code(code: u8) -> Option<Strobe> {
        let strobe = match code {
            0x00 => Strobe::Nop,
            0x01 => Strobe::XoscOn,
            0x02 => Strobe::TxCal,
            0x03 => Strobe::RxOn,
            0x04 => Strobe::TxOn,
            0x05 => Strobe::TxOnCca,
            0x06 => Strobe::RfOff,
            0x07 => Strobe::XoscOff,
            0x08 => Strobe::FlushRx,
            0x09 => Strobe::FlushTx,
            0x0a => Strobe::Ack,
            0x0b => Strobe::AckPend,
            _ => return None,
        };
        Some(strobe)
    }
}

pub struct Cc2420 {
    id: NodeId,
    hz: u64,
    registers: [u16; REGISTER_COUNT],
    medium: Arc<Medium>,
    transmitter: Transmitter,
    receiver: Receiver,
    framer: PacketFramer,
    tx_active: bool,
    oscillator_stable: bool,
    oscillator_starting: bool,
    meter: EnergyMeter,
    observers: Vec<Box<dyn StateObserver>>,
}

impl Cc2420 {
    /// A powered-down chip on a private CC2420 medium. `seed` drives the
    /// link quality indicator.
    pub fn new(id: NodeId, hz: u64, seed: u64) -> Self {
        let medium = Arc::new(Medium::new(MediumConfig::CC2420));
        let mut radio = Cc2420 {
            id,
            hz,
            registers: [0; REGISTER_COUNT],
            transmitter: Transmitter::new(id, Arc::clone(&medium), hz),
            receiver: Receiver::new(id, Arc::clone(&medium), hz),
            medium,
            framer: PacketFramer::new(seed),
            tx_active: false,
            oscillator_stable: false,
            oscillator_starting: false,
            meter: EnergyMeter::new(hz, RadioMode::PowerDown),
            observers: Vec::new(),
        };
        radio.reset_registers();
        radio
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn reset_registers(&mut self) {
        for (address, register) in self.registers.iter_mut().enumerate() {
            *register = reset_value(address);
        }
        self.sync_framer_config();
    }

    /// Chip reset: registers return to their defaults, FIFOs are emptied
    /// and the radio powers down.
    pub fn reset(&mut self, clock: &mut NodeClock) {
        self.tx_shutdown(clock);
        self.rx_shutdown(clock);
        self.framer.reset();
        self.reset_registers();
        self.oscillator_stable = false;
        self.oscillator_starting = false;
        clock.remove_event(NodeEvent::OscillatorStable);
        self.transition(clock, RadioMode::PowerDown);
    }

    pub fn add_observer(&mut self, observer: Box<dyn StateObserver>) {
        self.observers.push(observer);
    }

    /// Attach a probe to both endpoints. Probes must be added after
    /// [`Radio::set_medium`].
    pub fn add_probe(&mut self, probe: Arc<dyn ChannelProbe>) {
        self.transmitter.add_probe(Arc::clone(&probe));
        self.receiver.add_probe(probe);
    }

    pub fn mode(&self) -> RadioMode {
        self.meter.mode()
    }

    pub fn energy(&self, clock: &NodeClock) -> EnergySummary {
        self.meter.summary(clock.now())
    }

    pub fn framer_stats(&self) -> FramerStats {
        self.framer.stats()
    }

    fn transition(&mut self, clock: &NodeClock, to: RadioMode) {
        let from = self.meter.mode();
        if from == to {
            return;
        }
        let now = clock.now();
        self.meter.mode_changed(now, from, to);
        for observer in &mut self.observers {
            observer.mode_changed(now, from, to);
        }
    }

    pub fn read_register(&self, address: u8) -> u16 {
        let value = self.registers[address as usize % REGISTER_COUNT];
        if address == RSSI {
            (value & 0xff00) | self.framer.rssi() as u16
        } else {
            value
        }
    }

    pub fn write_register(&mut self, clock: &mut NodeClock, address: u8, value: u16) {
        log::trace!("Node {} CC2420 register {:#04x} <= {:#06x}", self.id, address, value);
        self.registers[address as usize % REGISTER_COUNT] = value;
        if address == MAIN && value & MAIN_RESET_N == 0 {
            self.reset(clock);
            return;
        }
        self.sync_framer_config();
    }

    fn sync_framer_config(&mut self) {
        let mdmctrl0 = self.registers[MDMCTRL0 as usize];
        self.framer.set_config(FramerConfig {
            preamble_length: (mdmctrl0 & 0x0f) as usize + 1,
            sync_word: self.registers[SYNCWORD as usize],
            auto_crc: mdmctrl0 & MDMCTRL0_AUTOCRC != 0,
            auto_ack: mdmctrl0 & MDMCTRL0_AUTOACK != 0,
            address_decode: mdmctrl0 & MDMCTRL0_ADR_DECODE != 0,
            pan_coordinator: mdmctrl0 & MDMCTRL0_PAN_COORDINATOR != 0,
            reserved_frame_mode: mdmctrl0 & MDMCTRL0_RESERVED_FRAME_MODE != 0,
            fifop_threshold: (self.registers[IOCFG0 as usize] & 0x7f) as usize,
        });
    }

    /// Identity used for address recognition, normally held in the chip's RAM.
    pub fn set_address(&mut self, address: AddressFilter) {
        self.framer.set_address(address);
    }

    pub fn pa_level(&self) -> u8 {
        (self.registers[TXCTRL as usize] & 0x1f) as u8
    }

    /// Output power in dBm.
    pub fn power(&self) -> f64 {
        POWER_DBM[self.pa_level() as usize]
    }

    /// Carrier frequency in MHz.
    pub fn frequency(&self) -> f64 {
        (2048 + (self.registers[FSCTRL as usize] & 0x03ff)) as f64
    }

    /// Tune to IEEE 802.15.4 channel `channel` (11..=26).
    pub fn set_channel(&mut self, clock: &mut NodeClock, channel: u8) {
        let offset = 357 + 5 * (channel.clamp(11, 26) as u16 - 11);
        let fsctrl = (self.registers[FSCTRL as usize] & !0x03ff) | offset;
        self.write_register(clock, FSCTRL, fsctrl);
    }

    pub fn strobe(&mut self, clock: &mut NodeClock, strobe: Strobe) {
        log::trace!("Node {} CC2420 strobe {:?}", self.id, strobe);
        match strobe {
            Strobe::Nop | Strobe::TxCal => {}
            Strobe::XoscOn => self.start_oscillator(clock),
            Strobe::RxOn => {
                if self.require_oscillator(strobe) {
                    self.tx_shutdown(clock);
                    self.rx_startup(clock);
                }
            }
            Strobe::TxOn => {
                if self.require_oscillator(strobe) {
                    self.rx_shutdown(clock);
                    self.tx_startup(clock);
                }
            }
            Strobe::TxOnCca => {
                if self.require_oscillator(strobe) && self.cca(clock) {
                    self.rx_shutdown(clock);
                    self.tx_startup(clock);
                }
            }
            Strobe::RfOff => {
                self.tx_shutdown(clock);
                self.rx_shutdown(clock);
            }
            Strobe::XoscOff => {
                self.tx_shutdown(clock);
                self.rx_shutdown(clock);
                self.oscillator_stable = false;
                self.oscillator_starting = false;
                clock.remove_event(NodeEvent::OscillatorStable);
                self.transition(clock, RadioMode::PowerDown);
            }
            Strobe::FlushRx => self.framer.flush_rx(),
            Strobe::FlushTx => self.framer.flush_tx(),
            Strobe::Ack | Strobe::AckPend => {
                self.framer.request_ack(strobe == Strobe::AckPend);
                if !self.receiver.is_locked() {
                    self.rx_shutdown(clock);
                    self.tx_startup(clock);
                }
            }
        }
    }

    fn require_oscillator(&self, strobe: Strobe) -> bool {
        if !self.oscillator_stable {
            log::debug!("Node {} ignored {:?}: oscillator not running", self.id, strobe);
        }
        self.oscillator_stable
    }

    fn start_oscillator(&mut self, clock: &mut NodeClock) {
        if self.oscillator_stable || self.oscillator_starting {
            return;
        }
        self.oscillator_starting = true;
        clock.insert_event(NodeEvent::OscillatorStable, clock.micros_to_cycles(XOSC_START_MICROS));
    }

    fn tx_startup(&mut self, clock: &mut NodeClock) {
        if self.tx_active {
            return;
        }
        self.tx_active = true;
        self.framer.start_tx();
        self.transition(clock, RadioMode::Transmit(self.pa_level()));
        let (power, frequency) = (self.power(), self.frequency());
        self.transmitter.begin_transmit(clock, power, frequency);
    }

    fn tx_shutdown(&mut self, clock: &NodeClock) {
        if !self.tx_active {
            return;
        }
        self.tx_active = false;
        self.transmitter.end_transmit();
        self.transition(clock, RadioMode::Idle);
    }

    fn rx_startup(&mut self, clock: &mut NodeClock) {
        self.framer.start_rx();
        self.transition(clock, RadioMode::Receive);
        let frequency = self.frequency();
        self.receiver.begin_receive(clock, frequency);
    }

    fn rx_shutdown(&mut self, clock: &mut NodeClock) {
        if !self.receiver.is_active() {
            return;
        }
        self.receiver.end_receive(clock, &mut self.framer);
        // A lock lost here must not turn into a deferred transmission.
        self.framer.take_mode_switch();
        self.transition(clock, RadioMode::Idle);
    }

    fn apply_mode_switch(&mut self, clock: &mut NodeClock) {
        match self.framer.take_mode_switch() {
            Some(ModeSwitch::Receive) => {
                self.tx_shutdown(clock);
                self.rx_startup(clock);
            }
            Some(ModeSwitch::Transmit) => {
                self.rx_shutdown(clock);
                self.tx_startup(clock);
            }
            None => {}
        }
    }

    /// Clear channel assessment as selected by MDMCTRL0.CCA_MODE.
    pub fn cca(&self, clock: &NodeClock) -> bool {
        let mdmctrl0 = self.registers[MDMCTRL0 as usize];
        match (mdmctrl0 >> 6) & 0x03 {
            0 => true,
            2 => !self.receiver.is_locked(),
            _ => {
                let threshold = (self.registers[RSSI as usize] >> 8) as u8 as i8 as f64 - 45.0;
                let hysteresis = ((mdmctrl0 >> 8) & 0x07) as f64;
                self.receiver.is_channel_clear(clock, threshold, hysteresis)
            }
        }
    }

    pub fn write_tx_fifo(&mut self, byte: u8) {
        self.framer.write_tx_fifo(byte);
    }

    pub fn read_rx_fifo(&mut self) -> u8 {
        self.framer.read_rx_fifo()
    }

    pub fn fifo(&self) -> bool {
        self.framer.fifo_pin()
    }

    pub fn fifop(&self) -> bool {
        self.framer.fifop_pin()
    }

    pub fn sfd(&self) -> bool {
        self.framer.sfd_pin()
    }

    pub fn tx_underflow(&self) -> bool {
        self.framer.tx_underflow()
    }

    pub fn rx_overflow(&self) -> bool {
        self.framer.rx_overflow()
    }

    pub fn oscillator_stable(&self) -> bool {
        self.oscillator_stable
    }

    pub fn is_transmitting(&self) -> bool {
        self.tx_active
    }
}

impl Radio for Cc2420 {
    fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    fn medium(&self) -> &Arc<Medium> {
        &self.medium
    }

    fn set_medium(&mut self, medium: Arc<Medium>) {
        self.transmitter = Transmitter::new(self.id, Arc::clone(&medium), self.hz);
        self.receiver = Receiver::new(self.id, Arc::clone(&medium), self.hz);
        self.medium = medium;
        self.tx_active = false;
    }

    fn fire(&mut self, clock: &mut NodeClock, event: NodeEvent) {
        match event {
            NodeEvent::TransmitTick => {
                self.transmitter.tick(clock, &mut self.framer);
                self.apply_mode_switch(clock);
            }
            NodeEvent::ReceiveTick => {
                self.receiver.tick(clock, &mut self.framer);
                self.apply_mode_switch(clock);
            }
            NodeEvent::OscillatorStable => {
                self.oscillator_stable = true;
                self.oscillator_starting = false;
                self.transition(clock, RadioMode::Idle);
                log::debug!("Node {} CC2420 oscillator stable at cycle {}", self.id, clock.now());
            }
            NodeEvent::Synchronize | NodeEvent::App(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::Cycle;

    const HZ: u64 = 8_000_000;

    struct Node {
        clock: NodeClock,
        radio: Cc2420,
    }

    impl Node {
        fn new(id: NodeId, medium: &Arc<Medium>) -> Self {
            let mut radio = Cc2420::new(id, HZ, id as u64);
            radio.set_medium(Arc::clone(medium));
            radio.set_address(AddressFilter {
                pan_id: 0x22,
                short_address: id as u16,
                ieee_address: id as u64,
            });
            Node {
                clock: NodeClock::new(HZ),
                radio,
            }
        }

        fn power_up(&mut self) {
            self.radio.strobe(&mut self.clock, Strobe::XoscOn);
            while let Some(event) = self.clock.pop_until(Cycle::MAX) {
                self.radio.fire(&mut self.clock, event);
            }
            assert!(self.radio.oscillator_stable());
        }
    }

    fn run(nodes: &mut [&mut Node], until: Cycle) {
        loop {
            let next = nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.clock.next_event_time().map(|t| (t, i)))
                .min();
            match next {
                Some((t, i)) if t <= until => {
                    let node = &mut nodes[i];
                    if let Some(event) = node.clock.pop_until(until) {
                        node.radio.fire(&mut node.clock, event);
                    }
                }
                _ => break,
            }
        }
    }

    fn shared_medium() -> Arc<Medium> {
        Arc::new(Medium::new(MediumConfig::CC2420))
    }

    fn frame(seq: u8, dest: u16, ack_request: bool, payload: &[u8]) -> Vec<u8> {
        let fcf_low = if ack_request { 0x61 } else { 0x41 };
        let mut body = vec![fcf_low, 0x88, seq, 0x22, 0x00];
        body.extend_from_slice(&dest.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(payload);
        body
    }

    fn send(node: &mut Node, body: &[u8]) {
        node.radio.write_tx_fifo((body.len() + 2) as u8);
        for b in body {
            node.radio.write_tx_fifo(*b);
        }
        node.radio.strobe(&mut node.clock, Strobe::TxOn);
    }

    fn drain(node: &mut Node) -> Vec<u8> {
        let mut out = Vec::new();
        while node.radio.fifo() {
            out.push(node.radio.read_rx_fifo());
        }
        out
    }

    #[test]
    fn reset_values_decode_to_datasheet_defaults() {
        let radio = Cc2420::new(1, HZ, 0);
        assert_eq!(radio.frequency(), 2405.0);
        assert_eq!(radio.pa_level(), 31);
        assert_eq!(radio.power(), 0.0);
        let config = radio.framer.config();
        assert_eq!(config.preamble_length, 3);
        assert!(config.auto_crc);
        assert!(!config.auto_ack);
        assert!(config.address_decode);
        assert_eq!(config.fifop_threshold, 64);
        assert_eq!(radio.mode(), RadioMode::PowerDown);
    }

    #[test]
    fn strobe_codes_decode() {
        assert_eq!(Strobe::from_code(0x03), Some(Strobe::RxOn));
        assert_eq!(Strobe::from_code(0x0b), Some(Strobe::AckPend));
        assert_eq!(Strobe::from_code(0x0c), None);
    }

    #[test]
    fn pa_level_and_channel_follow_registers() {
        let mut clock = NodeClock::new(HZ);
        let mut radio = Cc2420::new(1, HZ, 0);
        radio.write_register(&mut clock, TXCTRL, 0xA0E3);
        assert_eq!(radio.pa_level(), 3);
        assert_eq!(radio.power(), -25.0);
        radio.set_channel(&mut clock, 26);
        assert_eq!(radio.frequency(), 2480.0);
        assert_eq!(radio.read_register(FSCTRL) & 0xfc00, 0x4000);
    }

    #[test]
    fn radio_strobes_wait_for_oscillator() {
        let medium = shared_medium();
        let mut node = Node::new(1, &medium);
        node.radio.strobe(&mut node.clock, Strobe::RxOn);
        assert!(!node.radio.receiver().is_active());

        node.radio.strobe(&mut node.clock, Strobe::XoscOn);
        assert_eq!(node.clock.next_event_time(), Some(8_000));
        node.power_up();
        assert_eq!(node.radio.mode(), RadioMode::Idle);
        node.radio.strobe(&mut node.clock, Strobe::RxOn);
        assert!(node.radio.receiver().is_active());
        assert_eq!(node.radio.mode(), RadioMode::Receive);
        node.radio.strobe(&mut node.clock, Strobe::RfOff);
        assert!(!node.radio.receiver().is_active());
        assert_eq!(node.radio.mode(), RadioMode::Idle);
    }

    #[test]
    fn frame_delivered_and_acknowledged_over_the_air() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        let mut listener = Node::new(2, &medium);
        sender.power_up();
        listener.power_up();
        let mdmctrl0 = listener.radio.read_register(MDMCTRL0);
        listener
            .radio
            .write_register(&mut listener.clock, MDMCTRL0, mdmctrl0 | MDMCTRL0_AUTOACK);
        listener.radio.strobe(&mut listener.clock, Strobe::RxOn);

        let body = frame(0x31, 2, true, b"temperature");
        send(&mut sender, &body);
        assert_eq!(sender.radio.mode(), RadioMode::Transmit(31));
        let start = sender.clock.now();
        run(&mut [&mut sender, &mut listener], start + HZ / 50);

        let fifo = drain(&mut listener);
        assert_eq!(fifo.len(), body.len() + 3);
        assert_eq!(fifo[0] as usize, body.len() + 2);
        assert_eq!(&fifo[1..=body.len()], body.as_slice());
        // 0 dBm on the lossless channel.
        assert_eq!(fifo[body.len() + 1], 45);
        assert_eq!(fifo[body.len() + 2] & 0x80, 0x80);
        assert_eq!(listener.radio.framer_stats().frames_received, 1);
        assert_eq!(listener.radio.framer_stats().acks_sent, 1);

        // The sender fell back to receive and heard the acknowledgement.
        assert_eq!(sender.radio.framer_stats().frames_sent, 1);
        assert_eq!(sender.radio.framer_stats().frames_received, 1);
        let ack = drain(&mut sender);
        assert_eq!(&ack[..4], &[5, 0x02, 0x00, 0x31]);
        assert_eq!(sender.radio.mode(), RadioMode::Receive);
        assert_eq!(listener.radio.mode(), RadioMode::Receive);
    }

    #[test]
    fn frame_for_another_node_is_filtered() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        let mut listener = Node::new(2, &medium);
        sender.power_up();
        listener.power_up();
        listener.radio.strobe(&mut listener.clock, Strobe::RxOn);

        send(&mut sender, &frame(1, 3, false, b"not yours"));
        let start = sender.clock.now();
        run(&mut [&mut sender, &mut listener], start + HZ / 50);
        assert!(!listener.radio.fifo());
        assert_eq!(listener.radio.framer_stats().frames_rejected, 1);
    }

    #[test]
    fn cca_gated_transmit_refused_while_locked() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        let mut listener = Node::new(2, &medium);
        sender.power_up();
        listener.power_up();
        listener.radio.strobe(&mut listener.clock, Strobe::RxOn);
        assert!(listener.radio.cca(&listener.clock));

        send(&mut sender, &frame(1, 2, false, &[0xAB; 40]));
        let start = sender.clock.now();
        run(&mut [&mut sender, &mut listener], start + 1536 + 10 * 256);
        assert!(listener.radio.receiver().is_locked());
        assert!(listener.radio.sfd());
        assert!(!listener.radio.cca(&listener.clock));

        listener.radio.write_tx_fifo(3);
        listener.radio.write_tx_fifo(0);
        listener.radio.strobe(&mut listener.clock, Strobe::TxOnCca);
        assert!(!listener.radio.is_transmitting());
    }

    fn set_cca_mode(node: &mut Node, mode: u16) {
        let mdmctrl0 = node.radio.read_register(MDMCTRL0);
        node.radio
            .write_register(&mut node.clock, MDMCTRL0, (mdmctrl0 & !0x00c0) | (mode << 6));
    }

    #[test]
    fn transmit_rearmed_straight_after_frame_end() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        let mut early = Node::new(2, &medium);
        let mut late = Node::new(3, &medium);
        sender.power_up();
        early.power_up();
        late.power_up();
        early.radio.strobe(&mut early.clock, Strobe::RxOn);

        send(&mut sender, &frame(1, 0xFFFF, false, b"first"));
        let deadline = sender.clock.now() + HZ / 50;
        let mut until = sender.clock.now();
        while sender.radio.framer_stats().frames_sent < 1 {
            until += 32;
            assert!(until < deadline, "first frame never finished");
            run(&mut [&mut sender, &mut early], until);
        }
        // Back in receive mode while the closing byte boundary is still pending.
        assert_eq!(sender.radio.mode(), RadioMode::Receive);
        assert!(sender.radio.transmitter().is_active());

        late.clock.advance_to(sender.clock.now());
        late.radio.strobe(&mut late.clock, Strobe::RxOn);
        send(&mut sender, &frame(2, 0xFFFF, false, b"second"));
        assert!(sender.radio.is_transmitting());
        assert!(sender.radio.transmitter().is_active());

        let start = sender.clock.now();
        run(&mut [&mut sender, &mut early, &mut late], start + HZ / 50);
        assert_eq!(sender.radio.framer_stats().frames_sent, 2);
        assert!(!sender.radio.is_transmitting());
        assert!(!sender.radio.transmitter().is_active());
        assert_eq!(sender.radio.mode(), RadioMode::Receive);
        assert_eq!(early.radio.framer_stats().frames_received, 1);
        assert_eq!(late.radio.framer_stats().frames_received, 1);
        assert_eq!(drain(&mut late)[3], 2);
    }

    #[test]
    fn rx_overflow_holds_until_flushed() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        let mut listener = Node::new(2, &medium);
        sender.power_up();
        listener.power_up();
        listener.radio.strobe(&mut listener.clock, Strobe::RxOn);

        // 114 FIFO bytes per frame: the second one cannot fit.
        for seq in 1..=3 {
            send(&mut sender, &frame(seq, 2, false, &[seq; 100]));
            let start = sender.clock.now();
            run(&mut [&mut sender, &mut listener], start + HZ / 100);
        }
        assert!(listener.radio.rx_overflow());
        assert!(listener.radio.fifop());
        assert!(!listener.radio.fifo());
        assert_eq!(listener.radio.framer_stats().frames_received, 1);
        assert_eq!(listener.radio.framer_stats().overflows, 1);

        listener.radio.strobe(&mut listener.clock, Strobe::FlushRx);
        assert!(!listener.radio.rx_overflow());
        assert!(!listener.radio.fifop());

        send(&mut sender, &frame(4, 2, false, &[4; 100]));
        let start = sender.clock.now();
        run(&mut [&mut sender, &mut listener], start + HZ / 100);
        assert_eq!(listener.radio.framer_stats().frames_received, 2);
        assert_eq!(drain(&mut listener)[3], 4);
    }

    #[test]
    fn tx_underflow_returns_to_receive() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        sender.power_up();
        sender.radio.write_tx_fifo(20);
        for b in [0x41, 0x88, 0x07] {
            sender.radio.write_tx_fifo(b);
        }
        sender.radio.strobe(&mut sender.clock, Strobe::TxOn);
        let start = sender.clock.now();
        run(&mut [&mut sender], start + HZ / 100);

        assert!(sender.radio.tx_underflow());
        assert!(!sender.radio.is_transmitting());
        assert!(!sender.radio.transmitter().is_active());
        assert!(sender.radio.receiver().is_active());
        assert_eq!(sender.radio.mode(), RadioMode::Receive);
        assert_eq!(sender.radio.framer_stats().underflows, 1);
        assert_eq!(sender.radio.framer_stats().frames_sent, 0);

        sender.radio.strobe(&mut sender.clock, Strobe::FlushTx);
        assert!(!sender.radio.tx_underflow());
    }

    #[test]
    fn energy_detect_cca_modes_compare_threshold() {
        let medium = shared_medium();
        let mut sender = Node::new(1, &medium);
        let mut idle = Node::new(2, &medium);
        sender.power_up();
        idle.power_up();

        send(&mut sender, &frame(1, 2, false, &[0x5A; 60]));
        let start = sender.clock.now();
        run(&mut [&mut sender], start + 1536 + 10 * 256);
        idle.clock.advance_to(sender.clock.now());
        assert!(!idle.radio.receiver().is_locked());

        // Reset threshold is -77 dBm; the lossless channel delivers 0 dBm.
        for mode in [1, 3] {
            set_cca_mode(&mut idle, mode);
            assert!(!idle.radio.cca(&idle.clock), "mode {}", mode);
        }
        set_cca_mode(&mut idle, 0);
        assert!(idle.radio.cca(&idle.clock));
        set_cca_mode(&mut idle, 2);
        assert!(idle.radio.cca(&idle.clock));

        // Threshold 50 - 45 = 5 dBm, minus 2 dB hysteresis, sits above the signal.
        idle.radio.write_register(&mut idle.clock, RSSI, 0x3200);
        for mode in [1, 3] {
            set_cca_mode(&mut idle, mode);
            assert!(idle.radio.cca(&idle.clock), "mode {}", mode);
        }
    }

    #[test]
    fn energy_meter_tracks_modes() {
        let medium = shared_medium();
        let mut node = Node::new(1, &medium);
        node.power_up();
        node.radio.strobe(&mut node.clock, Strobe::RxOn);
        node.clock.advance_to(node.clock.now() + HZ);
        let summary = node.radio.energy(&node.clock);
        assert!((summary.receive_seconds() - 1.0).abs() < 1e-9);
        assert!((summary.seconds[1] - 0.001).abs() < 1e-9);
        assert!(summary.coulombs > 0.0188);
    }
}
