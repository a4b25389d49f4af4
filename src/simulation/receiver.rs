//! Receiving endpoint of a radio.
//!
//! idle → unlocked (scanning) → locked (delivering bytes) → unlocked → …
//!
//! While unlocked the receiver looks for the earliest new transmission it
//! can lock onto and schedules itself for that transmission's first full
//! byte. While locked it delivers one merged, corruption-annotated byte per
//! byte time until no transmission covers the current window.

use std::sync::Arc;

use super::clock::{NodeClock, NodeEvent};
use super::hooks::{ByteSink, ChannelProbe};
use super::medium::{Medium, ReceiverInfo, Transmission};
use super::signal_calculations::{awgn_bit_error_rate, dbm_to_mw, mw_to_dbm};
use super::types::{BYTE_SIZE, ChannelByte, Cycle, NodeId, Timing};

/// Bits between the air and the receiver's latch.
const BIT_DELAY: i64 = 1;

/// Link statistics of one delivered byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSample {
    pub rssi_dbm: f64,
    pub ber: f64,
}

pub struct Receiver {
    id: NodeId,
    medium: Arc<Medium>,
    timing: Timing,
    activated: bool,
    locked: bool,
    frequency: f64,
    probes: Vec<Arc<dyn ChannelProbe>>,
}

impl Receiver {
    pub fn new(id: NodeId, medium: Arc<Medium>, hz: u64) -> Self {
        let timing = Timing::new(hz, medium.config());
        Receiver {
            id,
            medium,
            timing,
            activated: false,
            locked: false,
            frequency: 0.0,
            probes: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn medium(&self) -> &Arc<Medium> {
        &self.medium
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn is_active(&self) -> bool {
        self.activated
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn info(&self) -> ReceiverInfo {
        ReceiverInfo {
            id: self.id,
            frequency: self.frequency,
        }
    }

    pub fn add_probe(&mut self, probe: Arc<dyn ChannelProbe>) {
        self.probes.push(probe);
    }

    /// Tune to `frequency` and start listening after one lead time plus one
    /// byte time. Retuning an active receiver keeps its schedule.
    pub fn begin_receive(&mut self, clock: &mut NodeClock, frequency: f64) {
        self.frequency = frequency;
        if !self.activated {
            self.activated = true;
            clock.insert_event(NodeEvent::ReceiveTick, self.timing.lead_cycles + self.timing.cycles_per_byte);
        }
    }

    /// Stop listening. A receiver that was locked reports the lost signal first.
    pub fn end_receive(&mut self, clock: &mut NodeClock, sink: &mut dyn ByteSink) {
        if self.locked {
            sink.consume_next_byte(false, ChannelByte::default());
            for probe in &self.probes {
                probe.after_receive_end(self.id);
            }
        }
        self.activated = false;
        self.locked = false;
        clock.remove_event(NodeEvent::ReceiveTick);
    }

    pub fn tick(&mut self, clock: &mut NodeClock, sink: &mut dyn ByteSink) {
        if !self.activated {
            return;
        }
        let time = clock.now();
        let one_bit_before_now = self.timing.bit_num(time) - BIT_DELAY;
        self.medium.wait_for_neighbors(self.id, time);
        if self.locked {
            self.deliver_byte(clock, sink, one_bit_before_now);
        } else {
            self.scan(clock, sink, time, one_bit_before_now);
        }
    }

    fn scan(&mut self, clock: &mut NodeClock, sink: &mut dyn ByteSink, time: Cycle, one_bit_before_now: i64) {
        let millis = clock.cycles_to_millis(time);
        let candidate = self
            .medium
            .earliest_new_transmission(&self.info(), one_bit_before_now - BYTE_SIZE, millis);
        if let Some(transmission) = candidate {
            let delivery = self.timing.cycle_time(transmission.first_bit() + BYTE_SIZE + BIT_DELAY);
            let delta = delivery as i64 - time as i64;
            let lead = self.timing.lead_cycles as i64;
            if delta <= 0 {
                self.lock_onto(&transmission);
                self.deliver_byte(clock, sink, one_bit_before_now);
                return;
            } else if delta < lead {
                self.lock_onto(&transmission);
                clock.insert_event(NodeEvent::ReceiveTick, delta as Cycle);
                return;
            } else if delta < lead + self.timing.cycles_per_byte as i64 {
                clock.insert_event(NodeEvent::ReceiveTick, delta as Cycle);
                return;
            }
        }
        clock.insert_event(NodeEvent::ReceiveTick, self.timing.lead_cycles);
    }

    fn lock_onto(&mut self, transmission: &Transmission) {
        self.locked = true;
        log::trace!(
            "Node {} locked onto transmission from node {} (first bit {})",
            self.id,
            transmission.origin(),
            transmission.first_bit()
        );
    }

    /// Power, interference and bit error probability over `overlapping`.
    ///
    /// The first transmission is the signal; the others add to both the
    /// total received power and the interference, accumulated in mW.
    fn link_sample(&self, overlapping: &[Arc<Transmission>], millis: u64) -> LinkSample {
        let arbitrator = self.medium.arbitrator();
        let info = self.info();
        let signal = arbitrator.compute_received_power(&overlapping[0], &info, millis);
        let mut total_mw = dbm_to_mw(signal);
        let mut impairment_mw = dbm_to_mw(arbitrator.noise(millis));
        for transmission in &overlapping[1..] {
            let interference = dbm_to_mw(arbitrator.compute_received_power(transmission, &info, millis));
            total_mw += interference;
            impairment_mw += interference;
        }
        let sinr_db = signal - mw_to_dbm(impairment_mw);
        LinkSample {
            rssi_dbm: mw_to_dbm(total_mw),
            ber: awgn_bit_error_rate(sinr_db),
        }
    }

    fn deliver_byte(&mut self, clock: &mut NodeClock, sink: &mut dyn ByteSink, one_bit_before_now: i64) {
        let window = one_bit_before_now - BYTE_SIZE;
        let overlapping = self.medium.intersection(self.id, window);
        if overlapping.is_empty() {
            self.locked = false;
            sink.consume_next_byte(false, ChannelByte::default());
            for probe in &self.probes {
                probe.after_receive_end(self.id);
            }
            log::trace!("Node {} lost signal at cycle {}", self.id, clock.now());
            clock.insert_event(NodeEvent::ReceiveTick, self.timing.lead_cycles + self.timing.cycles_per_byte);
            return;
        }

        let millis = clock.millis();
        let sample = self.link_sample(&overlapping, millis);
        sink.set_ber(sample.ber);
        sink.set_rssi(sample.rssi_dbm);
        let merged = self
            .medium
            .arbitrator()
            .merge_transmissions(&self.info(), &overlapping, window, millis);
        let latched = sink.consume_next_byte(true, merged);
        let delivered = ChannelByte::new(latched, merged.corrupted_bits());
        for probe in &self.probes {
            probe.after_receive(self.id, delivered);
        }
        clock.insert_event(NodeEvent::ReceiveTick, self.timing.cycles_per_byte);
    }

    /// Received power over the current byte window, or `None` if nothing
    /// from another node is on the air.
    pub fn channel_power(&self, clock: &NodeClock) -> Option<f64> {
        let time = clock.now();
        let bit = self.timing.bit_num(time) - BIT_DELAY;
        self.medium.wait_for_neighbors(self.id, time);
        let overlapping = self.medium.intersection(self.id, bit - BYTE_SIZE);
        if overlapping.is_empty() {
            return None;
        }
        Some(self.link_sample(&overlapping, clock.millis()).rssi_dbm)
    }

    /// Clear-channel assessment.
    ///
    /// While listening the channel is clear iff the receiver is not locked.
    /// Otherwise it is clear unless the power on the air reaches
    /// `threshold_dbm - hysteresis_db`.
    pub fn is_channel_clear(&self, clock: &NodeClock, threshold_dbm: f64, hysteresis_db: f64) -> bool {
        if self.activated {
            return !self.locked;
        }
        match self.channel_power(clock) {
            Some(rssi) => rssi < threshold_dbm - hysteresis_db,
            None => true,
        }
    }
}
