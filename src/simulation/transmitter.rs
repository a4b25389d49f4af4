//! Transmitting endpoint of a radio.
//!
//! idle → armed (lead-in) → transmitting → idle. Bytes are pulled from the
//! chip's [`ByteSource`] once per byte time and appended to the radio's
//! current [`Transmission`].

use std::sync::Arc;

use super::clock::{NodeClock, NodeEvent};
use super::hooks::{ByteSource, ChannelProbe};
use super::medium::{Medium, Transmission};
use super::types::{NodeId, Timing};

pub struct Transmitter {
    id: NodeId,
    medium: Arc<Medium>,
    timing: Timing,
    activated: bool,
    shutdown: bool,
    transmission: Option<Arc<Transmission>>,
    probes: Vec<Arc<dyn ChannelProbe>>,
}

impl Transmitter {
    pub fn new(id: NodeId, medium: Arc<Medium>, hz: u64) -> Self {
        let timing = Timing::new(hz, medium.config());
        Transmitter {
            id,
            medium,
            timing,
            activated: false,
            shutdown: false,
            transmission: None,
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

    /// The burst currently on the air, if any.
    pub fn transmission(&self) -> Option<&Arc<Transmission>> {
        self.transmission.as_ref()
    }

    pub fn add_probe(&mut self, probe: Arc<dyn ChannelProbe>) {
        self.probes.push(probe);
    }

    /// Open a transmission and schedule the first byte one lead time from
    /// now. Does nothing while already transmitting.
    ///
    /// A burst that was ended but has not reached its closing byte boundary
    /// is finished now, so the radio can re-arm straight after a frame.
    pub fn begin_transmit(&mut self, clock: &mut NodeClock, power: f64, frequency: f64) {
        if self.activated {
            if !self.shutdown {
                return;
            }
            clock.remove_event(NodeEvent::TransmitTick);
            self.finish(clock);
        }
        let transmission = self.medium.new_transmission(self.id, &self.timing, clock.now(), power, frequency);
        self.transmission = Some(transmission);
        self.activated = true;
        self.shutdown = false;
        clock.insert_event(NodeEvent::TransmitTick, self.timing.lead_cycles);
    }

    /// Request the end of the current transmission.
    ///
    /// The byte range is frozen immediately; the transmitter goes idle on its
    /// next byte boundary. Repeated calls are harmless.
    pub fn end_transmit(&mut self) {
        if !self.activated || self.shutdown {
            return;
        }
        self.shutdown = true;
        if let Some(transmission) = &self.transmission {
            transmission.seal();
        }
    }

    pub fn tick(&mut self, clock: &mut NodeClock, source: &mut dyn ByteSource) {
        if self.shutdown {
            self.finish(clock);
        } else if self.activated {
            let byte = source.produce_next_byte();
            if let Some(transmission) = &self.transmission {
                transmission.append(byte);
            }
            for probe in &self.probes {
                probe.before_transmit(self.id, byte);
            }
            clock.insert_event(NodeEvent::TransmitTick, self.timing.cycles_per_byte);
        }
    }

    fn finish(&mut self, clock: &NodeClock) {
        for probe in &self.probes {
            probe.before_transmit_end(self.id);
        }
        if let Some(transmission) = self.transmission.take() {
            transmission.finish(clock.now());
            log::trace!("Node {} finished transmission of {} bytes at cycle {}", self.id, transmission.len(), clock.now());
        }
        self.shutdown = false;
        self.activated = false;
    }
}
