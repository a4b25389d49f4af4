//! Per-node simulation thread.
//!
//! Each node owns its clock, its CC2420 radio and a small beacon
//! application playing the role of firmware:
//! - powers the radio up, enables address recognition and starts listening
//! - periodically broadcasts a data frame, gated by clear channel assessment
//! - drains complete frames from the RX FIFO and counts them
//!
//! Before every event the node publishes the time of its next event to the
//! shared [`ClockBarrier`], so neighbours scanning the medium never read
//! ahead of it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use super::clock::{NodeClock, NodeEvent};
use super::medium::Medium;
use super::synchronizer::ClockBarrier;
use super::types::{Cycle, NodeId};
use crate::common::scenario::NodeConfig;
use crate::radio::cc2420::XOSC_START_MICROS;
use crate::radio::{AddressFilter, Cc2420, EnergySummary, FramerStats, Radio, Strobe};

/// PAN shared by every simulated node.
pub const NETWORK_PAN: u16 = 0x22;

/// MAC header of a broadcast data frame with short addresses.
pub const MAC_HEADER_BYTES: usize = 9;
pub const CRC_BYTES: usize = 2;

/// 802.15.4 unit backoff period, 20 symbols at 62.5 ksymbol/s.
const UNIT_BACKOFF_MICROS: u64 = 320;
const MAX_BACKOFF_UNITS: u64 = 8;

const TIMER_POWER_UP: u32 = 0;
const TIMER_LISTEN: u32 = 1;
const TIMER_SEND: u32 = 2;

/// Keeps a node registered with the barrier for as long as it runs. Dropping
/// it, on a normal exit or while unwinding, releases the neighbours.
struct BarrierGuard {
    barrier: Arc<ClockBarrier>,
    id: NodeId,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.barrier.remove_node(self.id);
    }
}

/// Parameters shared by every node of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub clock_hz: u64,
    pub duration_ms: u64,
    pub sync_period_us: u64,
    pub seed: u64,
}

/// Outcome of one node's run.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub cca_backoffs: u64,
    pub overflow_flushes: u64,
    /// Mean RSSI of received frames in dBm.
    pub mean_rssi_dbm: Option<f64>,
    pub framer: FramerStats,
    pub energy: EnergySummary,
}

struct BeaconApp {
    interval: Cycle,
    payload_length: usize,
    start_offset: Cycle,
    channel: u8,
    sequence: u8,
    rng: StdRng,
    frames_sent: u64,
    frames_received: u64,
    cca_backoffs: u64,
    overflow_flushes: u64,
    rssi_sum: f64,
}

impl BeaconApp {
    fn new(config: &NodeConfig, clock: &NodeClock, seed: u64) -> Self {
        BeaconApp {
            interval: clock.millis_to_cycles(config.send_interval_ms),
            payload_length: config.payload_length,
            start_offset: clock.micros_to_cycles(config.start_offset_us),
            channel: config.channel,
            sequence: 0,
            rng: StdRng::seed_from_u64(seed),
            frames_sent: 0,
            frames_received: 0,
            cca_backoffs: 0,
            overflow_flushes: 0,
            rssi_sum: 0.0,
        }
    }

    fn frame(&mut self, source: NodeId) -> Vec<u8> {
        let mut body = Vec::with_capacity(MAC_HEADER_BYTES + self.payload_length);
        // Data frame, PAN ID compression, short destination and source.
        body.extend_from_slice(&[0x41, 0x88, self.sequence]);
        body.extend_from_slice(&NETWORK_PAN.to_le_bytes());
        body.extend_from_slice(&0xFFFFu16.to_le_bytes());
        body.extend_from_slice(&(source as u16).to_le_bytes());
        body.extend((0..self.payload_length).map(|i| self.sequence.wrapping_add(i as u8)));
        self.sequence = self.sequence.wrapping_add(1);
        body
    }

    fn backoff(&mut self, clock: &NodeClock) -> Cycle {
        let units = self.rng.gen_range(1..=MAX_BACKOFF_UNITS);
        clock.micros_to_cycles(units * UNIT_BACKOFF_MICROS)
    }
}

pub struct SimNode {
    id: NodeId,
    name: String,
    clock: NodeClock,
    radio: Cc2420,
    app: BeaconApp,
    barrier: Arc<ClockBarrier>,
    sync_period: Cycle,
    stop: Cycle,
}

impl SimNode {
    /// A node attached to the shared `medium`. The node must already be
    /// registered with `barrier`.
    pub fn new(id: NodeId, config: &NodeConfig, settings: &RunSettings, medium: Arc<Medium>, barrier: Arc<ClockBarrier>) -> Self {
        let clock = NodeClock::new(settings.clock_hz);
        let node_seed = settings.seed ^ (id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut radio = Cc2420::new(id, settings.clock_hz, node_seed);
        radio.set_medium(medium);
        radio.set_address(AddressFilter {
            pan_id: NETWORK_PAN,
            short_address: id as u16,
            ieee_address: id as u64,
        });
        let app = BeaconApp::new(config, &clock, node_seed.rotate_left(17));
        SimNode {
            id,
            name: config.name.clone(),
            sync_period: clock.micros_to_cycles(settings.sync_period_us).max(1),
            stop: clock.millis_to_cycles(settings.duration_ms),
            clock,
            radio,
            app,
            barrier,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until the configured duration and report. Always leaves the barrier,
    /// so neighbours are never blocked on a finished node.
    pub fn run(mut self) -> NodeReport {
        log::debug!("Node {} ({}) starting", self.id, self.name);
        let guard = BarrierGuard {
            barrier: Arc::clone(&self.barrier),
            id: self.id,
        };
        self.clock.insert_event(NodeEvent::App(TIMER_POWER_UP), self.app.start_offset);
        self.clock.insert_event(NodeEvent::Synchronize, self.sync_period);

        loop {
            let next = self.clock.next_event_time().unwrap_or(self.stop).min(self.stop);
            self.barrier.advance(self.id, next);
            let Some(event) = self.clock.pop_until(self.stop) else {
                break;
            };
            self.dispatch(event);
        }
        self.clock.advance_to(self.stop);
        drop(guard);

        let report = self.report();
        log::debug!(
            "Node {} ({}) finished: sent {}, received {}, backoffs {}",
            report.id,
            report.name,
            report.frames_sent,
            report.frames_received,
            report.cca_backoffs
        );
        report
    }

    fn dispatch(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Synchronize => {
                self.clock.insert_event(NodeEvent::Synchronize, self.sync_period);
            }
            NodeEvent::App(TIMER_POWER_UP) => {
                self.radio.set_channel(&mut self.clock, self.app.channel);
                self.radio.strobe(&mut self.clock, Strobe::XoscOn);
                let settle = self.clock.micros_to_cycles(XOSC_START_MICROS);
                self.clock.insert_event(NodeEvent::App(TIMER_LISTEN), settle);
            }
            NodeEvent::App(TIMER_LISTEN) => {
                self.radio.strobe(&mut self.clock, Strobe::RxOn);
                if self.app.interval > 0 {
                    let jitter = self.app.rng.gen_range(0..self.app.interval);
                    self.clock.insert_event(NodeEvent::App(TIMER_SEND), jitter);
                }
            }
            NodeEvent::App(TIMER_SEND) => self.send(),
            NodeEvent::App(other) => log::warn!("Node {} ignoring unknown timer {}", self.id, other),
            radio_event => self.radio.fire(&mut self.clock, radio_event),
        }
        self.poll_rx();
    }

    fn send(&mut self) {
        if self.radio.is_transmitting() || !self.radio.cca(&self.clock) {
            self.app.cca_backoffs += 1;
            let delay = self.app.backoff(&self.clock);
            self.clock.insert_event(NodeEvent::App(TIMER_SEND), delay);
            return;
        }

        let body = self.app.frame(self.id);
        self.radio.strobe(&mut self.clock, Strobe::FlushTx);
        self.radio.write_tx_fifo((body.len() + CRC_BYTES) as u8);
        for byte in &body {
            self.radio.write_tx_fifo(*byte);
        }
        self.radio.strobe(&mut self.clock, Strobe::TxOnCca);
        if self.radio.is_transmitting() {
            self.app.frames_sent += 1;
            log::trace!("Node {} sent frame {} at cycle {}", self.id, body[2], self.clock.now());
        } else {
            self.app.cca_backoffs += 1;
        }
        self.clock.insert_event(NodeEvent::App(TIMER_SEND), self.app.interval);
    }

    /// Read every complete frame out of the RX FIFO.
    fn poll_rx(&mut self) {
        if self.radio.rx_overflow() {
            self.radio.strobe(&mut self.clock, Strobe::FlushRx);
            self.app.overflow_flushes += 1;
            return;
        }
        if !self.radio.fifop() || self.radio.sfd() {
            return;
        }
        while self.radio.fifo() {
            let length = self.radio.read_rx_fifo() as usize;
            let frame: Vec<u8> = (0..length).map(|_| self.radio.read_rx_fifo()).collect();
            if length < CRC_BYTES || frame[length - 1] & 0x80 == 0 {
                continue;
            }
            let rssi = frame[length - 2] as i8 as f64 - 45.0;
            self.app.frames_received += 1;
            self.app.rssi_sum += rssi;
            log::trace!("Node {} received {} byte frame at {:.1} dBm", self.id, length, rssi);
        }
    }

    fn report(&self) -> NodeReport {
        let received = self.app.frames_received;
        NodeReport {
            id: self.id,
            name: self.name.clone(),
            frames_sent: self.app.frames_sent,
            frames_received: received,
            cca_backoffs: self.app.cca_backoffs,
            overflow_flushes: self.app.overflow_flushes,
            mean_rssi_dbm: (received > 0).then(|| self.app.rssi_sum / received as f64),
            framer: self.radio.framer_stats(),
            energy: self.radio.energy(&self.clock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::arbitrator::BasicArbitrator;
    use crate::simulation::synchronizer::Synchronizer;
    use crate::simulation::types::MediumConfig;
    use std::thread;

    fn settings(duration_ms: u64, sync_period_us: u64, seed: u64) -> RunSettings {
        RunSettings {
            clock_hz: 8_000_000,
            duration_ms,
            sync_period_us,
            seed,
        }
    }

    fn config(name: &str, send_interval_ms: u64, start_offset_us: u64) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            send_interval_ms,
            payload_length: 12,
            start_offset_us,
            channel: 11,
        }
    }

    fn spawn(node: SimNode) -> thread::JoinHandle<NodeReport> {
        thread::Builder::new()
            .name(format!("node-{}", node.id()))
            .spawn(move || node.run())
            .expect("spawn node thread")
    }

    #[test]
    fn lone_node_broadcasts_on_schedule() {
        let barrier = Arc::new(ClockBarrier::new());
        let medium = Arc::new(Medium::with_arbitrator(
            MediumConfig::CC2420,
            Box::new(BasicArbitrator::default()),
            Some(Arc::clone(&barrier) as Arc<dyn Synchronizer>),
        ));
        barrier.add_node(1);
        let node = SimNode::new(1, &config("solo", 10, 0), &settings(105, 1000, 3), medium, Arc::clone(&barrier));
        let report = node.run();

        // First send jittered within the first interval, then every 10 ms.
        assert!((10..=11).contains(&report.frames_sent), "sent {}", report.frames_sent);
        assert!(report.framer.frames_sent + 1 >= report.frames_sent);
        assert_eq!(report.frames_received, 0);
        assert_eq!(report.cca_backoffs, 0);
        assert_eq!(barrier.node_count(), 0);
        assert!(report.energy.receive_seconds() > 0.08);
    }

    #[test]
    fn two_threaded_nodes_hear_each_other() {
        let barrier = Arc::new(ClockBarrier::new());
        let medium = Arc::new(Medium::with_arbitrator(
            MediumConfig::CC2420,
            Box::new(BasicArbitrator::default()),
            Some(Arc::clone(&barrier) as Arc<dyn Synchronizer>),
        ));
        barrier.add_node(1);
        barrier.add_node(2);
        let run = settings(200, 500, 9);
        let a = SimNode::new(1, &config("a", 0, 0), &run, Arc::clone(&medium), Arc::clone(&barrier));
        let b = SimNode::new(2, &config("b", 20, 300), &run, medium, Arc::clone(&barrier));

        let a = spawn(a);
        let b = spawn(b);
        let listener = a.join().expect("node a panicked");
        let beacon = b.join().expect("node b panicked");

        assert_eq!(listener.frames_sent, 0);
        assert!(beacon.frames_sent >= 9);
        // The last frame may still be on the air when the run stops.
        assert!(listener.frames_received + 1 >= beacon.frames_sent);
        assert!(listener.frames_received <= beacon.frames_sent);
        assert_eq!(listener.framer.crc_failures, 0);
        assert_eq!(listener.mean_rssi_dbm, Some(0.0));
    }
}
