//! Distance-threshold arbitrator.
//!
//! A binary channel: receivers within `max_distance` of the transmitter lock
//! and receive perfectly, everyone else hears nothing.

use std::collections::HashMap;
use std::sync::Arc;

use super::arbitrator::{Arbitrator, merge_bytes};
use super::geometry::{Position, distance2};
use super::medium::{ReceiverInfo, Transmission};
use super::types::{ChannelByte, NodeId};

const RECEIVED_POWER_DBM: f64 = 0.0;
const NOISE_DBM: f64 = -90.0;

#[derive(Debug, Clone)]
pub struct RadiusModel {
    min_distance: f64,
    max_distance: f64,
    positions: HashMap<NodeId, Position>,
}

impl RadiusModel {
    pub fn new(min_distance: f64, max_distance: f64) -> Self {
        RadiusModel {
            min_distance,
            max_distance,
            positions: HashMap::new(),
        }
    }

    pub fn set_position(&mut self, node: NodeId, position: Position) {
        self.positions.insert(node, position);
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// # Panics
    ///
    /// Panics if `node` was never registered.
    fn position(&self, node: NodeId) -> &Position {
        self.positions
            .get(&node)
            .unwrap_or_else(|| panic!("radius model has no position for node {}", node))
    }

    /// Squared distance between two nodes, clamped below at the minimum distance.
    pub fn clamped_distance2(&self, a: NodeId, b: NodeId) -> f64 {
        let d2 = distance2(self.position(a), self.position(b));
        d2.max(self.min_distance * self.min_distance)
    }
}

impl Arbitrator for RadiusModel {
    fn lock_transmission(&self, receiver: &ReceiverInfo, transmission: &Transmission, _millis: u64) -> bool {
        self.clamped_distance2(transmission.origin(), receiver.id) <= self.max_distance * self.max_distance
    }

    fn merge_transmissions(&self, _receiver: &ReceiverInfo, transmissions: &[Arc<Transmission>], bit: i64, _millis: u64) -> ChannelByte {
        assert!(!transmissions.is_empty(), "merging zero transmissions");
        merge_bytes(transmissions.iter().map(|t| t.byte_at_bit(bit)))
    }

    fn compute_received_power(&self, _transmission: &Transmission, _receiver: &ReceiverInfo, _millis: u64) -> f64 {
        RECEIVED_POWER_DBM
    }

    fn noise(&self, _millis: u64) -> f64 {
        NOISE_DBM
    }
}
