//! Radio chips attached to the shared medium.
//!
//! A radio owns one [`Transmitter`] and one [`Receiver`] and feeds them from
//! its packet framer. Every radio starts on a private medium so it can be
//! exercised alone; the network harness swaps in the shared one with
//! [`Radio::set_medium`] once all nodes exist.

use std::sync::Arc;

use crate::simulation::clock::{NodeClock, NodeEvent};
use crate::simulation::medium::Medium;
use crate::simulation::receiver::Receiver;
use crate::simulation::transmitter::Transmitter;

pub mod cc2420;
pub mod energy;
pub mod fifo;
pub mod framer;

pub use cc2420::{Cc2420, Strobe};
pub use energy::{EnergyMeter, EnergySummary, RadioMode, StateObserver};
pub use framer::{AddressFilter, FramerConfig, FramerStats, PacketFramer};

/// Direction change requested by a framer at the end of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSwitch {
    Receive,
    Transmit,
}

pub trait Radio: Send {
    fn transmitter(&self) -> &Transmitter;

    fn receiver(&self) -> &Receiver;

    fn medium(&self) -> &Arc<Medium>;

    /// Attach the radio to `medium`, replacing its endpoints.
    fn set_medium(&mut self, medium: Arc<Medium>);

    /// Handle a clock event addressed to the radio. Events the radio does
    /// not own are ignored.
    fn fire(&mut self, clock: &mut NodeClock, event: NodeEvent);
}
