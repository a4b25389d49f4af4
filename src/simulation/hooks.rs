//! Capability traits connecting the channel engine to a chip's framing logic.

use super::types::{ChannelByte, NodeId};

/// Supplies the next byte a transmitter puts on the air.
pub trait ByteSource {
    fn produce_next_byte(&mut self) -> u8;
}

/// Accepts bytes (and link statistics) from a receiver.
pub trait ByteSink {
    /// Deliver one unit. `locked == false` signals that the tracked
    /// transmission was lost; `byte` is then meaningless. Returns the byte
    /// value the chip actually latched.
    fn consume_next_byte(&mut self, locked: bool, byte: ChannelByte) -> u8;

    fn set_rssi(&mut self, rssi_dbm: f64);

    fn set_ber(&mut self, ber: f64);
}

/// Optional observer of endpoint activity. All methods default to no-ops.
pub trait ChannelProbe: Send + Sync {
    fn before_transmit(&self, _node: NodeId, _byte: u8) {}

    fn before_transmit_end(&self, _node: NodeId) {}

    fn after_receive(&self, _node: NodeId, _byte: ChannelByte) {}

    fn after_receive_end(&self, _node: NodeId) {}
}
