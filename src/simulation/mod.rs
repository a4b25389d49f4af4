//! Channel engine and network harness.
//!
//! ## Module Organization
//!
//! - `types`: Cycles, node ids, corruption-annotated bytes and medium timing
//! - `clock`: Per-node virtual clock and event queue
//! - `synchronizer`: Cross-node causality barrier
//! - `medium`: Shared transmission list
//! - `transmitter` / `receiver`: Radio endpoints attached to a medium
//! - `hooks`: Traits tying endpoints to a chip's framer
//! - `arbitrator`, `radius`, `lossy`: Propagation policies
//! - `geometry`, `signal_calculations`: Distance and signal math
//! - `node_task`: One simulated node with its radio and beacon firmware
//! - `network`: Builds all nodes on one medium and runs them on threads

pub mod arbitrator;
pub mod clock;
pub mod geometry;
pub mod hooks;
pub mod lossy;
pub mod medium;
pub mod network;
pub mod node_task;
pub mod radius;
pub mod receiver;
pub mod signal_calculations;
pub mod synchronizer;
pub mod transmitter;
pub mod types;

pub use arbitrator::{Arbitrator, BasicArbitrator};
pub use clock::{NodeClock, NodeEvent};
pub use medium::{Medium, Transmission};
pub use network::{Network, NetworkReport};
pub use node_task::{NodeReport, RunSettings, SimNode};
pub use synchronizer::{ClockBarrier, Synchronizer};
pub use types::{ChannelByte, Cycle, MediumConfig, NodeId, Timing};
