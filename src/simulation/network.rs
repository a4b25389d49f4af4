//! Network harness: builds the shared medium and one radio node per
//! scenario entry, then runs every node on its own OS thread.
//!
//! High-level flow:
//! 1) Pick the arbitrator and register node positions from the topology.
//! 2) Create one [`ClockBarrier`] and register every node before any thread
//!    starts, so no node can run ahead of a neighbour that has not begun.
//! 3) Spawn one named thread per node; each runs its clock to the end of the
//!    scenario and leaves the barrier.
//! 4) Join all threads and gather their reports.

use anyhow::Context;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::arbitrator::{Arbitrator, BasicArbitrator};
use super::lossy::LossyModel;
use super::medium::Medium;
use super::node_task::{NodeReport, RunSettings, SimNode};
use super::radius::RadiusModel;
use super::synchronizer::{ClockBarrier, Synchronizer};
use super::types::NodeId;
use crate::common::noise::NoiseTrace;
use crate::common::scenario::{ArbitratorConfig, Scenario, validate_scenario, validate_topology};
use crate::common::topology::Topology;

/// Aggregated outcome of a run.
#[derive(Debug, Clone)]
pub struct NetworkReport {
    pub duration_ms: u64,
    pub seed: u64,
    pub wall_time: Duration,
    pub nodes: Vec<NodeReport>,
}

impl NetworkReport {
    pub fn frames_sent(&self) -> u64 {
        self.nodes.iter().map(|n| n.frames_sent).sum()
    }

    pub fn frames_received(&self) -> u64 {
        self.nodes.iter().map(|n| n.frames_received).sum()
    }

    pub fn crc_failures(&self) -> u64 {
        self.nodes.iter().map(|n| n.framer.crc_failures).sum()
    }

    /// Frames cut short by lock loss or failing their CRC, over all receivers.
    pub fn damaged_frames(&self) -> u64 {
        self.nodes
            .iter()
            .map(|n| n.framer.crc_failures + n.framer.frames_aborted)
            .sum()
    }

    pub fn cca_backoffs(&self) -> u64 {
        self.nodes.iter().map(|n| n.cca_backoffs).sum()
    }

    pub fn total_joules(&self) -> f64 {
        self.nodes.iter().map(|n| n.energy.joules()).sum()
    }

    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn log_summary(&self) {
        log::info!(
            "Simulated {} ms (seed {}) in {:.2?}: {} frames sent, {} received, {} damaged, {} CCA backoffs, {:.4} J",
            self.duration_ms,
            self.seed,
            self.wall_time,
            self.frames_sent(),
            self.frames_received(),
            self.damaged_frames(),
            self.cca_backoffs(),
            self.total_joules()
        );
        for node in &self.nodes {
            log::info!(
                "  {:>12} (#{}) sent {:>5} received {:>5} crc-fail {:>4} aborted {:>4} backoffs {:>4} rssi {} energy {:.4} J",
                node.name,
                node.id,
                node.frames_sent,
                node.frames_received,
                node.framer.crc_failures,
                node.framer.frames_aborted,
                node.cca_backoffs,
                node.mean_rssi_dbm
                    .map_or_else(|| "-".to_string(), |rssi| format!("{:.1} dBm", rssi)),
                node.energy.joules()
            );
        }
    }
}

pub struct Network {
    settings: RunSettings,
    barrier: Arc<ClockBarrier>,
    nodes: Vec<SimNode>,
}

/// Node ids start at 1; id 0 is never handed out as a short address.
fn node_id(index: usize) -> NodeId {
    index as NodeId + 1
}

fn build_arbitrator(scenario: &Scenario, topology: Option<&Topology>, noise: NoiseTrace, seed: u64) -> Box<dyn Arbitrator> {
    let positions = topology
        .map(|t| t.entries().iter().map(|e| e.position).collect::<Vec<_>>())
        .unwrap_or_default();
    match &scenario.arbitrator {
        ArbitratorConfig::Basic => Box::new(BasicArbitrator::default()),
        ArbitratorConfig::Radius {
            min_distance,
            max_distance,
        } => {
            let mut model = RadiusModel::new(*min_distance, *max_distance);
            for (index, position) in positions.into_iter().take(scenario.nodes.len()).enumerate() {
                model.set_position(node_id(index), position);
            }
            Box::new(model)
        }
        ArbitratorConfig::Lossy => {
            let mut model = LossyModel::with_seed(noise, seed);
            for (index, position) in positions.into_iter().take(scenario.nodes.len()).enumerate() {
                model.set_position(node_id(index), position);
            }
            Box::new(model)
        }
    }
}

impl Network {
    /// Build every node of `scenario` on one shared medium.
    ///
    /// # Parameters
    ///
    /// * `scenario` - Validated scenario
    /// * `topology` - Node positions, required by position-dependent arbitrators
    /// * `noise` - Ambient noise used by the lossy arbitrator
    pub fn build(scenario: &Scenario, topology: Option<&Topology>, noise: NoiseTrace) -> anyhow::Result<Network> {
        validate_scenario(scenario).map_err(anyhow::Error::msg)?;
        validate_topology(scenario, topology).map_err(anyhow::Error::msg)?;
        let config = scenario.medium.resolve().map_err(anyhow::Error::msg)?;

        let seed = scenario.seed.unwrap_or_else(rand::random);
        let settings = RunSettings {
            clock_hz: scenario.clock_hz,
            duration_ms: scenario.duration_ms,
            sync_period_us: scenario.sync_period_us,
            seed,
        };

        let barrier = Arc::new(ClockBarrier::new());
        let arbitrator = build_arbitrator(scenario, topology, noise, seed);
        let synchronizer: Arc<dyn Synchronizer> = barrier.clone();
        let medium = Arc::new(Medium::with_arbitrator(config, arbitrator, Some(synchronizer)));

        let nodes: Vec<SimNode> = scenario
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| {
                let id = node_id(index);
                barrier.add_node(id);
                SimNode::new(id, node, &settings, Arc::clone(&medium), Arc::clone(&barrier))
            })
            .collect();

        log::info!(
            "Built network of {} nodes ({:?} arbitrator, {} bps, seed {})",
            nodes.len(),
            scenario.arbitrator,
            config.bits_per_second,
            seed
        );
        Ok(Network {
            settings,
            barrier,
            nodes,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Run every node to the end of the scenario on its own thread.
    pub fn run(self) -> anyhow::Result<NetworkReport> {
        let started = Instant::now();
        let mut handles = Vec::with_capacity(self.nodes.len());
        let mut pending = self.nodes.into_iter();

        while let Some(node) = pending.next() {
            let id = node.id();
            let spawned = thread::Builder::new()
                .name(format!("node-{}-{}", id, node.name()))
                .spawn(move || node.run());
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    // Unspawned nodes would hold every running neighbour at the barrier.
                    self.barrier.remove_node(id);
                    for node in pending {
                        self.barrier.remove_node(node.id());
                    }
                    return Err(e).with_context(|| format!("Failed to spawn thread for node {}", id));
                }
            }
        }

        let mut nodes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let report = handle
                .join()
                .map_err(|_| anyhow::anyhow!("Node {} thread panicked", id))?;
            nodes.push(report);
        }

        Ok(NetworkReport {
            duration_ms: self.settings.duration_ms,
            seed: self.settings.seed,
            wall_time: started.elapsed(),
            nodes,
        })
    }
}
