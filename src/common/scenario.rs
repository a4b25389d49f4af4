//! Scenario loading, parsing, and validation.
//!
//! A scenario is a TOML file (JSON when the extension is `.json`) naming the
//! medium, the arbitrator, the node list and optional topology and noise
//! trace files. Relative file paths resolve against the scenario's directory.

use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::noise::NoiseTrace;
use super::topology::Topology;
use crate::simulation::types::MediumConfig;

/// MAC header plus CRC of the frames the beacon application sends.
pub const FRAME_OVERHEAD_BYTES: usize = 11;
/// Largest PSDU an 802.15.4 length byte can announce.
pub const MAX_FRAME_BYTES: usize = 127;

fn default_clock_hz() -> u64 {
    7_372_800
}

fn default_sync_period_us() -> u64 {
    1000
}

fn default_send_interval_ms() -> u64 {
    100
}

fn default_payload_length() -> usize {
    20
}

fn default_channel() -> u8 {
    11
}

/// Medium selection: a preset name or explicit parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MediumSpec {
    Preset(String),
    Explicit(MediumConfig),
}

impl Default for MediumSpec {
    fn default() -> Self {
        MediumSpec::Preset("cc2420".to_string())
    }
}

impl MediumSpec {
    pub fn resolve(&self) -> Result<MediumConfig, String> {
        match self {
            MediumSpec::Explicit(config) => Ok(*config),
            MediumSpec::Preset(name) => match name.to_ascii_lowercase().as_str() {
                "cc2420" => Ok(MediumConfig::CC2420),
                "cc1000" => Ok(MediumConfig::CC1000),
                other => Err(format!("Unknown medium preset '{}'", other)),
            },
        }
    }
}

/// Propagation model shared by every node.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum ArbitratorConfig {
    /// Lossless: every receiver hears every transmission.
    #[default]
    Basic,
    /// Disc model over topology positions, in meters.
    Radius { min_distance: f64, max_distance: f64 },
    /// Statistical path loss, fading and shadowing over topology positions.
    Lossy,
}

impl ArbitratorConfig {
    pub fn needs_positions(&self) -> bool {
        !matches!(self, ArbitratorConfig::Basic)
    }
}

/// One simulated node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Beacon period; 0 makes the node a pure listener.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default = "default_payload_length")]
    pub payload_length: usize,
    /// Delay before the node powers its radio up.
    #[serde(default)]
    pub start_offset_us: u64,
    /// IEEE 802.15.4 channel, 11..=26.
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_clock_hz")]
    pub clock_hz: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub medium: MediumSpec,
    #[serde(default)]
    pub arbitrator: ArbitratorConfig,
    #[serde(default)]
    pub topology: Option<PathBuf>,
    #[serde(default)]
    pub noise: Option<PathBuf>,
    #[serde(default = "default_sync_period_us")]
    pub sync_period_us: u64,
    pub nodes: Vec<NodeConfig>,
}

impl Scenario {
    /// Load the topology file, if one is named.
    pub fn load_topology(&self) -> anyhow::Result<Option<Topology>> {
        self.topology.as_deref().map(Topology::load).transpose()
    }

    /// Load the noise trace, or the constant default floor when none is named.
    pub fn load_noise(&self) -> anyhow::Result<NoiseTrace> {
        match &self.noise {
            Some(path) => NoiseTrace::load(path),
            None => Ok(NoiseTrace::default()),
        }
    }
}

/// Parse scenario text. `json` selects JSON over TOML.
pub fn parse_scenario(text: &str, json: bool) -> anyhow::Result<Scenario> {
    if json {
        serde_json::from_str(text).context("Invalid JSON scenario")
    } else {
        toml::from_str(text).context("Invalid TOML scenario")
    }
}

/// Load, resolve and validate a scenario file.
///
/// # Parameters
///
/// * `path` - Scenario file; `.json` is parsed as JSON, anything else as TOML
///
/// # Returns
///
/// The validated scenario with topology and noise paths made relative to
/// the scenario's directory, or an error naming the file.
pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
    let json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let mut scenario =
        parse_scenario(&text, json).with_context(|| format!("Failed to parse scenario file: {}", path.display()))?;

    if let Some(parent_dir) = path.parent() {
        scenario.topology = scenario.topology.map(|p| parent_dir.join(p));
        scenario.noise = scenario.noise.map(|p| parent_dir.join(p));
    }

    validate_scenario(&scenario).map_err(|e| anyhow::anyhow!("Invalid scenario {}: {}", path.display(), e))?;
    log::info!(
        "Loaded scenario {} with {} nodes for {} ms",
        path.display(),
        scenario.nodes.len(),
        scenario.duration_ms
    );
    Ok(scenario)
}

/// Validate a scenario on its own.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` describing the first
/// violated rule otherwise.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    const MAX_NODES: usize = 1000;
    const MIN_CHANNEL: u8 = 11;
    const MAX_CHANNEL: u8 = 26;

    if scenario.nodes.is_empty() {
        return Err("Scenario must contain at least one node".to_string());
    }
    if scenario.nodes.len() > MAX_NODES {
        return Err(format!(
            "Node count {} exceeds maximum of {}",
            scenario.nodes.len(),
            MAX_NODES
        ));
    }

    let mut names = HashSet::new();
    for node in &scenario.nodes {
        if !names.insert(node.name.as_str()) {
            return Err(format!("Duplicate node name found: {}", node.name));
        }
    }

    let medium = scenario.medium.resolve()?;
    if medium.bits_per_second == 0 {
        return Err("Medium bit rate must be positive".to_string());
    }
    if scenario.clock_hz <= medium.bits_per_second as u64 {
        return Err(format!(
            "clock_hz {} must exceed the medium bit rate of {} bps",
            scenario.clock_hz, medium.bits_per_second
        ));
    }
    if scenario.duration_ms == 0 {
        return Err("duration_ms must be positive".to_string());
    }

    if let ArbitratorConfig::Radius {
        min_distance,
        max_distance,
    } = scenario.arbitrator
    {
        if min_distance < 0.0 || max_distance < min_distance {
            return Err(format!(
                "Radius model needs 0 <= min_distance <= max_distance (got {} and {})",
                min_distance, max_distance
            ));
        }
    }
    if scenario.arbitrator.needs_positions() && scenario.topology.is_none() {
        return Err("The selected arbitrator requires a 'topology' file".to_string());
    }

    for node in &scenario.nodes {
        if node.payload_length + FRAME_OVERHEAD_BYTES > MAX_FRAME_BYTES {
            return Err(format!(
                "Node {} payload_length {} exceeds the {} byte frame limit",
                node.name,
                node.payload_length,
                MAX_FRAME_BYTES - FRAME_OVERHEAD_BYTES
            ));
        }
        if !(MIN_CHANNEL..=MAX_CHANNEL).contains(&node.channel) {
            return Err(format!(
                "Node {} channel {} outside {}..={}",
                node.name, node.channel, MIN_CHANNEL, MAX_CHANNEL
            ));
        }
    }

    Ok(())
}

/// Check that a loaded topology covers every node of `scenario`.
pub fn validate_topology(scenario: &Scenario, topology: Option<&Topology>) -> Result<(), String> {
    if !scenario.arbitrator.needs_positions() {
        return Ok(());
    }
    let entries = topology.map_or(0, Topology::len);
    if entries < scenario.nodes.len() {
        return Err(format!(
            "Topology has {} entries but the scenario has {} nodes",
            entries,
            scenario.nodes.len()
        ));
    }
    Ok(())
}
