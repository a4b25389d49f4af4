//! Statistical indoor channel.
//!
//! Received power is `Pt − Fading − PathLoss`:
//! - PathLoss follows the log-distance model of [`log_distance_path_loss`].
//! - Fading mixes a line-of-sight Rician regime and a shadowed Rayleigh
//!   regime (Lutz model). The share of time spent in the good regime,
//!   `A = (1 − ρ)^(0.2·d)`, shrinks with obstacle density ρ and distance d.
//! - Shadowing is log-normal with mean `(3dρ)^0.7` and deviation
//!   `log₇(55dρ + 1) + 0.5`, correlated in time by a first-order
//!   autoregressive process refreshed once per simulated second.
//!
//! A receiver locks only onto transmissions on its frequency that arrive
//! above both the sensitivity floor and the current ambient noise.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::arbitrator::{Arbitrator, merge_bytes};
use super::geometry::{Position, distance, link_density};
use super::medium::{ReceiverInfo, Transmission};
use super::signal_calculations::{log_distance_path_loss, rayleigh_envelope, rician_envelope};
use super::types::{ChannelByte, NodeId};
use crate::common::noise::NoiseTrace;

/// Weakest signal a receiver can lock onto, in dBm.
pub const SENSITIVITY_DBM: f64 = -95.0;

/// Shadowing refresh period in simulated milliseconds.
const SHADOWING_PERIOD_MS: u64 = 1000;

/// Shadowing correlation between consecutive refreshes.
fn shadowing_lambda() -> f64 {
    (-5.0f64 / 6.0).exp()
}

#[derive(Debug, Default)]
struct ShadowingState {
    initial: Option<f64>,
    last_update_ms: u64,
    correlated: f64,
}

#[derive(Debug)]
pub struct LossyModel {
    positions: HashMap<NodeId, Position>,
    noise: NoiseTrace,
    shadowing: Mutex<ShadowingState>,
    rng: Mutex<StdRng>,
}

impl LossyModel {
    pub fn new(noise: NoiseTrace) -> Self {
        Self::with_rng(noise, StdRng::from_entropy())
    }

    pub fn with_seed(noise: NoiseTrace, seed: u64) -> Self {
        Self::with_rng(noise, StdRng::seed_from_u64(seed))
    }

    fn with_rng(noise: NoiseTrace, rng: StdRng) -> Self {
        LossyModel {
            positions: HashMap::new(),
            noise,
            shadowing: Mutex::new(ShadowingState::default()),
            rng: Mutex::new(rng),
        }
    }

    pub fn set_position(&mut self, node: NodeId, position: Position) {
        self.positions.insert(node, position);
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Panics
    ///
    /// Panics if `node` was never registered.
    fn position(&self, node: NodeId) -> &Position {
        self.positions
            .get(&node)
            .unwrap_or_else(|| panic!("lossy model has no position for node {}", node))
    }

    fn gaussian(&self, mean: f64, std_dev: f64) -> f64 {
        match Normal::new(mean, std_dev) {
            Ok(normal) => normal.sample(&mut *self.rng()),
            Err(_) => mean,
        }
    }

    /// Correlated shadowing sample in dB.
    ///
    /// The first call draws the initial value. During the first simulated
    /// second that value is held; afterwards the process
    /// `S = λ·S + sqrt(1 − λ²)·N(mean, σ)` advances at most once per second.
    fn shadowing(&self, mean: f64, std_dev: f64, millis: u64) -> f64 {
        let mut state = self.shadowing.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(initial) = state.initial else {
            let s = self.gaussian(mean, std_dev);
            state.initial = Some(s);
            return s;
        };
        if millis < SHADOWING_PERIOD_MS {
            state.correlated = initial;
        } else if millis - state.last_update_ms > SHADOWING_PERIOD_MS {
            let lambda = shadowing_lambda();
            let u = (1.0 - lambda * lambda).sqrt();
            state.last_update_ms = millis;
            state.correlated = lambda * state.correlated + u * self.gaussian(mean, std_dev);
        }
        state.correlated
    }

    /// Fading loss in dB for a link of length `d` meters through obstacle density `rho`.
    fn fading(&self, d: f64, rho: f64, millis: u64) -> f64 {
        let good_share = (1.0 - rho).powf(0.2 * d);
        let rayleigh = rayleigh_envelope(&mut *self.rng());
        let rician = rician_envelope(rayleigh);
        let std_dev = (55.0 * d * rho + 1.0).log10() / 7f64.log10() + 0.5;
        let mean = (3.0 * d * rho).powf(0.7);
        let s = self.shadowing(mean, std_dev, millis);
        let shadow_gain = 10f64.powf(s / 20.0);
        10.0 * (good_share * rician + (1.0 - good_share) * shadow_gain * rayleigh).log10()
    }
}

impl Arbitrator for LossyModel {
    fn lock_transmission(&self, receiver: &ReceiverInfo, transmission: &Transmission, millis: u64) -> bool {
        if transmission.frequency() != receiver.frequency {
            return false;
        }
        let power = self.compute_received_power(transmission, receiver, millis);
        power > SENSITIVITY_DBM && power > self.noise(millis)
    }

    /// Only transmissions that pass the lock test contribute. If none does,
    /// the strongest-first byte is delivered with every bit marked corrupt.
    fn merge_transmissions(&self, receiver: &ReceiverInfo, transmissions: &[Arc<Transmission>], bit: i64, millis: u64) -> ChannelByte {
        assert!(!transmissions.is_empty(), "merging zero transmissions");
        let audible: Vec<u8> = transmissions
            .iter()
            .filter(|t| self.lock_transmission(receiver, t, millis))
            .map(|t| t.byte_at_bit(bit))
            .collect();
        if audible.is_empty() {
            return ChannelByte::new(transmissions[0].byte_at_bit(bit), 0xff);
        }
        merge_bytes(audible)
    }

    fn compute_received_power(&self, transmission: &Transmission, receiver: &ReceiverInfo, millis: u64) -> f64 {
        let from = self.position(transmission.origin());
        let to = self.position(receiver.id);
        let d = distance(from, to);
        let rho = link_density(from, to);
        transmission.power() - self.fading(d, rho, millis) - log_distance_path_loss(d)
    }

    fn noise(&self, millis: u64) -> f64 {
        self.noise.sample(millis)
    }
}
