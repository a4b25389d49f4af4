//! Radio signal calculations.
//!
//! Contains helpers for:
//! - dBm / mW conversion for accumulating interference in the linear domain
//! - Log-distance path loss
//! - Rayleigh and Rician fast-fading envelopes
//! - Bit error probability of a binary link in an AWGN channel
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Distance: meters

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Reference path loss measured at d₀ = 1 m, in dB.
pub const REFERENCE_PATH_LOSS: f64 = 55.0;

/// Indoor log-distance path loss exponent.
pub const PATH_LOSS_EXPONENT: f64 = 3.0;

/// Rician k-factor of the line-of-sight fading regime.
pub const RICIAN_K_FACTOR: f64 = 6.0;

/// Calculate the deterministic path loss (in dB) at a given distance.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d)     for d > 1 m
/// PL(d) = PL(d₀)                           otherwise
/// ```
///
/// Where `PL(d₀)` is [`REFERENCE_PATH_LOSS`] and `n` is [`PATH_LOSS_EXPONENT`].
///
/// # Parameters
///
/// - `distance`: The distance between transmitter and receiver in meters
///
/// # Returns
///
/// Path loss in decibels (dB).
pub fn log_distance_path_loss(distance: f64) -> f64 {
    if distance > 1.0 {
        REFERENCE_PATH_LOSS + 10.0 * PATH_LOSS_EXPONENT * distance.log10()
    } else {
        REFERENCE_PATH_LOSS
    }
}

/// Magnitude of a complex sample with independent N(0,1) components.
pub fn rayleigh_envelope<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let re: f64 = StandardNormal.sample(rng);
    let im: f64 = StandardNormal.sample(rng);
    re.hypot(im)
}

/// Rician envelope derived from a Rayleigh sample: `L / sqrt(k) + 1`.
pub fn rician_envelope(rayleigh: f64) -> f64 {
    rayleigh / RICIAN_K_FACTOR.sqrt() + 1.0
}

/// Bit error probability for a given signal-to-noise ratio.
///
/// # Formula
///
/// ```text
/// snr   = 10^(SNR_dB / 10)
/// Eb/N0 = snr / ln(1 + snr)
/// x     = sqrt(2 × Eb/N0)
/// BER   = exp(-x² / 2) / (1.64 × x + sqrt(0.76 × x² + 4))
/// ```
///
/// # Parameters
///
/// - `snr_db`: signal to noise (plus interference) ratio in dB
///
/// # Returns
///
/// Probability in `[0, 0.5]` that a single bit is received in error.
///
/// # Notes
///
/// The spectral efficiency term tends to `snr` as `snr → 0`, so a vanishing
/// SNR yields `Eb/N0 = 1` rather than a division by zero.
pub fn awgn_bit_error_rate(snr_db: f64) -> f64 {
    let snr = 10f64.powf(snr_db / 10.0);
    let ebno = if snr > 0.0 { snr / snr.ln_1p() } else { 1.0 };
    let x2 = 2.0 * ebno;
    let x = x2.sqrt();
    (-x2 / 2.0).exp() / (1.64 * x + (0.76 * x2 + 4.0).sqrt())
}

/// Convert power from dBm (decibels relative to 1 milliwatt) to milliwatts.
///
/// # Formula
///
/// ```text
/// P(mW) = 10^(P(dBm) / 10)
/// ```
///
/// # Examples
///
/// ```text
/// 0 dBm   → 1 mW
/// -10 dBm → 0.1 mW
/// ```
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm.
///
/// This is the inverse of [`dbm_to_mw`]. For `mw <= 0` the result is `-∞`
/// or NaN; callers only pass sums of converted dBm values.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}
