//! Geometry helpers for position-dependent arbitrators.
//!
//! Contains:
//! - 3-D node position with the obstacle density around it
//! - Distance calculations (squared distance to avoid sqrt in range checks)

use serde::Deserialize;

/// Position of a node in meters, plus obstacle density `rho` (obstacles per m²).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub rho: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z, rho: 0.0 }
    }

    pub fn with_density(x: f64, y: f64, z: f64, rho: f64) -> Self {
        Position { x, y, z, rho }
    }
}

/// Squared Euclidean distance in meters².
///
/// Range checks compare d² against r² directly, without the square root.
///
/// # Parameters
///
/// * `a` - First position
/// * `b` - Second position
///
/// # Returns
///
/// The squared distance (dx² + dy² + dz²).
pub fn distance2(a: &Position, b: &Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

pub fn distance(a: &Position, b: &Position) -> f64 {
    distance2(a, b).sqrt()
}

/// Obstacle density governing the link between two positions.
pub fn link_density(a: &Position, b: &Position) -> f64 {
    a.rho.max(b.rho)
}
