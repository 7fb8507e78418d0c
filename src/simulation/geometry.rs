//! Node positions and distance calculations.
//!
//! Contains helper functions for:
//! - Euclidean distance between two positions in world units
//! - Squared distance for comparisons that do not need the square root

use serde::{Deserialize, Serialize};

/// Position of a node in world units (meters for the underwater models).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Position { x, y, z }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Position) -> f64 {
        distance2(self, other).sqrt()
    }
}

/// Squared Euclidean distance (avoids a sqrt when only comparing distances).
///
/// # Parameters
///
/// * `a` - First position
/// * `b` - Second position
///
/// # Returns
///
/// `dx² + dy² + dz²`
pub fn distance2(a: &Position, b: &Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}
