//! Propagation models: path loss, delay and multipath profile between two positions.
//!
//! Contains:
//! - `PropagationModel` trait used by the channel when fanning out a transmission
//! - `IdealPropagation`: no loss, delay from the propagation speed, impulse profile
//! - `ThorpPropagation`: spherical/practical spreading plus Thorp absorption
//! - `PropagationConfig`: serde-tagged scene representation of the above

use serde::{Deserialize, Serialize};

use super::geometry::Position;
use super::pdp::Pdp;
use super::signal_calculations::linear_to_db;
use super::tx_mode::TxMode;
use super::types::SimTime;

/// Speed of sound in sea water, world units per second.
pub const DEFAULT_PROPAGATION_SPEED: f64 = 1500.0;

/// Practical spreading coefficient between cylindrical (1) and spherical (2).
pub const DEFAULT_SPREAD_COEFFICIENT: f64 = 1.5;

/// Pure function of two positions and a mode.
pub trait PropagationModel {
    /// Path loss in dB from `a` to `b`.
    fn path_loss_db(&self, a: &Position, b: &Position, mode: &TxMode) -> f64;

    /// Propagation delay from `a` to `b`.
    fn delay(&self, a: &Position, b: &Position, mode: &TxMode) -> SimTime;

    /// Multipath profile seen at `b` for a transmission from `a`.
    fn pdp(&self, a: &Position, b: &Position, mode: &TxMode) -> Pdp;
}

fn delay_at_speed(a: &Position, b: &Position, speed: f64) -> SimTime {
    SimTime::from_secs_f64(a.distance_to(b) / speed)
}

/// Lossless medium with a single path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdealPropagation {
    pub propagation_speed: f64,
}

impl Default for IdealPropagation {
    fn default() -> Self {
        IdealPropagation { propagation_speed: DEFAULT_PROPAGATION_SPEED }
    }
}

impl PropagationModel for IdealPropagation {
    fn path_loss_db(&self, _a: &Position, _b: &Position, _mode: &TxMode) -> f64 {
        0.0
    }

    fn delay(&self, a: &Position, b: &Position, _mode: &TxMode) -> SimTime {
        delay_at_speed(a, b, self.propagation_speed)
    }

    fn pdp(&self, _a: &Position, _b: &Position, _mode: &TxMode) -> Pdp {
        Pdp::impulse()
    }
}

/// Thorp absorption plus geometric spreading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThorpPropagation {
    pub spread_coefficient: f64,
    pub propagation_speed: f64,
}

impl Default for ThorpPropagation {
    fn default() -> Self {
        ThorpPropagation { spread_coefficient: DEFAULT_SPREAD_COEFFICIENT, propagation_speed: DEFAULT_PROPAGATION_SPEED }
    }
}

/// Thorp absorption coefficient in dB per kilometer.
///
/// # Formula
///
/// ```text
/// f ≥ 0.4 kHz: α = 0.11 f²/(1+f²) + 44 f²/(4100+f²) + 2.75·10⁻⁴ f² + 0.003
/// f < 0.4 kHz: α = 0.002 + 0.11 f/(1+f) + 0.011 f
/// ```
///
/// # Parameters
///
/// - `freq_khz`: Carrier frequency in kHz
pub fn thorp_attenuation_db_km(freq_khz: f64) -> f64 {
    let f = freq_khz;
    let fsq = f * f;
    if f >= 0.4 {
        0.11 * fsq / (1.0 + fsq) + 44.0 * fsq / (4100.0 + fsq) + 2.75e-4 * fsq + 0.003
    } else {
        0.002 + 0.11 * (f / (1.0 + f)) + 0.011 * f
    }
}

/// Thorp absorption coefficient in dB per kiloyard.
pub fn thorp_attenuation_db_kyd(freq_khz: f64) -> f64 {
    thorp_attenuation_db_km(freq_khz) / 1.093613298
}

impl PropagationModel for ThorpPropagation {
    fn path_loss_db(&self, a: &Position, b: &Position, mode: &TxMode) -> f64 {
        let distance = a.distance_to(b);
        let atten = thorp_attenuation_db_km(mode.center_freq_hz() as f64 / 1000.0);
        // log10(0) would be -inf; co-located nodes see no spreading loss
        let spreading = if distance > 0.0 { self.spread_coefficient * linear_to_db(distance) } else { 0.0 };
        spreading + (distance / 1000.0) * atten
    }

    fn delay(&self, a: &Position, b: &Position, _mode: &TxMode) -> SimTime {
        delay_at_speed(a, b, self.propagation_speed)
    }

    fn pdp(&self, _a: &Position, _b: &Position, _mode: &TxMode) -> Pdp {
        Pdp::impulse()
    }
}

fn default_propagation_speed() -> f64 {
    DEFAULT_PROPAGATION_SPEED
}

fn default_spread_coefficient() -> f64 {
    DEFAULT_SPREAD_COEFFICIENT
}

/// Propagation model selection as written in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropagationConfig {
    Ideal {
        #[serde(default = "default_propagation_speed")]
        propagation_speed: f64,
    },
    Thorp {
        #[serde(default = "default_spread_coefficient")]
        spread_coefficient: f64,
        #[serde(default = "default_propagation_speed")]
        propagation_speed: f64,
    },
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig::Ideal { propagation_speed: DEFAULT_PROPAGATION_SPEED }
    }
}

impl PropagationConfig {
    pub fn build(&self) -> Box<dyn PropagationModel> {
        match *self {
            PropagationConfig::Ideal { propagation_speed } => Box::new(IdealPropagation { propagation_speed }),
            PropagationConfig::Thorp { spread_coefficient, propagation_speed } => {
                Box::new(ThorpPropagation { spread_coefficient, propagation_speed })
            }
        }
    }
}
