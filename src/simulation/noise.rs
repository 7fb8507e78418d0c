//! Ambient noise models.
//!
//! Contains:
//! - `NoiseModel` trait returning a noise spectral density in dB/Hz
//! - `WenzNoise`: empirical ocean noise (turbulence, shipping, wind, thermal)
//! - `ConstantNoise`: flat density, handy for controlled experiments

use serde::{Deserialize, Serialize};

use super::signal_calculations::{db_to_linear, linear_to_db};

/// Spectral density of the ambient noise at a frequency.
pub trait NoiseModel {
    /// Noise density in dB/Hz at `freq_khz`.
    fn noise_db_hz(&self, freq_khz: f64) -> f64;
}

pub const DEFAULT_WIND_SPEED: f64 = 1.0;
pub const DEFAULT_SHIPPING: f64 = 0.0;

/// Wenz curves as summarised by Stojanovic.
///
/// # Formula
///
/// ```text
/// turbulence = 17 − 30 log f
/// shipping   = 40 + 20 (s − 0.5) + 26 log f − 60 log (f + 0.03)
/// wind       = 50 + 7.5 √w + 20 log f − 40 log (f + 0.4)
/// thermal    = −15 + 20 log f
/// N(f)       = 10 log Σ 10^(component/10)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WenzNoise {
    /// Wind speed in m/s.
    pub wind_speed: f64,
    /// Shipping activity between 0 (none) and 1 (heavy).
    pub shipping: f64,
}

impl Default for WenzNoise {
    fn default() -> Self {
        WenzNoise { wind_speed: DEFAULT_WIND_SPEED, shipping: DEFAULT_SHIPPING }
    }
}

impl NoiseModel for WenzNoise {
    fn noise_db_hz(&self, freq_khz: f64) -> f64 {
        let log_f = freq_khz.log10();
        let turbulence = 17.0 - 30.0 * log_f;
        let shipping = 40.0 + 20.0 * (self.shipping - 0.5) + 26.0 * log_f - 60.0 * (freq_khz + 0.03).log10();
        let wind = 50.0 + 7.5 * self.wind_speed.sqrt() + 20.0 * log_f - 40.0 * (freq_khz + 0.4).log10();
        let thermal = -15.0 + 20.0 * log_f;
        linear_to_db(db_to_linear(turbulence) + db_to_linear(shipping) + db_to_linear(wind) + db_to_linear(thermal))
    }
}

/// Frequency-independent noise density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantNoise {
    pub db_hz: f64,
}

impl NoiseModel for ConstantNoise {
    fn noise_db_hz(&self, _freq_khz: f64) -> f64 {
        self.db_hz
    }
}

fn default_wind_speed() -> f64 {
    DEFAULT_WIND_SPEED
}

fn default_shipping() -> f64 {
    DEFAULT_SHIPPING
}

/// Noise model selection as written in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NoiseConfig {
    Wenz {
        #[serde(default = "default_wind_speed")]
        wind_speed: f64,
        #[serde(default = "default_shipping")]
        shipping: f64,
    },
    Constant {
        db_hz: f64,
    },
}

impl Default for NoiseConfig {
    fn default() -> Self {
        NoiseConfig::Wenz { wind_speed: DEFAULT_WIND_SPEED, shipping: DEFAULT_SHIPPING }
    }
}

impl NoiseConfig {
    pub fn build(&self) -> Box<dyn NoiseModel> {
        match *self {
            NoiseConfig::Wenz { wind_speed, shipping } => Box::new(WenzNoise { wind_speed, shipping }),
            NoiseConfig::Constant { db_hz } => Box::new(ConstantNoise { db_hz }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wenz_is_finite_and_falls_with_frequency_above_wind_band() {
        let model = WenzNoise::default();
        for f in [0.1, 1.0, 10.0, 22.0, 100.0] {
            assert!(model.noise_db_hz(f).is_finite(), "noise at {} kHz", f);
        }
        assert!(model.noise_db_hz(10.0) > model.noise_db_hz(50.0));
    }

    #[test]
    fn wenz_sums_components_in_linear_power() {
        let model = WenzNoise { wind_speed: 4.0, shipping: 0.5 };
        let f: f64 = 1.0;
        // log10(1) = 0
        let turbulence = 17.0;
        let shipping = 40.0 - 60.0 * 1.03f64.log10();
        let wind = 50.0 + 15.0 - 40.0 * 1.4f64.log10();
        let thermal = -15.0;
        let expected = linear_to_db([turbulence, shipping, wind, thermal].iter().map(|d| db_to_linear(*d)).sum());
        assert!((model.noise_db_hz(f) - expected).abs() < 1e-9);
    }

    #[test]
    fn more_wind_means_more_noise() {
        let calm = WenzNoise { wind_speed: 0.0, shipping: 0.0 };
        let windy = WenzNoise { wind_speed: 20.0, shipping: 0.0 };
        assert!(windy.noise_db_hz(5.0) > calm.noise_db_hz(5.0));
    }

    #[test]
    fn config_defaults_to_wenz() {
        let cfg: NoiseConfig = serde_json::from_str(r#"{"type": "wenz"}"#).unwrap();
        assert_eq!(cfg, NoiseConfig::default());
        let cfg: NoiseConfig = serde_json::from_str(r#"{"type": "constant", "db_hz": -130.0}"#).unwrap();
        assert_eq!(cfg.build().noise_db_hz(22.0), -130.0);
    }
}
