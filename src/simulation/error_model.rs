//! Packet error rate models.
//!
//! Contains:
//! - `PacketErrorModel` trait mapping a (minimum) SINR to a packet error rate
//! - `ThresholdPer`: hard decision at a configurable SINR
//! - `UmodemPer`: convolutionally coded FH-FSK modem with a union bound over
//!   the code's distance spectrum

use serde::{Deserialize, Serialize};

use super::signal_calculations::db_to_linear;
use super::tx_mode::TxMode;
use super::types::Packet;

/// Pluggable PER strategy.
pub trait PacketErrorModel {
    /// Probability in `[0, 1]` that `packet` is lost when received at `sinr_db`.
    fn calc_per(&self, packet: &Packet, sinr_db: f64, mode: &TxMode) -> f64;
}

pub const DEFAULT_PER_THRESHOLD_DB: f64 = 8.0;

/// Zero error at or above the threshold, certain loss below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPer {
    pub threshold_db: f64,
}

impl Default for ThresholdPer {
    fn default() -> Self {
        ThresholdPer { threshold_db: DEFAULT_PER_THRESHOLD_DB }
    }
}

impl PacketErrorModel for ThresholdPer {
    fn calc_per(&self, _packet: &Packet, sinr_db: f64, _mode: &TxMode) -> f64 {
        if sinr_db >= self.threshold_db { 0.0 } else { 1.0 }
    }
}

/// Free distances of the rate-1/2 code.
const FREE_DISTANCES: [u32; 9] = [12, 14, 16, 18, 20, 22, 24, 26, 28];
/// Information weights per free distance.
const DISTANCE_WEIGHTS: [f64; 9] = [33.0, 281.0, 2179.0, 15035.0, 105166.0, 692330.0, 4580007.0, 29692894.0, 190453145.0];

/// WHOI micro-modem style PER.
///
/// # Formula
///
/// ```text
/// p      = 1 / (2 + 10^(SINR/10))              // FSK symbol error, non-coherent
/// P(d)   = p^d × Σ_{k<d} C(d−1+k, k) (1−p)^k  // pairwise error at distance d
/// Pb     = Σ_{r<8} B(r) P(d_r)                 // union bound on bit error
/// PER    = 1 − (1−Pb)^n − 288 Pb (1−Pb)^(n−1)  // n = packet bits
/// ```
///
/// SINR at or above 10 dB is error free, at or below 6 dB always fails.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UmodemPer;

/// Binomial coefficient evaluated the way the modem model expects it:
/// multiply down from `n` to `max(k, n−k)+1`, then divide by `2..=min(k, n−k)`.
pub(crate) fn n_choose_k(n: u32, k: u32) -> f64 {
    let rest = n.saturating_sub(k);
    let mut result = 1.0;
    for i in (k.max(rest) + 1)..=n {
        result *= i as f64;
    }
    for i in 2..=k.min(rest) {
        result /= i as f64;
    }
    result
}

impl UmodemPer {
    /// Bit error probability after decoding at `sinr_db`.
    pub fn bit_error_probability(sinr_db: f64) -> f64 {
        let perror = 1.0 / (2.0 + db_to_linear(sinr_db));
        let pairwise = FREE_DISTANCES.map(|d| {
            let sum: f64 = (0..d).map(|k| n_choose_k(d - 1 + k, k) * (1.0 - perror).powi(k as i32)).sum();
            perror.powi(d as i32) * sum
        });
        DISTANCE_WEIGHTS.iter().zip(pairwise.iter()).take(8).map(|(b, p)| b * p).sum()
    }
}

impl PacketErrorModel for UmodemPer {
    fn calc_per(&self, packet: &Packet, sinr_db: f64, _mode: &TxMode) -> f64 {
        if sinr_db >= 10.0 {
            return 0.0;
        }
        if sinr_db <= 6.0 {
            return 1.0;
        }
        let pb = Self::bit_error_probability(sinr_db);
        let bits = (packet.size() * 8) as f64;
        let per = 1.0 - n_choose_k(bits as u32, 0) * (1.0 - pb).powf(bits) - n_choose_k(288, 1) * pb * (1.0 - pb).powf(bits - 1.0);
        per.clamp(0.0, 1.0)
    }
}

/// PER model selection as written in scene files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PerModelConfig {
    Threshold {
        #[serde(default = "default_threshold")]
        threshold_db: f64,
    },
    Umodem,
}

fn default_threshold() -> f64 {
    DEFAULT_PER_THRESHOLD_DB
}

impl Default for PerModelConfig {
    fn default() -> Self {
        PerModelConfig::Threshold { threshold_db: DEFAULT_PER_THRESHOLD_DB }
    }
}

impl PerModelConfig {
    pub fn build(&self) -> Box<dyn PacketErrorModel> {
        match *self {
            PerModelConfig::Threshold { threshold_db } => Box::new(ThresholdPer { threshold_db }),
            PerModelConfig::Umodem => Box::new(UmodemPer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::tx_mode::{ModeRegistry, ModulationType};

    fn fsk() -> TxMode {
        let mut reg = ModeRegistry::new();
        let id = reg.create_mode(ModulationType::Fsk, 80, 80, 22_000, 4_000, 13, "FSK");
        reg.get(id).unwrap().clone()
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let per = ThresholdPer::default();
        let packet = Packet::new(1, 10);
        let mode = fsk();
        assert_eq!(per.calc_per(&packet, 8.0, &mode), 0.0);
        assert_eq!(per.calc_per(&packet, 7.999, &mode), 1.0);
        assert_eq!(per.calc_per(&packet, 30.0, &mode), 0.0);
    }

    #[test]
    fn binomial_matches_known_values() {
        assert_eq!(n_choose_k(5, 2), 10.0);
        assert_eq!(n_choose_k(288, 1), 288.0);
        assert_eq!(n_choose_k(104, 0), 1.0);
        assert_eq!(n_choose_k(22, 11), 705432.0);
    }

    #[test]
    fn umodem_saturates_outside_transition_band() {
        let packet = Packet::new(1, 32);
        let mode = fsk();
        assert_eq!(UmodemPer.calc_per(&packet, 10.0, &mode), 0.0);
        assert_eq!(UmodemPer.calc_per(&packet, 25.0, &mode), 0.0);
        assert_eq!(UmodemPer.calc_per(&packet, 6.0, &mode), 1.0);
        assert_eq!(UmodemPer.calc_per(&packet, -3.0, &mode), 1.0);
    }

    #[test]
    fn umodem_stays_in_unit_interval_and_worsens_with_lower_sinr() {
        let packet = Packet::new(1, 1000);
        let mode = fsk();
        for tenth in 61..100 {
            let per = UmodemPer.calc_per(&packet, tenth as f64 / 10.0, &mode);
            assert!((0.0..=1.0).contains(&per), "PER {} at {} dB", per, tenth as f64 / 10.0);
        }
        assert!(UmodemPer::bit_error_probability(6.5) > UmodemPer::bit_error_probability(9.5));
        assert!(UmodemPer.calc_per(&packet, 6.5, &mode) > UmodemPer.calc_per(&packet, 9.9, &mode));
    }

    #[test]
    fn config_defaults_to_threshold_eight() {
        assert_eq!(PerModelConfig::default(), PerModelConfig::Threshold { threshold_db: 8.0 });
        let cfg: PerModelConfig = serde_json::from_str(r#"{"type": "umodem"}"#).unwrap();
        assert_eq!(cfg, PerModelConfig::Umodem);
    }
}
