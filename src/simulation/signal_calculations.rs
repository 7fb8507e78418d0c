//! Power conversions shared by the SINR, CCA and noise calculations.
//!
//! Contains helpers for:
//! - dB ↔ linear power conversion
//! - Aggregate power of a set of overlapping arrivals
//! - Integrating a noise spectral density over a mode's bandwidth
//!
//! Units:
//! - Power: dB relative to an arbitrary reference (the models only ever compare
//!   or sum powers, so the reference cancels out)
//! - Noise density: dB/Hz

/// Convert a power ratio from dB to linear scale.
///
/// # Formula
///
/// ```text
/// P(lin) = 10^(P(dB) / 10)
/// ```
///
/// # Examples
///
/// ```text
/// 0 dB   → 1
/// 10 dB  → 10
/// 20 dB  → 100
/// -10 dB → 0.1
/// ```
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear power ratio to dB.
///
/// # Formula
///
/// ```text
/// P(dB) = 10 × log₁₀(P(lin))
/// ```
///
/// # Notes
///
/// - This is the inverse operation of `db_to_linear()`
/// - `linear_to_db(0.0)` is `-∞`, which compares correctly against thresholds
pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Sum powers given in dB, returning the total in dB.
///
/// An empty input sums to `-∞` dB (zero linear power).
pub fn sum_powers_db<I>(powers_db: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    linear_to_db(powers_db.into_iter().map(db_to_linear).sum())
}

/// Ambient noise power seen by a receiver tuned to `bandwidth_hz`.
///
/// # Formula
///
/// ```text
/// N(dB) = N₀(dB/Hz) + 10 × log₁₀(B)
/// ```
///
/// # Parameters
///
/// - `noise_db_hz`: Noise spectral density at the carrier frequency
/// - `bandwidth_hz`: Receiver bandwidth
pub fn integrate_noise_db(noise_db_hz: f64, bandwidth_hz: u32) -> f64 {
    noise_db_hz + linear_to_db(bandwidth_hz as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_linear_conversion_roundtrip() {
        for v in [-100.0, -50.0, 0.0, 10.0, 190.0] {
            let lin = db_to_linear(v);
            let v2 = linear_to_db(lin);
            assert!((v - v2).abs() < 1e-9);
        }
        assert_eq!(db_to_linear(0.0), 1.0);
        assert_eq!(db_to_linear(20.0), 100.0);
    }

    #[test]
    fn equal_powers_sum_to_three_db_more() {
        let total = sum_powers_db([10.0, 10.0]);
        assert!((total - (10.0 + linear_to_db(2.0))).abs() < 1e-9);
        assert_eq!(sum_powers_db(std::iter::empty()), f64::NEG_INFINITY);
    }

    #[test]
    fn noise_integrates_over_bandwidth() {
        assert!((integrate_noise_db(40.0, 1000) - 70.0).abs() < 1e-9);
    }
}
