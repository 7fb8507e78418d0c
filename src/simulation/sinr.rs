//! SINR calculators.
//!
//! A calculator turns the signal of interest, the ambient noise and the set of
//! overlapping arrivals at a transducer into a signal-to-interference-plus-noise
//! ratio in dB. All sums happen in linear power. The signal of interest is always
//! one of the arrivals. The band-based calculators skip it by arrival id; the
//! FH-FSK calculator subtracts its effective power from the windowed sum.
//!
//! Contains:
//! - `DefaultSinr`: every other arrival interferes
//! - `FrequencyAwareSinr`: only arrivals whose bands overlap interfere
//! - `FhFskSinr`: frequency-hopping FSK with symbol-timing-aware tap windows

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::error::Result;
use super::pdp::Pdp;
use super::signal_calculations::{db_to_linear, linear_to_db};
use super::transducer::PacketArrival;
use super::tx_mode::{ModeRegistry, ModulationType, TxMode};
use super::types::{ArrivalId, Packet, SimTime};

/// The signal whose SINR is being computed.
#[derive(Debug, Clone, Copy)]
pub struct SinrTarget<'a> {
    pub arrival: ArrivalId,
    pub packet: &'a Packet,
    pub arrival_time: SimTime,
    pub rx_power_db: f64,
    pub mode: &'a TxMode,
    pub pdp: &'a Pdp,
}

impl<'a> SinrTarget<'a> {
    pub fn from_arrival(arrival: &'a PacketArrival, mode: &'a TxMode) -> Self {
        SinrTarget {
            arrival: arrival.id,
            packet: &arrival.packet,
            arrival_time: arrival.arrival_time,
            rx_power_db: arrival.rx_power_db,
            mode,
            pdp: &arrival.pdp,
        }
    }
}

/// Pluggable SINR strategy.
pub trait SinrCalculator {
    /// SINR in dB of `target` against `arrivals` plus `ambient_noise_db`.
    ///
    /// # Parameters
    ///
    /// * `target` - Signal of interest; its own arrival is skipped in `arrivals`
    /// * `ambient_noise_db` - Noise power already integrated over the target's bandwidth
    /// * `arrivals` - Every arrival currently live at the transducer
    /// * `modes` - Registry used to resolve interferer modes
    fn calc_sinr_db(&self, target: &SinrTarget<'_>, ambient_noise_db: f64, arrivals: &[PacketArrival], modes: &ModeRegistry) -> Result<f64>;
}

fn interferers<'a>(target: &SinrTarget<'_>, arrivals: &'a [PacketArrival]) -> impl Iterator<Item = &'a PacketArrival> {
    let id = target.arrival;
    arrivals.iter().filter(move |a| a.id != id)
}

/// Treats every other arrival as interference regardless of frequency.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSinr;

impl SinrCalculator for DefaultSinr {
    fn calc_sinr_db(&self, target: &SinrTarget<'_>, ambient_noise_db: f64, arrivals: &[PacketArrival], _modes: &ModeRegistry) -> Result<f64> {
        if target.mode.modulation() == ModulationType::Other {
            warn!("Calculating SINR for unsupported modulation type");
        }
        let interference: f64 = interferers(target, arrivals).map(|a| db_to_linear(a.rx_power_db)).sum();
        let total_db = linear_to_db(interference + db_to_linear(ambient_noise_db));
        debug!(
            "SINR: rx {:.2} dB, {} arrivals, interference+noise {:.2} dB, SINR {:.2} dB",
            target.rx_power_db,
            arrivals.len(),
            total_db,
            target.rx_power_db - total_db
        );
        Ok(target.rx_power_db - total_db)
    }
}

/// Only arrivals whose occupied band overlaps the target's band interfere.
///
/// Two bands overlap when `|fc_i − fc| < bw_i/2 + bw/2 − 0.5`, halving each
/// bandwidth with integer division.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyAwareSinr;

pub(crate) fn bands_overlap(a: &TxMode, b: &TxMode) -> bool {
    let separation = (a.center_freq_hz() as f64 - b.center_freq_hz() as f64).abs();
    separation < (a.bandwidth_hz() / 2 + b.bandwidth_hz() / 2) as f64 - 0.5
}

impl SinrCalculator for FrequencyAwareSinr {
    fn calc_sinr_db(&self, target: &SinrTarget<'_>, ambient_noise_db: f64, arrivals: &[PacketArrival], modes: &ModeRegistry) -> Result<f64> {
        if target.mode.modulation() == ModulationType::Other {
            warn!("Calculating SINR for unsupported modulation type");
        }
        let mut interference = 0.0;
        for arrival in interferers(target, arrivals) {
            let mode = modes.get(arrival.mode)?;
            if bands_overlap(mode, target.mode) {
                interference += db_to_linear(arrival.rx_power_db);
            }
        }
        let total_db = linear_to_db(interference + db_to_linear(ambient_noise_db));
        Ok(target.rx_power_db - total_db)
    }
}

pub const DEFAULT_HOPS: u32 = 13;

/// Frequency-hopping FSK receiver.
///
/// A symbol lasts `ts = 1/phy_rate`; after each symbol the hop pattern keeps the
/// same tone unused for `(hops − 1) × ts`, so an interferer only hurts when its
/// energy lands in the target's symbol windows. Each arrival's tap energy is
/// summed over those windows from its power delay profile. The inter-symbol
/// term multiplies the target's power in dB by its tap energy one hop period
/// after the strongest tap, so an impulse profile still contributes `rx_db`.
#[derive(Debug, Clone, Copy)]
pub struct FhFskSinr {
    pub hops: u32,
}

impl Default for FhFskSinr {
    fn default() -> Self {
        FhFskSinr { hops: DEFAULT_HOPS }
    }
}

impl SinrCalculator for FhFskSinr {
    fn calc_sinr_db(&self, target: &SinrTarget<'_>, ambient_noise_db: f64, arrivals: &[PacketArrival], _modes: &ModeRegistry) -> Result<f64> {
        if target.mode.modulation() != ModulationType::Fsk {
            warn!("Calculating SINR for unsupported mode type");
        }
        let ts = target.mode.symbol_time_secs();
        let clearing = self.hops.saturating_sub(1) as f64 * ts;
        let period = ts + clearing;

        let captured = target.pdp.sum_taps_from_max_nc(0.0, ts);
        let effective_rx_db = target.rx_power_db + linear_to_db(captured);

        // Leakage into the next use of the same tone, scaled by the dB power.
        let isi = target.rx_power_db * target.pdp.sum_taps_from_max_nc(period, ts);

        let max_tap_delay = target.pdp.max_tap().map_or(0.0, |(_, delay)| delay);
        let anchor = target.arrival_time.as_secs_f64() + max_tap_delay;

        // The target itself is in `arrivals`; its windowed energy is netted
        // against the effective power instead of being skipped by id.
        let mut interference = -db_to_linear(effective_rx_db);
        for arrival in arrivals {
            let power = windowed_tap_power(&arrival.pdp, anchor, arrival.arrival_time.as_secs_f64(), ts, clearing);
            interference += db_to_linear(arrival.rx_power_db) * power;
        }

        let total_db = linear_to_db(isi + interference + db_to_linear(ambient_noise_db));
        debug!(
            "FH-FSK SINR: effective rx {:.2} dB, ISI {:.3e}, interference {:.3e}, SINR {:.2} dB",
            effective_rx_db,
            isi,
            interference,
            effective_rx_db - total_db
        );
        Ok(effective_rx_db - total_db)
    }
}

/// Tap energy of an arrival at `other_time` that lands in the two symbol
/// windows of a signal anchored at `anchor`.
fn windowed_tap_power(pdp: &Pdp, anchor: f64, other_time: f64, ts: f64, clearing: f64) -> f64 {
    let period = ts + clearing;
    let mut t_delta = (anchor - other_time).abs();
    let symbols = (t_delta / period) as u32;
    t_delta -= symbols as f64 * period;
    if anchor > other_time {
        t_delta = period - t_delta;
    }

    if t_delta < ts {
        pdp.sum_taps_nc(0.0, ts - t_delta) + pdp.sum_taps_nc(ts - t_delta + clearing, 2.0 * ts - t_delta + clearing)
    } else {
        let first = period - t_delta;
        let second = first + period;
        pdp.sum_taps_nc(first, first + ts) + pdp.sum_taps_nc(second, second + ts)
    }
}

/// SINR model selection as written in scene files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinrModelConfig {
    #[default]
    Default,
    FrequencyAware,
    FhFsk {
        #[serde(default = "default_hops")]
        hops: u32,
    },
}

fn default_hops() -> u32 {
    DEFAULT_HOPS
}

impl SinrModelConfig {
    pub fn build(&self) -> Box<dyn SinrCalculator> {
        match *self {
            SinrModelConfig::Default => Box::new(DefaultSinr),
            SinrModelConfig::FrequencyAware => Box::new(FrequencyAwareSinr),
            SinrModelConfig::FhFsk { hops } => Box::new(FhFskSinr { hops }),
        }
    }
}
