//! Power delay profile: a tapped delay line describing multipath arrivals.
//!
//! Taps are kept sorted by non-decreasing delay. A profile with zero resolution
//! is an impulse: exactly one tap at delay 0, and every window sum collapses
//! onto that tap.

use num_complex::Complex64;

use super::error::{MediumError, Result};

/// One multipath component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tap {
    /// Delay relative to the first arrival, in seconds.
    pub delay: f64,
    pub amplitude: Complex64,
}

/// Tapped delay line with uniform tap spacing.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdp {
    taps: Vec<Tap>,
    resolution: f64,
}

impl Default for Pdp {
    fn default() -> Self {
        Pdp::impulse()
    }
}

impl Pdp {
    /// Single tap of amplitude 1 at delay 0, zero resolution.
    pub fn impulse() -> Self {
        Pdp { taps: vec![Tap { delay: 0.0, amplitude: Complex64::new(1.0, 0.0) }], resolution: 0.0 }
    }

    /// Profile with tap `i` at delay `i × resolution`.
    ///
    /// # Parameters
    ///
    /// * `amplitudes` - Complex tap amplitudes in delay order
    /// * `resolution` - Tap spacing in seconds; zero requires exactly one amplitude
    pub fn from_amplitudes(amplitudes: Vec<Complex64>, resolution: f64) -> Result<Self> {
        if resolution == 0.0 && amplitudes.len() != 1 {
            return Err(MediumError::InvalidImpulseProfile(amplitudes.len()));
        }
        let taps = amplitudes
            .into_iter()
            .enumerate()
            .map(|(i, amplitude)| Tap { delay: i as f64 * resolution, amplitude })
            .collect();
        Ok(Pdp { taps, resolution })
    }

    /// Real-valued convenience over [`Pdp::from_amplitudes`].
    pub fn from_real_amplitudes(amplitudes: &[f64], resolution: f64) -> Result<Self> {
        Self::from_amplitudes(amplitudes.iter().map(|a| Complex64::new(*a, 0.0)).collect(), resolution)
    }

    /// Set the amplitude of tap `index`, growing the profile with zero taps as needed.
    pub fn set_tap(&mut self, amplitude: Complex64, index: usize) -> Result<()> {
        if self.resolution == 0.0 && index != 0 {
            return Err(MediumError::InvalidImpulseProfile(index + 1));
        }
        while self.taps.len() <= index {
            let delay = self.taps.len() as f64 * self.resolution;
            self.taps.push(Tap { delay, amplitude: Complex64::new(0.0, 0.0) });
        }
        self.taps[index].amplitude = amplitude;
        Ok(())
    }

    pub fn tap(&self, index: usize) -> Result<&Tap> {
        self.taps.get(index).ok_or(MediumError::TapOutOfRange { index, len: self.taps.len() })
    }

    pub fn taps(&self) -> &[Tap] {
        &self.taps
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Index and delay of the strongest tap. Ties keep the earliest one.
    pub fn max_tap(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for (i, tap) in self.taps.iter().enumerate() {
            let magnitude = tap.amplitude.norm();
            if best.map_or(true, |(_, _, m)| magnitude > m) {
                best = Some((i, tap.delay, magnitude));
            }
        }
        best.map(|(i, delay, _)| (i, delay))
    }

    fn window_from_max(&self, delay: f64, duration: f64) -> std::ops::Range<usize> {
        let max_index = self.max_tap().map_or(0, |(i, _)| i);
        let start = max_index + (delay / self.resolution) as usize;
        let count = (duration / self.resolution + 0.5) as usize;
        let end = start.saturating_add(count).min(self.taps.len());
        start.min(end)..end
    }

    fn window(&self, begin: f64, end: f64) -> std::ops::Range<usize> {
        let start = (begin / self.resolution + 0.5) as usize;
        let stop = ((end / self.resolution + 0.5) as usize).min(self.taps.len());
        start.min(stop)..stop
    }

    fn impulse_tap(&self) -> Complex64 {
        self.taps.first().map_or(Complex64::new(0.0, 0.0), |t| t.amplitude)
    }

    /// Non-coherent sum of `|amplitude|` over `duration` worth of taps, starting
    /// `delay` after the strongest tap.
    pub fn sum_taps_from_max_nc(&self, delay: f64, duration: f64) -> f64 {
        if self.resolution == 0.0 {
            return self.impulse_tap().norm();
        }
        self.taps[self.window_from_max(delay, duration)].iter().map(|t| t.amplitude.norm()).sum()
    }

    /// Coherent counterpart of [`Pdp::sum_taps_from_max_nc`].
    pub fn sum_taps_from_max_c(&self, delay: f64, duration: f64) -> Complex64 {
        if self.resolution == 0.0 {
            return self.impulse_tap();
        }
        self.taps[self.window_from_max(delay, duration)].iter().map(|t| t.amplitude).sum()
    }

    /// Non-coherent sum of `|amplitude|` over the taps falling in `[begin, end]` seconds.
    pub fn sum_taps_nc(&self, begin: f64, end: f64) -> f64 {
        if self.resolution == 0.0 {
            return if begin <= 0.0 && end >= 0.0 { self.impulse_tap().norm() } else { 0.0 };
        }
        self.taps[self.window(begin, end)].iter().map(|t| t.amplitude.norm()).sum()
    }

    /// Coherent counterpart of [`Pdp::sum_taps_nc`].
    pub fn sum_taps_c(&self, begin: f64, end: f64) -> Complex64 {
        if self.resolution == 0.0 {
            return if begin <= 0.0 && end >= 0.0 { self.impulse_tap() } else { Complex64::new(0.0, 0.0) };
        }
        self.taps[self.window(begin, end)].iter().map(|t| t.amplitude).sum()
    }
}
