//! Transmission modes and the registry that owns them.
//!
//! A mode describes how a frame is put on the air: modulation kind, bit and
//! symbol rates, carrier frequency and bandwidth. Modes are registered once per
//! network and referenced everywhere else by `ModeId`.

use log::warn;
use serde::{Deserialize, Serialize};

use super::error::{MediumError, Result};
use super::types::SimTime;

/// Modulation family of a transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationType {
    Psk,
    Qam,
    Fsk,
    Lora,
    Other,
}

/// Registry key of a transmission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModeId(pub u32);

/// Parameters of a transmission mode, as written in scene files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSpec {
    /// Unique mode name; registering an existing name redefines it.
    pub name: String,
    pub modulation: ModulationType,
    /// Payload bit rate in bits per second. Airtime is derived from it.
    pub data_rate_bps: u32,
    /// Symbol rate in symbols per second.
    pub phy_rate_sps: u32,
    pub center_freq_hz: u32,
    pub bandwidth_hz: u32,
    /// Constellation size (number of tones for FSK).
    pub constellation_size: u32,
}

/// A registered, immutable transmission mode.
#[derive(Debug, Clone, PartialEq)]
pub struct TxMode {
    id: ModeId,
    spec: ModeSpec,
}

impl TxMode {
    pub fn id(&self) -> ModeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn modulation(&self) -> ModulationType {
        self.spec.modulation
    }

    pub fn data_rate_bps(&self) -> u32 {
        self.spec.data_rate_bps
    }

    pub fn phy_rate_sps(&self) -> u32 {
        self.spec.phy_rate_sps
    }

    pub fn center_freq_hz(&self) -> u32 {
        self.spec.center_freq_hz
    }

    pub fn bandwidth_hz(&self) -> u32 {
        self.spec.bandwidth_hz
    }

    pub fn constellation_size(&self) -> u32 {
        self.spec.constellation_size
    }

    pub fn spec(&self) -> &ModeSpec {
        &self.spec
    }

    /// Time on air of a frame of `size_bytes` bytes.
    ///
    /// # Formula
    ///
    /// ```text
    /// airtime = size_bytes × 8 / data_rate_bps
    /// ```
    ///
    /// A zero data rate gives an unbounded airtime (`SimTime::MAX`).
    pub fn airtime(&self, size_bytes: usize) -> SimTime {
        SimTime::from_secs_f64(size_bytes as f64 * 8.0 / self.spec.data_rate_bps as f64)
    }

    /// Duration of one symbol in seconds.
    pub fn symbol_time_secs(&self) -> f64 {
        1.0 / self.spec.phy_rate_sps as f64
    }
}

/// Owner of every transmission mode of a network.
#[derive(Debug, Clone, Default)]
pub struct ModeRegistry {
    modes: Vec<TxMode>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mode and return its id.
    ///
    /// If a mode with the same name already exists it is redefined in place and
    /// keeps its id.
    pub fn register(&mut self, spec: ModeSpec) -> ModeId {
        if let Some(existing) = self.modes.iter_mut().find(|m| m.spec.name == spec.name) {
            warn!("Redefining transmission mode \"{}\" ({:?})", spec.name, existing.id);
            existing.spec = spec;
            return existing.id;
        }
        let id = ModeId(self.modes.len() as u32);
        self.modes.push(TxMode { id, spec });
        id
    }

    /// Convenience wrapper around [`ModeRegistry::register`] taking the fields positionally.
    #[allow(clippy::too_many_arguments)]
    pub fn create_mode(
        &mut self,
        modulation: ModulationType,
        data_rate_bps: u32,
        phy_rate_sps: u32,
        center_freq_hz: u32,
        bandwidth_hz: u32,
        constellation_size: u32,
        name: &str,
    ) -> ModeId {
        self.register(ModeSpec {
            name: name.to_string(),
            modulation,
            data_rate_bps,
            phy_rate_sps,
            center_freq_hz,
            bandwidth_hz,
            constellation_size,
        })
    }

    pub fn get(&self, id: ModeId) -> Result<&TxMode> {
        self.modes.get(id.0 as usize).ok_or(MediumError::UnknownMode(id))
    }

    pub fn by_name(&self, name: &str) -> Result<&TxMode> {
        self.modes
            .iter()
            .find(|m| m.spec.name == name)
            .ok_or_else(|| MediumError::UnknownModeName(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TxMode> {
        self.modes.iter()
    }
}

/// Ordered list of the modes a PHY supports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModesList {
    modes: Vec<ModeId>,
}

impl ModesList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, mode: ModeId) {
        self.modes.push(mode);
    }

    /// Remove the mode at `index`, shifting later modes down.
    pub fn delete(&mut self, index: usize) -> Result<ModeId> {
        if index >= self.modes.len() {
            return Err(MediumError::ModeIndexOutOfRange { index, count: self.modes.len() });
        }
        Ok(self.modes.remove(index))
    }

    pub fn get(&self, index: usize) -> Result<ModeId> {
        self.modes
            .get(index)
            .copied()
            .ok_or(MediumError::ModeIndexOutOfRange { index, count: self.modes.len() })
    }

    pub fn contains(&self, mode: ModeId) -> bool {
        self.modes.contains(&mode)
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ModeId> + '_ {
        self.modes.iter().copied()
    }
}

impl FromIterator<ModeId> for ModesList {
    fn from_iter<I: IntoIterator<Item = ModeId>>(iter: I) -> Self {
        ModesList { modes: iter.into_iter().collect() }
    }
}
