//! Composite PHY: several sub-PHYs on one transducer behaving as one.
//!
//! Each sub-PHY supports its own list of modes. A global mode index is mapped
//! to (sub-PHY, local index) with prefix sums of the sub-PHY mode counts, so a
//! gateway that listens on many modes at once can be addressed with a single
//! flat mode numbering. The `Network` performs the fan-out operations.

use super::error::{MediumError, Result};
use super::phy::Phy;
use super::types::{MultiPhyId, PhyId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiPhy {
    id: MultiPhyId,
    sub_phys: Vec<PhyId>,
    // offsets[i] is the global index of the first mode of sub_phys[i]
    offsets: Vec<usize>,
    total_modes: usize,
}

impl MultiPhy {
    /// Build the mapping from the sub-PHYs in order.
    pub(crate) fn new(id: MultiPhyId, sub_phys: &[PhyId], phys: &[Phy]) -> Result<Self> {
        let mut offsets = Vec::with_capacity(sub_phys.len());
        let mut total_modes = 0;
        for phy in sub_phys {
            let phy = phys.get(phy.0).ok_or(MediumError::UnknownPhy(*phy))?;
            offsets.push(total_modes);
            total_modes += phy.mode_count();
        }
        Ok(MultiPhy { id, sub_phys: sub_phys.to_vec(), offsets, total_modes })
    }

    pub fn id(&self) -> MultiPhyId {
        self.id
    }

    pub fn sub_phys(&self) -> &[PhyId] {
        &self.sub_phys
    }

    pub fn total_modes(&self) -> usize {
        self.total_modes
    }

    /// Map a global mode index to the sub-PHY owning it and its local index.
    pub fn resolve(&self, global: usize) -> Result<(PhyId, usize)> {
        if global >= self.total_modes {
            return Err(MediumError::ModeIndexOutOfRange { index: global, count: self.total_modes });
        }
        // last sub-PHY whose first mode is at or before `global`
        let slot = self.offsets.partition_point(|&offset| offset <= global) - 1;
        Ok((self.sub_phys[slot], global - self.offsets[slot]))
    }

    fn sub<'a>(&'a self, phys: &'a [Phy]) -> impl Iterator<Item = &'a Phy> + 'a {
        self.sub_phys.iter().filter_map(move |id| phys.get(id.0))
    }

    pub fn is_idle(&self, phys: &[Phy]) -> bool {
        self.sub(phys).all(Phy::is_idle)
    }

    pub fn is_sleep(&self, phys: &[Phy]) -> bool {
        self.sub(phys).all(Phy::is_sleep)
    }

    /// Not idle or not asleep. A composite with at least one sub-PHY can never be
    /// both, so this is always true for it.
    pub fn is_busy(&self, phys: &[Phy]) -> bool {
        !self.is_idle(phys) || !self.is_sleep(phys)
    }

    pub fn is_rx(&self, phys: &[Phy]) -> bool {
        self.sub(phys).any(Phy::is_rx)
    }

    pub fn is_tx(&self, phys: &[Phy]) -> bool {
        self.sub(phys).any(Phy::is_tx)
    }

    pub fn is_cca_busy(&self, phys: &[Phy]) -> bool {
        self.sub(phys).any(Phy::is_cca_busy)
    }
}
