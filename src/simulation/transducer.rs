//! Half-duplex transducer: the physical interface between PHYs and the channel.
//!
//! The transducer keeps every arrival that is currently on the air at its
//! position, whether or not a PHY decodes it, because each of them counts as
//! interference. While it transmits, arrivals are still recorded but no attached
//! PHY is told to start receiving them.

use log::debug;

use super::pdp::Pdp;
use super::scheduler::{Event, Scheduler};
use super::tx_mode::ModeId;
use super::types::{ArrivalId, ChannelId, Packet, PhyId, SimTime, TransducerId, TransducerState};

/// One delivered copy of a transmission, live for its airtime.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketArrival {
    pub id: ArrivalId,
    pub packet: Packet,
    pub rx_power_db: f64,
    pub mode: ModeId,
    pub pdp: Pdp,
    pub arrival_time: SimTime,
}

/// Outcome of starting a transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TxSchedule {
    /// The previous, still running transmission was cut short.
    pub superseded: bool,
    /// Time until the transducer returns to receive.
    pub duration: SimTime,
}

pub struct Transducer {
    id: TransducerId,
    state: TransducerState,
    arrivals: Vec<PacketArrival>,
    phys: Vec<PhyId>,
    channel: Option<ChannelId>,
    end_tx_time: SimTime,
    tx_generation: u64,
}

impl Transducer {
    pub(crate) fn new(id: TransducerId) -> Self {
        Transducer {
            id,
            state: TransducerState::Rx,
            arrivals: Vec::new(),
            phys: Vec::new(),
            channel: None,
            end_tx_time: SimTime::ZERO,
            tx_generation: 0,
        }
    }

    pub fn id(&self) -> TransducerId {
        self.id
    }

    pub fn state(&self) -> TransducerState {
        self.state
    }

    pub fn is_tx(&self) -> bool {
        self.state == TransducerState::Tx
    }

    pub fn is_rx(&self) -> bool {
        self.state == TransducerState::Rx
    }

    /// Arrivals currently on the air at this transducer.
    pub fn arrivals(&self) -> &[PacketArrival] {
        &self.arrivals
    }

    pub fn arrival(&self, id: ArrivalId) -> Option<&PacketArrival> {
        self.arrivals.iter().find(|a| a.id == id)
    }

    pub fn phys(&self) -> &[PhyId] {
        &self.phys
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub(crate) fn set_channel(&mut self, channel: ChannelId) {
        self.channel = Some(channel);
    }

    pub(crate) fn add_phy(&mut self, phy: PhyId) {
        if !self.phys.contains(&phy) {
            self.phys.push(phy);
        }
    }

    /// Record a new arrival and schedule its removal after `airtime`.
    ///
    /// # Returns
    ///
    /// `true` when the attached PHYs should be told about the arrival (the
    /// transducer is listening), `false` while it transmits.
    pub(crate) fn receive(&mut self, arrival: PacketArrival, airtime: SimTime, scheduler: &mut Scheduler) -> bool {
        debug!(
            "{}: transducer {:?} receiving packet {} at {:.2} dB for {}",
            scheduler.now(),
            self.id,
            arrival.packet.uid(),
            arrival.rx_power_db,
            airtime
        );
        scheduler.schedule_after(airtime, Event::RemoveArrival { transducer: self.id, arrival: arrival.id });
        self.arrivals.push(arrival);
        self.is_rx()
    }

    pub(crate) fn remove_arrival(&mut self, id: ArrivalId) -> Option<PacketArrival> {
        let index = self.arrivals.iter().position(|a| a.id == id)?;
        Some(self.arrivals.remove(index))
    }

    /// Switch to transmit for `airtime`, superseding any transmission in progress.
    ///
    /// The transducer stays in TX until the later of the new airtime and the end
    /// of the previous transmission.
    pub(crate) fn begin_transmit(&mut self, airtime: SimTime, scheduler: &mut Scheduler) -> TxSchedule {
        let now = scheduler.now();
        let superseded = self.is_tx();
        self.state = TransducerState::Tx;
        let duration = airtime.max(self.end_tx_time.saturating_sub(now));
        self.tx_generation += 1;
        self.end_tx_time = now + duration;
        scheduler.schedule_after(duration, Event::TransducerTxEnd { transducer: self.id, generation: self.tx_generation });
        TxSchedule { superseded, duration }
    }

    /// Return to receive unless a later transmission superseded this one.
    pub(crate) fn end_transmit(&mut self, generation: u64) {
        if generation == self.tx_generation {
            self.state = TransducerState::Rx;
        }
    }

    /// End of the current transmission, or the last one if idle.
    pub fn end_tx_time(&self) -> SimTime {
        self.end_tx_time
    }
}
