//! Generic physical layer: the receiver state machine.
//!
//! A PHY sits on a transducer and decides, arrival by arrival, whether to lock
//! on, what SINR it experiences and whether the frame survives. States:
//!
//! - `Idle`: listening, medium quiet
//! - `CcaBusy`: listening, aggregate interference above the CCA threshold
//! - `Rx`: locked onto one arrival; the running minimum SINR over its airtime
//!   decides success at the end
//! - `Tx`: transmitting, every arrival is dropped
//! - `Sleep`: powered down, every arrival is dropped
//!
//! Cross-component effects (transducer transmit, channel fan-out) are driven by
//! the `Network`, which hands the PHY the read-only context it needs.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::error::Result;
use super::error_model::{PacketErrorModel, ThresholdPer};
use super::scheduler::{Event, Scheduler};
use super::signal_calculations::sum_powers_db;
use super::sinr::{DefaultSinr, SinrCalculator, SinrTarget};
use super::transducer::PacketArrival;
use super::tx_mode::{ModeId, ModeRegistry, ModesList, ModulationType, TxMode};
use super::types::{ArrivalId, Packet, PhyId, PhyState, SimTime, TransducerId};

pub const DEFAULT_CCA_THRESHOLD_DB: f64 = 10.0;
pub const DEFAULT_RX_THRESHOLD_DB: f64 = 10.0;
pub const DEFAULT_TX_POWER_DB: f64 = 190.0;
pub const DEFAULT_RX_GAIN_DB: f64 = 0.0;

/// Minimum SINR given to a reception ruined by a sibling PHY transmitting on
/// the same transducer.
pub const RUINED_SINR_DB: f64 = -1e30;

/// Thresholds and powers of a PHY.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhyConfig {
    /// Aggregate interference above which the medium is reported busy.
    pub cca_threshold_db: f64,
    /// Minimum SINR needed to lock onto an arrival.
    pub rx_threshold_db: f64,
    pub tx_power_db: f64,
    /// Gain applied to every received signal.
    pub rx_gain_db: f64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        PhyConfig {
            cca_threshold_db: DEFAULT_CCA_THRESHOLD_DB,
            rx_threshold_db: DEFAULT_RX_THRESHOLD_DB,
            tx_power_db: DEFAULT_TX_POWER_DB,
            rx_gain_db: DEFAULT_RX_GAIN_DB,
        }
    }
}

/// State-change observer. Every hook defaults to a no-op.
pub trait PhyListener {
    fn rx_start(&mut self) {}
    fn rx_end_ok(&mut self) {}
    fn rx_end_error(&mut self) {}
    fn cca_start(&mut self) {}
    fn cca_end(&mut self) {}
    fn tx_start(&mut self, _duration: SimTime) {}
}

/// Packet-level trace hooks. Every hook defaults to a no-op.
pub trait PhyTrace {
    fn tx(&mut self, _packet: &Packet, _tx_power_db: f64, _mode: &TxMode) {}
    fn tx_begin(&mut self, _packet: &Packet) {}
    fn tx_end(&mut self, _packet: &Packet) {}
    fn tx_drop(&mut self, _packet: &Packet) {}
    fn rx_begin(&mut self, _packet: &Packet) {}
    fn rx_end(&mut self, _packet: &Packet) {}
    fn rx_drop(&mut self, _packet: &Packet) {}
    fn rx_ok(&mut self, _packet: &Packet, _sinr_db: f64, _mode: &TxMode) {}
    fn rx_error(&mut self, _packet: &Packet, _sinr_db: f64, _mode: &TxMode) {}
}

/// Upper layer receiving decoded frames.
pub trait PhyReceiver {
    fn receive_ok(&mut self, packet: Packet, sinr_db: f64, mode: &TxMode);
    fn receive_error(&mut self, packet: Packet, sinr_db: f64);
}

/// Receiver installed until an upper layer attaches one.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardReceiver;

impl PhyReceiver for DiscardReceiver {
    fn receive_ok(&mut self, packet: Packet, sinr_db: f64, mode: &TxMode) {
        debug!("Discarding packet {} received in mode {} at {:.2} dB", packet.uid(), mode.name(), sinr_db);
    }

    fn receive_error(&mut self, packet: Packet, sinr_db: f64) {
        debug!("Discarding corrupted packet {} at {:.2} dB", packet.uid(), sinr_db);
    }
}

impl<T: PhyListener + ?Sized> PhyListener for Rc<RefCell<T>> {
    fn rx_start(&mut self) {
        self.borrow_mut().rx_start();
    }

    fn rx_end_ok(&mut self) {
        self.borrow_mut().rx_end_ok();
    }

    fn rx_end_error(&mut self) {
        self.borrow_mut().rx_end_error();
    }

    fn cca_start(&mut self) {
        self.borrow_mut().cca_start();
    }

    fn cca_end(&mut self) {
        self.borrow_mut().cca_end();
    }

    fn tx_start(&mut self, duration: SimTime) {
        self.borrow_mut().tx_start(duration);
    }
}

impl<T: PhyTrace + ?Sized> PhyTrace for Rc<RefCell<T>> {
    fn tx(&mut self, packet: &Packet, tx_power_db: f64, mode: &TxMode) {
        self.borrow_mut().tx(packet, tx_power_db, mode);
    }

    fn tx_begin(&mut self, packet: &Packet) {
        self.borrow_mut().tx_begin(packet);
    }

    fn tx_end(&mut self, packet: &Packet) {
        self.borrow_mut().tx_end(packet);
    }

    fn tx_drop(&mut self, packet: &Packet) {
        self.borrow_mut().tx_drop(packet);
    }

    fn rx_begin(&mut self, packet: &Packet) {
        self.borrow_mut().rx_begin(packet);
    }

    fn rx_end(&mut self, packet: &Packet) {
        self.borrow_mut().rx_end(packet);
    }

    fn rx_drop(&mut self, packet: &Packet) {
        self.borrow_mut().rx_drop(packet);
    }

    fn rx_ok(&mut self, packet: &Packet, sinr_db: f64, mode: &TxMode) {
        self.borrow_mut().rx_ok(packet, sinr_db, mode);
    }

    fn rx_error(&mut self, packet: &Packet, sinr_db: f64, mode: &TxMode) {
        self.borrow_mut().rx_error(packet, sinr_db, mode);
    }
}

impl<T: PhyReceiver + ?Sized> PhyReceiver for Rc<RefCell<T>> {
    fn receive_ok(&mut self, packet: Packet, sinr_db: f64, mode: &TxMode) {
        self.borrow_mut().receive_ok(packet, sinr_db, mode);
    }

    fn receive_error(&mut self, packet: Packet, sinr_db: f64) {
        self.borrow_mut().receive_error(packet, sinr_db);
    }
}

/// Called with the new state on every state transition.
pub type EnergyCallback = Box<dyn FnMut(PhyState)>;

/// Everything needed to build a PHY.
pub struct PhySetup {
    pub config: PhyConfig,
    /// Supported modes; `None` registers and uses the default FSK and QPSK modes.
    pub modes: Option<ModesList>,
    pub sinr: Box<dyn SinrCalculator>,
    pub per: Box<dyn PacketErrorModel>,
}

impl Default for PhySetup {
    fn default() -> Self {
        PhySetup { config: PhyConfig::default(), modes: None, sinr: Box::new(DefaultSinr), per: Box::new(ThresholdPer::default()) }
    }
}

impl PhySetup {
    pub fn with_config(mut self, config: PhyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_modes(mut self, modes: ModesList) -> Self {
        self.modes = Some(modes);
        self
    }

    pub fn with_sinr(mut self, sinr: Box<dyn SinrCalculator>) -> Self {
        self.sinr = sinr;
        self
    }

    pub fn with_per(mut self, per: Box<dyn PacketErrorModel>) -> Self {
        self.per = per;
        self
    }
}

/// Register (or look up) the default FSK and QPSK modes.
pub fn default_modes(registry: &mut ModeRegistry) -> ModesList {
    let fsk = match registry.by_name("FSK") {
        Ok(mode) => mode.id(),
        Err(_) => registry.create_mode(ModulationType::Fsk, 80, 80, 22_000, 4_000, 13, "FSK"),
    };
    let qpsk = match registry.by_name("QPSK") {
        Ok(mode) => mode.id(),
        Err(_) => registry.create_mode(ModulationType::Psk, 200, 200, 22_000, 4_000, 4, "QPSK"),
    };
    [fsk, qpsk].into_iter().collect()
}

/// Read-only view of the medium around a PHY during reception.
pub(crate) struct RxContext<'a> {
    pub modes: &'a ModeRegistry,
    pub arrivals: &'a [PacketArrival],
    pub channel: &'a Channel,
}

struct RxTracking {
    arrival: PacketArrival,
    min_sinr_db: f64,
}

pub struct Phy {
    id: PhyId,
    transducer: TransducerId,
    state: PhyState,
    config: PhyConfig,
    modes: ModesList,
    sinr: Box<dyn SinrCalculator>,
    per: Box<dyn PacketErrorModel>,
    rx: Option<RxTracking>,
    tx_generation: u64,
    rng: ChaCha8Rng,
    listeners: Vec<Box<dyn PhyListener>>,
    traces: Vec<Box<dyn PhyTrace>>,
    receiver: Box<dyn PhyReceiver>,
    energy_callback: Option<EnergyCallback>,
    disabled: bool,
}

impl Phy {
    pub(crate) fn new(id: PhyId, transducer: TransducerId, setup: PhySetup, modes: ModesList, seed: u64) -> Self {
        Phy {
            id,
            transducer,
            state: PhyState::Idle,
            config: setup.config,
            modes,
            sinr: setup.sinr,
            per: setup.per,
            rx: None,
            tx_generation: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            listeners: Vec::new(),
            traces: Vec::new(),
            receiver: Box::new(DiscardReceiver),
            energy_callback: None,
            disabled: false,
        }
    }

    pub fn id(&self) -> PhyId {
        self.id
    }

    pub fn transducer(&self) -> TransducerId {
        self.transducer
    }

    pub fn state(&self) -> PhyState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == PhyState::Idle
    }

    pub fn is_rx(&self) -> bool {
        self.state == PhyState::Rx
    }

    pub fn is_tx(&self) -> bool {
        self.state == PhyState::Tx
    }

    pub fn is_cca_busy(&self) -> bool {
        self.state == PhyState::CcaBusy
    }

    pub fn is_sleep(&self) -> bool {
        self.state == PhyState::Sleep
    }

    /// Neither idle nor asleep.
    pub fn is_busy(&self) -> bool {
        !self.is_idle() && !self.is_sleep()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn config(&self) -> &PhyConfig {
        &self.config
    }

    pub fn set_tx_power_db(&mut self, tx_power_db: f64) {
        self.config.tx_power_db = tx_power_db;
    }

    pub fn set_rx_gain_db(&mut self, rx_gain_db: f64) {
        self.config.rx_gain_db = rx_gain_db;
    }

    pub fn set_rx_threshold_db(&mut self, rx_threshold_db: f64) {
        self.config.rx_threshold_db = rx_threshold_db;
    }

    pub fn set_cca_threshold_db(&mut self, cca_threshold_db: f64) {
        self.config.cca_threshold_db = cca_threshold_db;
    }

    pub fn set_sinr_calculator(&mut self, sinr: Box<dyn SinrCalculator>) {
        self.sinr = sinr;
    }

    pub fn set_per_model(&mut self, per: Box<dyn PacketErrorModel>) {
        self.per = per;
    }

    pub fn modes(&self) -> &ModesList {
        &self.modes
    }

    pub fn mode_count(&self) -> usize {
        self.modes.len()
    }

    pub fn mode(&self, index: usize) -> Result<ModeId> {
        self.modes.get(index)
    }

    /// Packet currently being received, if any.
    pub fn rx_packet(&self) -> Option<&Packet> {
        self.rx.as_ref().map(|t| &t.arrival.packet)
    }

    /// Running minimum SINR of the reception in progress.
    pub fn min_rx_sinr_db(&self) -> Option<f64> {
        self.rx.as_ref().map(|t| t.min_sinr_db)
    }

    pub fn set_receiver(&mut self, receiver: Box<dyn PhyReceiver>) {
        self.receiver = receiver;
    }

    pub fn add_listener(&mut self, listener: Box<dyn PhyListener>) {
        self.listeners.push(listener);
    }

    pub fn add_trace(&mut self, trace: Box<dyn PhyTrace>) {
        self.traces.push(trace);
    }

    pub fn set_energy_callback(&mut self, callback: EnergyCallback) {
        self.energy_callback = Some(callback);
    }

    /// Reseed the random stream used for the success draw.
    ///
    /// # Returns
    ///
    /// Number of streams consumed.
    pub fn assign_streams(&mut self, stream: u64) -> u64 {
        self.rng = ChaCha8Rng::seed_from_u64(stream);
        1
    }

    /// The battery ran out: every further operation is ignored.
    pub fn energy_depletion_handler(&mut self) {
        debug!("PHY {:?}: energy depleted, disabling", self.id);
        self.disabled = true;
    }

    pub fn energy_recharge_handler(&mut self) {
        debug!("PHY {:?}: energy recharged, enabling", self.id);
        self.disabled = false;
    }

    fn set_state(&mut self, state: PhyState) {
        self.state = state;
        if let Some(callback) = self.energy_callback.as_mut() {
            callback(state);
        }
    }

    fn notify_listeners(&mut self, mut f: impl FnMut(&mut dyn PhyListener)) {
        for listener in self.listeners.iter_mut() {
            f(listener.as_mut());
        }
    }

    fn trace(&mut self, mut f: impl FnMut(&mut dyn PhyTrace)) {
        for trace in self.traces.iter_mut() {
            f(trace.as_mut());
        }
    }

    /// Aggregate power of every live arrival, after receive gain.
    pub fn interference_db(&self, arrivals: &[PacketArrival]) -> f64 {
        sum_powers_db(arrivals.iter().map(|a| a.rx_power_db)) + self.config.rx_gain_db
    }

    fn calculate_sinr_db(&self, ctx: &RxContext<'_>, target: &SinrTarget<'_>) -> Result<f64> {
        // the gain lifts every signal equally, which is the same as lowering the noise floor
        let ambient = ctx.channel.ambient_noise_db(target.mode) - self.config.rx_gain_db;
        self.sinr.calc_sinr_db(target, ambient, ctx.arrivals, ctx.modes)
    }

    /// Go to `CcaBusy` or `Idle` depending on the interference level.
    fn settle(&mut self, arrivals: &[PacketArrival]) {
        if self.interference_db(arrivals) > self.config.cca_threshold_db {
            self.set_state(PhyState::CcaBusy);
            self.notify_listeners(|l| l.cca_start());
        } else {
            self.set_state(PhyState::Idle);
        }
    }

    /// Decide whether a new arrival can be sent.
    ///
    /// # Returns
    ///
    /// The mode to transmit with, or `None` when the packet is dropped because
    /// the PHY is disabled, transmitting or asleep.
    pub(crate) fn prepare_send(&mut self, packet: &Packet, mode_index: usize, modes: &ModeRegistry, now: SimTime) -> Result<Option<ModeId>> {
        if self.disabled || self.is_tx() || self.is_sleep() {
            debug!("{}: PHY {:?} dropping packet {} to send (state {}, disabled {})", now, self.id, packet.uid(), self.state, self.disabled);
            self.trace(|t| t.tx_drop(packet));
            return Ok(None);
        }
        let mode = self.modes.get(mode_index)?;
        modes.get(mode)?;
        if let Some(abandoned) = self.rx.take() {
            debug!("{}: PHY {:?} abandoning reception of packet {} to transmit", now, self.id, abandoned.arrival.packet.uid());
        }
        Ok(Some(mode))
    }

    /// Switch to TX for the airtime of `packet` and schedule the end of transmission.
    pub(crate) fn enter_tx(&mut self, packet: &Packet, mode: &TxMode, scheduler: &mut Scheduler) {
        let airtime = mode.airtime(packet.size());
        debug!("{}: PHY {:?} sending packet {} in mode {} for {}", scheduler.now(), self.id, packet.uid(), mode.name(), airtime);
        self.set_state(PhyState::Tx);
        self.tx_generation += 1;
        scheduler.schedule_after(airtime, Event::PhyTxEnd { phy: self.id, generation: self.tx_generation });
        let tx_power_db = self.config.tx_power_db;
        self.trace(|t| t.tx(packet, tx_power_db, mode));
        self.notify_listeners(|l| l.tx_start(airtime));
    }

    pub(crate) fn notify_tx_begin(&mut self, packet: &Packet) {
        self.trace(|t| t.tx_begin(packet));
    }

    pub(crate) fn notify_tx_end(&mut self, packet: &Packet) {
        self.trace(|t| t.tx_end(packet));
    }

    pub(crate) fn notify_tx_drop(&mut self, packet: &Packet) {
        self.trace(|t| t.tx_drop(packet));
    }

    /// End of this PHY's own transmission.
    pub(crate) fn tx_end(&mut self, generation: u64, arrivals: &[PacketArrival]) {
        if self.is_sleep() || self.disabled {
            debug!("PHY {:?}: transmission ended while asleep or disabled", self.id);
            return;
        }
        if !self.is_tx() || generation != self.tx_generation {
            debug!("PHY {:?}: ignoring stale end of transmission", self.id);
            return;
        }
        self.settle(arrivals);
    }

    /// A new arrival reached the transducer while it is listening.
    pub(crate) fn start_rx_packet(&mut self, ctx: &RxContext<'_>, arrival: &PacketArrival, scheduler: &mut Scheduler) -> Result<()> {
        let now = scheduler.now();
        if self.disabled {
            debug!("{}: PHY {:?} disabled, dropping packet {}", now, self.id, arrival.packet.uid());
            self.trace(|t| t.rx_drop(&arrival.packet));
            return Ok(());
        }

        match self.state {
            PhyState::Sleep | PhyState::Tx => {
                debug!("{}: PHY {:?} in state {}, dropping packet {}", now, self.id, self.state, arrival.packet.uid());
                self.trace(|t| t.rx_drop(&arrival.packet));
            }
            PhyState::Rx => {
                if let Some(tracking) = self.rx.as_ref() {
                    let mode = ctx.modes.get(tracking.arrival.mode)?;
                    let sinr = self.calculate_sinr_db(ctx, &SinrTarget::from_arrival(&tracking.arrival, mode))?;
                    debug!("{}: PHY {:?} interference from packet {}, SINR now {:.2} dB", now, self.id, arrival.packet.uid(), sinr);
                    if let Some(tracking) = self.rx.as_mut() {
                        tracking.min_sinr_db = tracking.min_sinr_db.min(sinr);
                    }
                    self.trace(|t| t.rx_begin(&arrival.packet));
                }
            }
            PhyState::Idle | PhyState::CcaBusy => {
                let mode = ctx.modes.get(arrival.mode)?;
                if !self.modes.contains(arrival.mode) {
                    debug!("{}: PHY {:?} does not support mode {}, not receiving", now, self.id, mode.name());
                } else {
                    let sinr = self.calculate_sinr_db(ctx, &SinrTarget::from_arrival(arrival, mode))?;
                    if sinr >= self.config.rx_threshold_db {
                        debug!("{}: PHY {:?} receiving packet {} at {:.2} dB SINR", now, self.id, arrival.packet.uid(), sinr);
                        self.set_state(PhyState::Rx);
                        self.trace(|t| t.rx_begin(&arrival.packet));
                        self.rx = Some(RxTracking { arrival: arrival.clone(), min_sinr_db: sinr });
                        scheduler.schedule_after(mode.airtime(arrival.packet.size()), Event::PhyRxEnd { phy: self.id, arrival: arrival.id });
                        self.notify_listeners(|l| l.rx_start());
                    } else {
                        debug!("{}: PHY {:?} SINR {:.2} dB below threshold, not receiving packet {}", now, self.id, sinr, arrival.packet.uid());
                    }
                }
            }
        }

        if self.is_idle() && self.interference_db(ctx.arrivals) > self.config.cca_threshold_db {
            self.set_state(PhyState::CcaBusy);
            self.notify_listeners(|l| l.cca_start());
        }
        Ok(())
    }

    /// End of the airtime of a tracked arrival: decide success or failure.
    pub(crate) fn rx_end(&mut self, ctx: &RxContext<'_>, arrival: ArrivalId) -> Result<()> {
        let tracking = match self.rx.take() {
            Some(tracking) if tracking.arrival.id == arrival => tracking,
            other => {
                self.rx = other;
                debug!("PHY {:?}: ignoring stale end of reception {:?}", self.id, arrival);
                return Ok(());
            }
        };
        let packet = tracking.arrival.packet;

        if self.is_sleep() || self.disabled {
            debug!("PHY {:?}: asleep or disabled at end of reception, dropping packet {}", self.id, packet.uid());
            self.trace(|t| t.rx_drop(&packet));
            return Ok(());
        }

        self.trace(|t| t.rx_end(&packet));
        self.settle(ctx.arrivals);

        let mode = ctx.modes.get(tracking.arrival.mode)?;
        let sinr = tracking.min_sinr_db;
        let per = self.per.calc_per(&packet, sinr, mode);
        let draw: f64 = self.rng.gen_range(0.0..1.0);
        if draw > per {
            debug!("PHY {:?}: received packet {} (min SINR {:.2} dB, PER {:.3})", self.id, packet.uid(), sinr, per);
            self.trace(|t| t.rx_ok(&packet, sinr, mode));
            self.notify_listeners(|l| l.rx_end_ok());
            self.receiver.receive_ok(packet, sinr, mode);
        } else {
            debug!("PHY {:?}: lost packet {} (min SINR {:.2} dB, PER {:.3})", self.id, packet.uid(), sinr, per);
            self.trace(|t| t.rx_error(&packet, sinr, mode));
            self.notify_listeners(|l| l.rx_end_error());
            self.receiver.receive_error(packet, sinr);
        }
        Ok(())
    }

    /// An arrival left the transducer.
    pub(crate) fn notify_int_change(&mut self, arrivals: &[PacketArrival]) {
        if self.is_cca_busy() && self.interference_db(arrivals) < self.config.cca_threshold_db {
            self.set_state(PhyState::Idle);
            self.notify_listeners(|l| l.cca_end());
        }
    }

    /// A sibling PHY on the same transducer started transmitting.
    pub(crate) fn notify_trans_start_tx(&mut self) {
        if let Some(tracking) = self.rx.as_mut() {
            tracking.min_sinr_db = RUINED_SINR_DB;
        }
    }

    pub(crate) fn set_sleep_mode(&mut self, sleep: bool, arrivals: &[PacketArrival]) {
        if sleep {
            debug!("PHY {:?}: going to sleep", self.id);
            if let Some(abandoned) = self.rx.take() {
                self.trace(|t| t.rx_drop(&abandoned.arrival.packet));
            }
            self.set_state(PhyState::Sleep);
        } else if self.is_sleep() {
            debug!("PHY {:?}: waking up", self.id);
            self.settle(arrivals);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::noise::ConstantNoise;
    use crate::simulation::pdp::Pdp;
    use crate::simulation::propagation::IdealPropagation;
    use crate::simulation::types::ChannelId;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        ok: Vec<(u64, f64)>,
        errors: Vec<(u64, f64)>,
    }

    impl PhyListener for Recorder {
        fn rx_start(&mut self) {
            self.events.push("rx_start".into());
        }

        fn cca_start(&mut self) {
            self.events.push("cca_start".into());
        }

        fn cca_end(&mut self) {
            self.events.push("cca_end".into());
        }
    }

    impl PhyTrace for Recorder {
        fn rx_begin(&mut self, packet: &Packet) {
            self.events.push(format!("rx_begin {}", packet.uid()));
        }

        fn rx_drop(&mut self, packet: &Packet) {
            self.events.push(format!("rx_drop {}", packet.uid()));
        }
    }

    impl PhyReceiver for Recorder {
        fn receive_ok(&mut self, packet: Packet, sinr_db: f64, _mode: &TxMode) {
            self.ok.push((packet.uid(), sinr_db));
        }

        fn receive_error(&mut self, packet: Packet, sinr_db: f64) {
            self.errors.push((packet.uid(), sinr_db));
        }
    }

    struct Fixture {
        registry: ModeRegistry,
        channel: Channel,
        scheduler: Scheduler,
        phy: Phy,
        recorder: Rc<RefCell<Recorder>>,
        mode: ModeId,
    }

    // Noise density -130 dB/Hz over 1 kHz: ambient noise at -100 dB.
    fn fixture() -> Fixture {
        let mut registry = ModeRegistry::new();
        let mode = registry.create_mode(ModulationType::Fsk, 1_000, 1_000, 22_000, 1_000, 2, "TEST");
        let channel = Channel::new(ChannelId(0), Box::new(IdealPropagation::default()), Box::new(ConstantNoise { db_hz: -130.0 }));
        let modes: ModesList = [mode].into_iter().collect();
        let mut phy = Phy::new(PhyId(0), TransducerId(0), PhySetup::default(), modes, 1);
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        phy.add_listener(Box::new(recorder.clone()));
        phy.add_trace(Box::new(recorder.clone()));
        phy.set_receiver(Box::new(recorder.clone()));
        Fixture { registry, channel, scheduler: Scheduler::new(), phy, recorder, mode }
    }

    fn arrival(id: u64, rx_power_db: f64, mode: ModeId) -> PacketArrival {
        PacketArrival {
            id: ArrivalId(id),
            packet: Packet::new(id, 100),
            rx_power_db,
            mode,
            pdp: Pdp::impulse(),
            arrival_time: SimTime::ZERO,
        }
    }

    impl Fixture {
        fn deliver(&mut self, arrivals: &[PacketArrival], new: &PacketArrival) {
            let ctx = RxContext { modes: &self.registry, arrivals, channel: &self.channel };
            self.phy.start_rx_packet(&ctx, new, &mut self.scheduler).unwrap();
        }

        fn end(&mut self, arrivals: &[PacketArrival], id: u64) {
            let ctx = RxContext { modes: &self.registry, arrivals, channel: &self.channel };
            self.phy.rx_end(&ctx, ArrivalId(id)).unwrap();
        }
    }

    #[test]
    fn locks_onto_strong_arrival_and_succeeds() {
        let mut f = fixture();
        let a = arrival(1, -50.0, f.mode);
        let live = vec![a.clone()];
        f.deliver(&live, &a);
        assert!(f.phy.is_rx());
        assert_eq!(f.phy.rx_packet().map(|p| p.uid()), Some(1));
        assert!((f.phy.min_rx_sinr_db().unwrap() - 50.0).abs() < 1e-9);
        // rx end scheduled after 100 bytes at 1 kbps
        assert_eq!(f.scheduler.peek_time(), Some(SimTime::from_millis(800)));

        f.end(&[], 1);
        assert_eq!(f.phy.state(), PhyState::Idle);
        assert_eq!(f.recorder.borrow().ok.len(), 1);
        assert!(f.recorder.borrow().errors.is_empty());
    }

    #[test]
    fn rx_threshold_gates_acquisition() {
        // SINR of this arrival is 50 dB
        let a = arrival(1, -50.0, ModeId(0));

        let mut f = fixture();
        f.phy.set_rx_threshold_db(49.99);
        f.deliver(&[a.clone()], &a);
        assert!(f.phy.is_rx());

        let mut f = fixture();
        f.phy.set_rx_threshold_db(50.01);
        f.deliver(&[a.clone()], &a);
        assert!(!f.phy.is_rx());
        assert!(f.scheduler.is_empty());
    }

    #[test]
    fn weak_arrival_only_raises_cca() {
        let mut f = fixture();
        f.phy.set_cca_threshold_db(-100.0);
        let a = arrival(1, -95.0, f.mode);
        let live = vec![a.clone()];
        f.deliver(&live, &a);
        // SINR 5 dB, below the 10 dB rx threshold, but above the CCA level
        assert!(f.phy.is_cca_busy());
        f.phy.notify_int_change(&[]);
        assert!(f.phy.is_idle());
        assert_eq!(f.recorder.borrow().events, vec!["cca_start", "cca_end"]);
    }

    #[test]
    fn unsupported_mode_is_not_received() {
        let mut f = fixture();
        let other = f.registry.create_mode(ModulationType::Psk, 1_000, 1_000, 22_000, 1_000, 4, "OTHER");
        let a = arrival(1, -50.0, other);
        f.deliver(&[a.clone()], &a);
        assert!(!f.phy.is_rx());
    }

    #[test]
    fn sleeping_phy_drops_arrivals_once() {
        let mut f = fixture();
        f.phy.set_sleep_mode(true, &[]);
        let a = arrival(7, -50.0, f.mode);
        f.deliver(&[a.clone()], &a);
        assert!(f.phy.is_sleep());
        assert_eq!(f.recorder.borrow().events, vec!["rx_drop 7"]);
        assert!(f.scheduler.is_empty());
    }

    #[test]
    fn min_sinr_tracks_worst_overlap() {
        let mut f = fixture();
        let a = arrival(1, -50.0, f.mode);
        let b = arrival(2, -60.0, f.mode);
        f.deliver(&[a.clone()], &a);
        let both = vec![a.clone(), b.clone()];
        f.deliver(&both, &b);
        let min = f.phy.min_rx_sinr_db().unwrap();
        // interference -60 dB dominates the -100 dB noise
        let expected = -50.0 - crate::simulation::signal_calculations::sum_powers_db([-60.0, -100.0]);
        assert!((min - expected).abs() < 1e-9);
        // b leaving does not raise the recorded minimum
        f.end(&[a.clone()], 1);
        let ok = f.recorder.borrow().ok.clone();
        assert_eq!(ok.len(), 1);
        assert!((ok[0].1 - expected).abs() < 1e-9);
    }

    #[test]
    fn overlapping_arrival_is_traced_while_receiving() {
        let mut f = fixture();
        let a = arrival(1, -50.0, f.mode);
        let b = arrival(2, -60.0, f.mode);
        f.deliver(&[a.clone()], &a);
        f.deliver(&[a.clone(), b.clone()], &b);
        assert!(f.phy.is_rx());
        assert_eq!(f.phy.rx_packet().map(|p| p.uid()), Some(1));
        assert_eq!(f.recorder.borrow().events, vec!["rx_begin 1", "rx_start", "rx_begin 2"]);
    }

    #[test]
    fn stale_rx_end_is_ignored() {
        let mut f = fixture();
        let a = arrival(1, -50.0, f.mode);
        f.deliver(&[a.clone()], &a);
        f.end(&[a.clone()], 99);
        assert!(f.phy.is_rx());
        assert!(f.recorder.borrow().ok.is_empty());
    }

    #[test]
    fn sibling_transmission_ruins_reception() {
        let mut f = fixture();
        let a = arrival(1, -50.0, f.mode);
        f.deliver(&[a.clone()], &a);
        f.phy.notify_trans_start_tx();
        assert_eq!(f.phy.min_rx_sinr_db(), Some(RUINED_SINR_DB));
        f.end(&[], 1);
        assert_eq!(f.recorder.borrow().errors.len(), 1);
    }

    #[test]
    fn tx_end_goes_cca_busy_under_interference() {
        let mut f = fixture();
        let mut packet = Packet::new(5, 10);
        packet.push_header(&[1]);
        let mode = f.phy.prepare_send(&packet, 0, &f.registry, SimTime::ZERO).unwrap().unwrap();
        f.phy.enter_tx(&packet, f.registry.get(mode).unwrap(), &mut f.scheduler);
        assert!(f.phy.is_tx());
        // second send while transmitting is dropped
        assert_eq!(f.phy.prepare_send(&packet, 0, &f.registry, SimTime::ZERO).unwrap(), None);

        let loud = arrival(1, 20.0, f.mode);
        f.phy.tx_end(1, &[loud]);
        assert!(f.phy.is_cca_busy());
    }

    #[test]
    fn bad_mode_index_is_an_error() {
        let mut f = fixture();
        let packet = Packet::new(5, 10);
        assert!(f.phy.prepare_send(&packet, 3, &f.registry, SimTime::ZERO).is_err());
    }

    #[test]
    fn disabled_phy_ignores_everything() {
        let mut f = fixture();
        f.phy.energy_depletion_handler();
        let a = arrival(3, -50.0, f.mode);
        f.deliver(&[a.clone()], &a);
        assert!(!f.phy.is_rx());
        assert_eq!(f.phy.prepare_send(&Packet::new(4, 10), 0, &f.registry, SimTime::ZERO).unwrap(), None);
        f.phy.energy_recharge_handler();
        assert!(!f.phy.is_disabled());
    }

    #[test]
    fn energy_callback_sees_transitions() {
        let mut f = fixture();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        f.phy.set_energy_callback(Box::new(move |state| sink.borrow_mut().push(state)));
        f.phy.set_sleep_mode(true, &[]);
        f.phy.set_sleep_mode(false, &[]);
        assert_eq!(*seen.borrow(), vec![PhyState::Sleep, PhyState::Idle]);
    }

    #[test]
    fn default_modes_are_fsk_and_qpsk() {
        let mut registry = ModeRegistry::new();
        let modes = default_modes(&mut registry);
        assert_eq!(modes.len(), 2);
        let fsk = registry.get(modes.get(0).unwrap()).unwrap();
        assert_eq!((fsk.data_rate_bps(), fsk.constellation_size(), fsk.name()), (80, 13, "FSK"));
        let qpsk = registry.get(modes.get(1).unwrap()).unwrap();
        assert_eq!((qpsk.data_rate_bps(), qpsk.modulation()), (200, ModulationType::Psk));
        // calling again reuses the registered modes
        assert_eq!(default_modes(&mut registry), modes);
        assert_eq!(registry.len(), 2);
    }
}
