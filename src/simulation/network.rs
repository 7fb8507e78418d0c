//! The arena owning every simulated component plus the event loop driving them.
//!
//! High-level flow of one transmission:
//! 1) `send_packet` puts the PHY and its transducer in TX and asks the channel
//!    to fan the packet out; each copy becomes a `Deliver` event at now + delay.
//! 2) `Deliver` records a `PacketArrival` on the receiving transducer, schedules
//!    its removal after the airtime and, if the transducer listens, lets every
//!    attached PHY decide whether to lock on.
//! 3) `RemoveArrival` drops the arrival from the interference set and lets the
//!    PHYs re-evaluate CCA.
//! 4) `PhyRxEnd` draws the reception outcome from the minimum SINR observed.
//!
//! Components reference each other by typed index only. Handlers destructure
//! the network to borrow the pieces they need side by side.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, error, info, warn};

use super::channel::Channel;
use super::error::{MediumError, Result};
use super::geometry::Position;
use super::multi_phy::MultiPhy;
use super::noise::NoiseModel;
use super::pdp::Pdp;
use super::phy::{Phy, PhyListener, PhyReceiver, PhySetup, PhyTrace, RxContext, default_modes};
use super::propagation::PropagationModel;
use super::scheduler::{Event, Scheduler};
use super::transducer::{PacketArrival, Transducer};
use super::tx_mode::{ModeId, ModeRegistry};
use super::types::{ArrivalId, ChannelId, MultiPhyId, NodeId, Packet, PhyId, SimTime, TransducerId};

/// A positioned device. Transducers are attached to nodes through channel endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    position: Position,
}

impl Node {
    pub fn new(id: NodeId, position: Position) -> Self {
        Node { id, position }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn position(&self) -> Position {
        self.position
    }
}

pub struct Network {
    scheduler: Scheduler,
    modes: ModeRegistry,
    nodes: Vec<Node>,
    channels: Vec<Channel>,
    transducers: Vec<Transducer>,
    phys: Vec<Phy>,
    multi_phys: Vec<MultiPhy>,
    next_packet_uid: u64,
    next_arrival_id: u64,
    seed: u64,
}

impl Network {
    /// Create an empty network. `seed` drives every PHY's random stream.
    pub fn new(seed: u64) -> Self {
        Network {
            scheduler: Scheduler::new(),
            modes: ModeRegistry::new(),
            nodes: Vec::new(),
            channels: Vec::new(),
            transducers: Vec::new(),
            phys: Vec::new(),
            multi_phys: Vec::new(),
            next_packet_uid: 0,
            next_arrival_id: 0,
            seed,
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn modes(&self) -> &ModeRegistry {
        &self.modes
    }

    pub fn modes_mut(&mut self) -> &mut ModeRegistry {
        &mut self.modes
    }

    // ---------------------------------------------------------------------
    // Topology
    // ---------------------------------------------------------------------

    pub fn add_node(&mut self, position: Position) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(id, position));
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(MediumError::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Move a node. Takes effect for transmissions started afterwards.
    pub fn set_position(&mut self, id: NodeId, position: Position) -> Result<()> {
        let node = self.nodes.get_mut(id.0).ok_or(MediumError::UnknownNode(id))?;
        node.position = position;
        Ok(())
    }

    pub fn add_channel(&mut self, propagation: Box<dyn PropagationModel>, noise: Box<dyn NoiseModel>) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.channels.push(Channel::new(id, propagation, noise));
        id
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels.get(id.0).ok_or(MediumError::UnknownChannel(id))
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.channels.get_mut(id.0).ok_or(MediumError::UnknownChannel(id))
    }

    pub fn add_transducer(&mut self) -> TransducerId {
        let id = TransducerId(self.transducers.len());
        self.transducers.push(Transducer::new(id));
        id
    }

    pub fn transducer(&self, id: TransducerId) -> Result<&Transducer> {
        self.transducers.get(id.0).ok_or(MediumError::UnknownTransducer(id))
    }

    /// Register `transducer`, mounted on `node`, as an endpoint of `channel`.
    pub fn add_endpoint(&mut self, channel: ChannelId, node: NodeId, transducer: TransducerId) -> Result<()> {
        self.node(node)?;
        let Network { channels, transducers, .. } = self;
        let transducer = transducers.get_mut(transducer.0).ok_or(MediumError::UnknownTransducer(transducer))?;
        let channel = channels.get_mut(channel.0).ok_or(MediumError::UnknownChannel(channel))?;
        channel.add_endpoint(node, transducer.id());
        transducer.set_channel(channel.id());
        Ok(())
    }

    /// Attach a new PHY to `transducer`.
    ///
    /// A setup without a mode list gets the default FSK and QPSK modes, which are
    /// registered on first use.
    pub fn add_phy(&mut self, transducer: TransducerId, mut setup: PhySetup) -> Result<PhyId> {
        self.transducer(transducer)?;
        let modes = match setup.modes.take() {
            Some(modes) => modes,
            None => default_modes(&mut self.modes),
        };
        for mode in modes.iter() {
            self.modes.get(mode)?;
        }
        let id = PhyId(self.phys.len());
        let seed = self.seed ^ (id.0 as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        debug!("Adding PHY {:?} on transducer {:?} with {} modes", id, transducer, modes.len());
        self.phys.push(Phy::new(id, transducer, setup, modes, seed));
        if let Some(t) = self.transducers.get_mut(transducer.0) {
            t.add_phy(id);
        }
        Ok(id)
    }

    pub fn phy(&self, id: PhyId) -> Result<&Phy> {
        self.phys.get(id.0).ok_or(MediumError::UnknownPhy(id))
    }

    pub fn phy_mut(&mut self, id: PhyId) -> Result<&mut Phy> {
        self.phys.get_mut(id.0).ok_or(MediumError::UnknownPhy(id))
    }

    pub fn phys(&self) -> &[Phy] {
        &self.phys
    }

    /// Group PHYs sharing one transducer into a composite with flat mode numbering.
    pub fn add_multi_phy(&mut self, sub_phys: &[PhyId]) -> Result<MultiPhyId> {
        let id = MultiPhyId(self.multi_phys.len());
        let multi = MultiPhy::new(id, sub_phys, &self.phys)?;
        let mut transducers = sub_phys.iter().filter_map(|p| self.phys.get(p.0)).map(Phy::transducer);
        if let Some(first) = transducers.next() {
            if transducers.any(|t| t != first) {
                warn!("Multi-PHY {:?} groups PHYs on different transducers", id);
            }
        }
        self.multi_phys.push(multi);
        Ok(id)
    }

    pub fn multi_phy(&self, id: MultiPhyId) -> Result<&MultiPhy> {
        self.multi_phys.get(id.0).ok_or(MediumError::UnknownMultiPhy(id))
    }

    // ---------------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------------

    /// Allocate a packet of `size` zero bytes with a fresh uid.
    pub fn create_packet(&mut self, size: usize) -> Packet {
        let uid = self.next_packet_uid;
        self.next_packet_uid += 1;
        Packet::new(uid, size)
    }

    /// Transmit `packet` from `phy` using the mode at `mode_index` of its mode list.
    ///
    /// A disabled, transmitting or sleeping PHY drops the packet (tx-drop trace)
    /// without error.
    pub fn send_packet(&mut self, phy: PhyId, packet: Packet, mode_index: usize) -> Result<()> {
        let Network { scheduler, modes, nodes, channels, transducers, phys, .. } = self;
        let sender = phys.get_mut(phy.0).ok_or(MediumError::UnknownPhy(phy))?;
        let transducer_id = sender.transducer();
        let transducer = transducers.get_mut(transducer_id.0).ok_or(MediumError::UnknownTransducer(transducer_id))?;
        let channel_id = transducer.channel().ok_or(MediumError::DetachedTransducer(transducer_id))?;
        let channel = channels.get(channel_id.0).ok_or(MediumError::UnknownChannel(channel_id))?;

        let Some(mode_id) = sender.prepare_send(&packet, mode_index, modes, scheduler.now())? else {
            return Ok(());
        };
        let mode = modes.get(mode_id)?;
        sender.enter_tx(&packet, mode, scheduler);
        let tx_power_db = sender.config().tx_power_db;

        let schedule = transducer.begin_transmit(mode.airtime(packet.size()), scheduler);
        if schedule.superseded {
            debug!("{}: transducer {:?} superseding its transmission in progress", scheduler.now(), transducer_id);
            sender.notify_tx_drop(&packet);
        } else {
            sender.notify_tx_begin(&packet);
        }
        for sibling in transducer.phys().iter().filter(|p| **p != phy) {
            if let Some(sibling) = phys.get_mut(sibling.0) {
                sibling.notify_trans_start_tx();
            }
        }

        channel.transmit_packet(transducer_id, &packet, tx_power_db, mode, nodes, scheduler)?;
        scheduler.schedule_after(schedule.duration, Event::TxEndTrace { phy, packet });
        Ok(())
    }

    /// Transmit through a composite, addressing the mode by its global index.
    pub fn multi_phy_send_packet(&mut self, multi: MultiPhyId, packet: Packet, mode_index: usize) -> Result<()> {
        let (phy, local) = self.multi_phy(multi)?.resolve(mode_index)?;
        self.send_packet(phy, packet, local)
    }

    pub fn set_sleep_mode(&mut self, phy: PhyId, sleep: bool) -> Result<()> {
        let Network { transducers, phys, .. } = self;
        let phy = phys.get_mut(phy.0).ok_or(MediumError::UnknownPhy(phy))?;
        let transducer = transducers.get(phy.transducer().0).ok_or(MediumError::UnknownTransducer(phy.transducer()))?;
        phy.set_sleep_mode(sleep, transducer.arrivals());
        Ok(())
    }

    pub fn multi_phy_set_sleep_mode(&mut self, multi: MultiPhyId, sleep: bool) -> Result<()> {
        let sub_phys = self.multi_phy(multi)?.sub_phys().to_vec();
        for phy in sub_phys {
            self.set_sleep_mode(phy, sleep)?;
        }
        Ok(())
    }

    /// The PHY's energy source ran out.
    pub fn energy_depleted(&mut self, phy: PhyId) -> Result<()> {
        self.phy_mut(phy)?.energy_depletion_handler();
        Ok(())
    }

    /// Install one shared receiver on every sub-PHY of a composite.
    pub fn multi_phy_set_receiver<R: PhyReceiver + 'static>(&mut self, multi: MultiPhyId, receiver: Rc<RefCell<R>>) -> Result<()> {
        let sub_phys = self.multi_phy(multi)?.sub_phys().to_vec();
        for phy in sub_phys {
            self.phy_mut(phy)?.set_receiver(Box::new(receiver.clone()));
        }
        Ok(())
    }

    pub fn multi_phy_add_listener<L: PhyListener + 'static>(&mut self, multi: MultiPhyId, listener: Rc<RefCell<L>>) -> Result<()> {
        let sub_phys = self.multi_phy(multi)?.sub_phys().to_vec();
        for phy in sub_phys {
            self.phy_mut(phy)?.add_listener(Box::new(listener.clone()));
        }
        Ok(())
    }

    pub fn multi_phy_add_trace<T: PhyTrace + 'static>(&mut self, multi: MultiPhyId, trace: Rc<RefCell<T>>) -> Result<()> {
        let sub_phys = self.multi_phy(multi)?.sub_phys().to_vec();
        for phy in sub_phys {
            self.phy_mut(phy)?.add_trace(Box::new(trace.clone()));
        }
        Ok(())
    }

    /// Run `callback` with full access to the network `delay` from now.
    pub fn schedule_callback<F>(&mut self, delay: SimTime, callback: F)
    where
        F: FnOnce(&mut Network) -> Result<()> + 'static,
    {
        self.scheduler.schedule_callback(delay, callback);
    }

    // ---------------------------------------------------------------------
    // Event loop
    // ---------------------------------------------------------------------

    /// Process the next event.
    ///
    /// # Returns
    ///
    /// `false` once the queue is empty.
    pub fn step(&mut self) -> Result<bool> {
        let Some(event) = self.scheduler.pop() else {
            return Ok(false);
        };
        self.dispatch(event)?;
        Ok(true)
    }

    /// Process events until the queue is empty.
    pub fn run(&mut self) -> Result<()> {
        while self.step().inspect_err(|e| error!("{}: simulation aborted: {}", self.scheduler.now(), e))? {}
        info!("Simulation finished at {} after {} events", self.scheduler.now(), self.scheduler.processed());
        Ok(())
    }

    /// Process every event at or before `until`, then move the clock to `until`.
    pub fn run_until(&mut self, until: SimTime) -> Result<()> {
        while self.scheduler.peek_time().is_some_and(|t| t <= until) {
            self.step().inspect_err(|e| error!("{}: simulation aborted: {}", self.scheduler.now(), e))?;
        }
        self.scheduler.advance_to(until);
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Deliver { transducer, packet, rx_power_db, mode, pdp } => self.deliver(transducer, packet, rx_power_db, mode, pdp),
            Event::RemoveArrival { transducer, arrival } => self.remove_arrival(transducer, arrival),
            Event::TransducerTxEnd { transducer, generation } => {
                self.transducers.get_mut(transducer.0).ok_or(MediumError::UnknownTransducer(transducer))?.end_transmit(generation);
                Ok(())
            }
            Event::TxEndTrace { phy, packet } => {
                self.phy_mut(phy)?.notify_tx_end(&packet);
                Ok(())
            }
            Event::PhyTxEnd { phy, generation } => {
                let Network { transducers, phys, .. } = self;
                let phy = phys.get_mut(phy.0).ok_or(MediumError::UnknownPhy(phy))?;
                let transducer = transducers.get(phy.transducer().0).ok_or(MediumError::UnknownTransducer(phy.transducer()))?;
                phy.tx_end(generation, transducer.arrivals());
                Ok(())
            }
            Event::PhyRxEnd { phy, arrival } => self.phy_rx_end(phy, arrival),
            Event::Callback(callback) => callback(self),
        }
    }

    fn deliver(&mut self, transducer: TransducerId, packet: Packet, rx_power_db: f64, mode: ModeId, pdp: Pdp) -> Result<()> {
        let id = ArrivalId(self.next_arrival_id);
        self.next_arrival_id += 1;

        let Network { scheduler, modes, channels, transducers, phys, .. } = self;
        let airtime = modes.get(mode)?.airtime(packet.size());
        let arrival = PacketArrival { id, packet, rx_power_db, mode, pdp, arrival_time: scheduler.now() };
        let receiver = transducers.get_mut(transducer.0).ok_or(MediumError::UnknownTransducer(transducer))?;
        if !receiver.receive(arrival, airtime, scheduler) {
            return Ok(());
        }

        let receiver = &transducers[transducer.0];
        let channel_id = receiver.channel().ok_or(MediumError::DetachedTransducer(transducer))?;
        let channel = channels.get(channel_id.0).ok_or(MediumError::UnknownChannel(channel_id))?;
        let Some(arrival) = receiver.arrival(id) else {
            return Ok(());
        };
        let ctx = RxContext { modes: &*modes, arrivals: receiver.arrivals(), channel };
        for phy in receiver.phys() {
            phys.get_mut(phy.0).ok_or(MediumError::UnknownPhy(*phy))?.start_rx_packet(&ctx, arrival, scheduler)?;
        }
        Ok(())
    }

    fn remove_arrival(&mut self, transducer: TransducerId, arrival: ArrivalId) -> Result<()> {
        let Network { transducers, phys, .. } = self;
        let owner = transducers.get_mut(transducer.0).ok_or(MediumError::UnknownTransducer(transducer))?;
        if owner.remove_arrival(arrival).is_none() {
            debug!("Transducer {:?}: arrival {:?} already gone", transducer, arrival);
            return Ok(());
        }
        for phy in owner.phys() {
            phys.get_mut(phy.0).ok_or(MediumError::UnknownPhy(*phy))?.notify_int_change(owner.arrivals());
        }
        Ok(())
    }

    fn phy_rx_end(&mut self, phy: PhyId, arrival: ArrivalId) -> Result<()> {
        let Network { modes, channels, transducers, phys, .. } = self;
        let phy = phys.get_mut(phy.0).ok_or(MediumError::UnknownPhy(phy))?;
        let transducer = transducers.get(phy.transducer().0).ok_or(MediumError::UnknownTransducer(phy.transducer()))?;
        let channel_id = transducer.channel().ok_or(MediumError::DetachedTransducer(transducer.id()))?;
        let channel = channels.get(channel_id.0).ok_or(MediumError::UnknownChannel(channel_id))?;
        let ctx = RxContext { modes: &*modes, arrivals: transducer.arrivals(), channel };
        phy.rx_end(&ctx, arrival)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::error_model::UmodemPer;
    use crate::simulation::noise::ConstantNoise;
    use crate::simulation::phy::PhyConfig;
    use crate::simulation::propagation::IdealPropagation;
    use crate::simulation::signal_calculations::sum_powers_db;
    use crate::simulation::tx_mode::{ModesList, ModulationType, TxMode};

    #[derive(Default)]
    struct Stats {
        ok: Vec<(u64, f64)>,
        errors: Vec<u64>,
        modes: Vec<String>,
        drops: Vec<u64>,
        tx_begins: usize,
        tx_ends: usize,
    }

    impl PhyReceiver for Stats {
        fn receive_ok(&mut self, packet: Packet, sinr_db: f64, mode: &TxMode) {
            self.ok.push((packet.uid(), sinr_db));
            self.modes.push(mode.name().to_string());
        }

        fn receive_error(&mut self, packet: Packet, _sinr_db: f64) {
            self.errors.push(packet.uid());
        }
    }

    impl PhyTrace for Stats {
        fn rx_drop(&mut self, packet: &Packet) {
            self.drops.push(packet.uid());
        }

        fn tx_begin(&mut self, _packet: &Packet) {
            self.tx_begins += 1;
        }

        fn tx_end(&mut self, _packet: &Packet) {
            self.tx_ends += 1;
        }
    }

    struct Device {
        transducer: TransducerId,
        phy: PhyId,
        stats: Rc<RefCell<Stats>>,
    }

    // 1 kbps over 1 kHz; a 10 byte packet is on air for 80 ms.
    fn network(seed: u64, noise_db_hz: f64) -> (Network, ChannelId, ModeId) {
        let mut net = Network::new(seed);
        let mode = net.modes_mut().create_mode(ModulationType::Fsk, 1_000, 1_000, 22_000, 1_000, 2, "TEST");
        let channel = net.add_channel(Box::new(IdealPropagation::default()), Box::new(ConstantNoise { db_hz: noise_db_hz }));
        (net, channel, mode)
    }

    fn device(net: &mut Network, channel: ChannelId, x: f64, setup: PhySetup) -> Device {
        let node = net.add_node(Position::new(x, 0.0, 0.0));
        let transducer = net.add_transducer();
        net.add_endpoint(channel, node, transducer).unwrap();
        let phy = net.add_phy(transducer, setup).unwrap();
        let stats = Rc::new(RefCell::new(Stats::default()));
        net.phy_mut(phy).unwrap().set_receiver(Box::new(stats.clone()));
        net.phy_mut(phy).unwrap().add_trace(Box::new(stats.clone()));
        Device { transducer, phy, stats }
    }

    fn setup(mode: ModeId, tx_power_db: f64) -> PhySetup {
        PhySetup::default()
            .with_modes([mode].into_iter().collect())
            .with_config(PhyConfig { tx_power_db, ..PhyConfig::default() })
    }

    #[test]
    fn transmission_reaches_every_other_endpoint_once() {
        let (mut net, ch, mode) = network(1, -130.0);
        let devices: Vec<Device> = (0..4).map(|i| device(&mut net, ch, i as f64 * 10.0, setup(mode, 20.0))).collect();
        let packet = net.create_packet(10);
        net.send_packet(devices[0].phy, packet, 0).unwrap();
        net.run().unwrap();

        assert!(devices[0].stats.borrow().ok.is_empty());
        for d in &devices[1..] {
            let stats = d.stats.borrow();
            assert_eq!(stats.ok.len(), 1);
            assert_eq!(stats.ok[0].0, 0);
        }
        assert_eq!(devices[0].stats.borrow().tx_begins, 1);
        assert_eq!(devices[0].stats.borrow().tx_ends, 1);
        assert!(net.phys().iter().all(Phy::is_idle));
    }

    #[test]
    fn arrival_appears_after_propagation_delay() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 1500.0, setup(mode, 20.0));
        let packet = net.create_packet(10);
        net.send_packet(a.phy, packet, 0).unwrap();

        net.run_until(SimTime::from_millis(999)).unwrap();
        assert!(net.transducer(b.transducer).unwrap().arrivals().is_empty());
        net.run_until(SimTime::from_millis(1000)).unwrap();
        assert_eq!(net.transducer(b.transducer).unwrap().arrivals().len(), 1);
        assert!(net.phy(b.phy).unwrap().is_rx());
        net.run_until(SimTime::from_millis(1080)).unwrap();
        assert!(net.transducer(b.transducer).unwrap().arrivals().is_empty());
        assert_eq!(b.stats.borrow().ok.len(), 1);
    }

    #[test]
    fn sleeping_receiver_drops_once_but_still_counts_interference() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 0.0, setup(mode, 20.0));
        net.set_sleep_mode(b.phy, true).unwrap();
        let packet = net.create_packet(10);
        net.send_packet(a.phy, packet, 0).unwrap();

        net.run_until(SimTime::from_millis(10)).unwrap();
        assert_eq!(b.stats.borrow().drops, vec![0]);
        assert_eq!(net.transducer(b.transducer).unwrap().arrivals().len(), 1);
        net.run().unwrap();
        assert_eq!(b.stats.borrow().drops, vec![0]);
        assert!(b.stats.borrow().ok.is_empty());
        assert!(net.transducer(b.transducer).unwrap().arrivals().is_empty());
    }

    #[test]
    fn sleeping_mid_reception_abandons_the_packet() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let packet = net.create_packet(10);
        net.send_packet(a.phy, packet, 0).unwrap();
        net.run_until(SimTime::from_millis(20)).unwrap();
        assert!(net.phy(b.phy).unwrap().is_rx());

        net.set_sleep_mode(b.phy, true).unwrap();
        net.run_until(SimTime::from_millis(40)).unwrap();
        net.set_sleep_mode(b.phy, false).unwrap();
        // the packet is still on air: the woken PHY sees a busy medium
        assert!(net.phy(b.phy).unwrap().is_cca_busy());
        net.run().unwrap();

        let stats = b.stats.borrow();
        assert_eq!(stats.drops, vec![0]);
        assert!(stats.ok.is_empty() && stats.errors.is_empty());
        assert!(net.phy(b.phy).unwrap().is_idle());
    }

    #[test]
    fn outcome_uses_minimum_sinr_over_the_airtime() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 0.0, setup(mode, 10.0));
        let r = device(&mut net, ch, 0.0, setup(mode, 20.0));

        // 100 bytes: 800 ms on air
        let long = net.create_packet(100);
        net.send_packet(a.phy, long, 0).unwrap();
        let b_phy = b.phy;
        net.schedule_callback(SimTime::from_millis(200), move |net| {
            let short = net.create_packet(10);
            net.send_packet(b_phy, short, 0)
        });
        net.run().unwrap();

        let stats = r.stats.borrow();
        assert_eq!(stats.ok.len(), 1);
        assert_eq!(stats.ok[0].0, 0);
        let expected = 20.0 - sum_powers_db([10.0, -100.0]);
        assert!((stats.ok[0].1 - expected).abs() < 1e-9);
    }

    #[test]
    fn overlapping_loud_interferer_corrupts_the_packet() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let r = device(&mut net, ch, 0.0, setup(mode, 20.0));

        let first = net.create_packet(100);
        net.send_packet(a.phy, first, 0).unwrap();
        let b_phy = b.phy;
        net.schedule_callback(SimTime::from_millis(100), move |net| {
            let second = net.create_packet(10);
            net.send_packet(b_phy, second, 0)
        });
        net.run().unwrap();

        // equal powers: 0 dB SINR is below the 8 dB PER threshold
        assert_eq!(r.stats.borrow().errors, vec![0]);
        assert!(r.stats.borrow().ok.is_empty());
    }

    #[test]
    fn tx_end_under_interference_goes_cca_busy() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 0.0, setup(mode, 20.0));

        let short = net.create_packet(10);
        net.send_packet(a.phy, short, 0).unwrap();
        let long = net.create_packet(100);
        net.send_packet(b.phy, long, 0).unwrap();

        net.run_until(SimTime::from_millis(100)).unwrap();
        // a finished its 80 ms frame while b's 20 dB frame is still on air
        assert!(net.phy(a.phy).unwrap().is_cca_busy());
        assert!(net.phy(b.phy).unwrap().is_tx());
        net.run().unwrap();
        assert!(net.phy(a.phy).unwrap().is_idle());
        // a was transmitting when b's frame arrived and never locked onto it
        assert!(a.stats.borrow().ok.is_empty());
    }

    #[test]
    fn send_while_transmitting_is_dropped() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let b = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let first = net.create_packet(10);
        let second = net.create_packet(10);
        net.send_packet(a.phy, first, 0).unwrap();
        net.send_packet(a.phy, second, 0).unwrap();
        net.run().unwrap();
        assert_eq!(a.stats.borrow().tx_begins, 1);
        assert_eq!(b.stats.borrow().ok.len(), 1);
    }

    #[test]
    fn contract_violations_abort_the_run() {
        let (mut net, ch, mode) = network(1, -130.0);
        let a = device(&mut net, ch, 0.0, setup(mode, 20.0));
        let packet = net.create_packet(10);
        assert_eq!(net.send_packet(a.phy, packet, 1), Err(MediumError::ModeIndexOutOfRange { index: 1, count: 1 }));

        net.schedule_callback(SimTime::from_millis(5), |_| Err(MediumError::Callback("boom".into())));
        net.schedule_callback(SimTime::from_millis(10), |net| {
            let packet = net.create_packet(1);
            net.send_packet(PhyId(0), packet, 0)
        });
        assert_eq!(net.run(), Err(MediumError::Callback("boom".into())));
        assert_eq!(net.now(), SimTime::from_millis(5));
        assert!(net.phy(a.phy).unwrap().is_idle());
    }

    #[test]
    fn same_seed_replays_identically() {
        fn outcomes(seed: u64) -> (Vec<u64>, Vec<u64>) {
            // noise -18 dB/Hz over 1 kHz: 8 dB SINR, inside the modem's transition band
            let (mut net, ch, mode) = network(seed, -18.0);
            let rx_setup = || setup(mode, 20.0).with_per(Box::new(UmodemPer)).with_config(PhyConfig {
                tx_power_db: 20.0,
                rx_threshold_db: 5.0,
                ..PhyConfig::default()
            });
            let a = device(&mut net, ch, 0.0, rx_setup());
            let b = device(&mut net, ch, 0.0, rx_setup());
            // 200 bytes: 1.6 s on air
            for i in 0..40u64 {
                let phy = a.phy;
                net.schedule_callback(SimTime::from_millis(i * 2_000), move |net| {
                    let packet = net.create_packet(200);
                    net.send_packet(phy, packet, 0)
                });
            }
            net.run().unwrap();
            let stats = b.stats.borrow();
            assert_eq!(stats.ok.len() + stats.errors.len(), 40);
            (stats.ok.iter().map(|(uid, _)| *uid).collect(), stats.errors.clone())
        }

        assert_eq!(outcomes(7), outcomes(7));
    }

    #[test]
    fn multi_phy_maps_global_mode_indices() {
        let mut net = Network::new(3);
        let low = net.modes_mut().create_mode(ModulationType::Psk, 1_000, 1_000, 22_000, 1_000, 4, "LOW");
        let high = net.modes_mut().create_mode(ModulationType::Psk, 1_000, 1_000, 30_000, 1_000, 4, "HIGH");
        let ch = net.add_channel(Box::new(IdealPropagation::default()), Box::new(ConstantNoise { db_hz: -130.0 }));

        let gateway_node = net.add_node(Position::new(0.0, 0.0, 0.0));
        let gateway_transducer = net.add_transducer();
        net.add_endpoint(ch, gateway_node, gateway_transducer).unwrap();
        let sub_low = net.add_phy(gateway_transducer, setup(low, 20.0)).unwrap();
        let sub_high = net.add_phy(gateway_transducer, setup(high, 20.0)).unwrap();
        let gateway = net.add_multi_phy(&[sub_low, sub_high]).unwrap();
        let gateway_stats = Rc::new(RefCell::new(Stats::default()));
        net.multi_phy_set_receiver(gateway, gateway_stats.clone()).unwrap();

        let both: ModesList = [low, high].into_iter().collect();
        let node = device(&mut net, ch, 100.0, PhySetup::default().with_modes(both));

        // node sends in HIGH (its local index 1)
        let packet = net.create_packet(10);
        net.send_packet(node.phy, packet, 1).unwrap();
        net.run_until(SimTime::from_millis(100)).unwrap();
        assert!(net.multi_phy(gateway).unwrap().is_rx(net.phys()));
        assert!(net.phy(sub_high).unwrap().is_rx());
        assert!(!net.phy(sub_low).unwrap().is_rx());
        net.run().unwrap();
        assert_eq!(gateway_stats.borrow().modes, vec!["HIGH"]);

        // gateway replies with global index 1, served by the HIGH sub-PHY
        let reply = net.create_packet(10);
        net.multi_phy_send_packet(gateway, reply, 1).unwrap();
        assert!(net.phy(sub_high).unwrap().is_tx());
        net.run().unwrap();
        assert_eq!(node.stats.borrow().modes, vec!["HIGH"]);

        let out_of_range = net.create_packet(10);
        assert!(net.multi_phy_send_packet(gateway, out_of_range, 2).is_err());

        net.multi_phy_set_sleep_mode(gateway, true).unwrap();
        assert!(net.multi_phy(gateway).unwrap().is_sleep(net.phys()));
    }

    #[test]
    fn default_setup_registers_default_modes_once() {
        let (mut net, ch, _) = network(1, -130.0);
        device(&mut net, ch, 0.0, PhySetup::default());
        device(&mut net, ch, 0.0, PhySetup::default());
        assert_eq!(net.modes().len(), 3);
        assert!(net.modes().by_name("QPSK").is_ok());
    }

    #[test]
    fn endpoints_need_known_components() {
        let (mut net, ch, _) = network(1, -130.0);
        let t = net.add_transducer();
        assert_eq!(net.add_endpoint(ch, NodeId(9), t), Err(MediumError::UnknownNode(NodeId(9))));
        let n = net.add_node(Position::new(0.0, 0.0, 0.0));
        assert_eq!(net.add_endpoint(ChannelId(4), n, t), Err(MediumError::UnknownChannel(ChannelId(4))));
        net.add_endpoint(ch, n, t).unwrap();
        net.add_endpoint(ch, n, t).unwrap();
        assert_eq!(net.channel(ch).unwrap().device_count(), 1);
        assert_eq!(net.transducer(t).unwrap().channel(), Some(ch));
    }
}
