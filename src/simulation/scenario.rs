//! Gateway experiment: end devices around one gateway, random start times,
//! modes rotating across devices.
//!
//! The gateway is a composite PHY with one sub-PHY per scene mode, so it can
//! lock onto any of them. Every end device has a single PHY supporting all
//! modes and transmits in its assigned one. Delivery statistics are collected
//! through PHY traces.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

use super::network::Network;
use super::phy::{PhySetup, PhyTrace};
use super::tx_mode::{ModeId, ModesList, TxMode};
use super::types::{Packet, SimTime};
use crate::common::scene::Scene;

/// Per-mode delivery counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModeStats {
    pub name: String,
    /// Frames put on the air.
    pub sent: u64,
    /// Frames the gateway decoded.
    pub received: u64,
    /// Frames the gateway locked onto but lost.
    pub corrupted: u64,
    sinr_sum_db: f64,
}

impl ModeStats {
    /// Mean minimum SINR of decoded frames.
    pub fn mean_sinr_db(&self) -> Option<f64> {
        (self.received > 0).then(|| self.sinr_sum_db / self.received as f64)
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioReport {
    pub modes: Vec<ModeStats>,
    /// Sends refused because the device was still transmitting.
    pub dropped_tx: u64,
    pub end_time: SimTime,
    pub events: u64,
}

impl ScenarioReport {
    pub fn sent(&self) -> u64 {
        self.modes.iter().map(|m| m.sent).sum()
    }

    pub fn received(&self) -> u64 {
        self.modes.iter().map(|m| m.received).sum()
    }

    pub fn corrupted(&self) -> u64 {
        self.modes.iter().map(|m| m.corrupted).sum()
    }

    /// Fraction of sent frames the gateway decoded.
    pub fn delivery_ratio(&self) -> f64 {
        match self.sent() {
            0 => 0.0,
            sent => self.received() as f64 / sent as f64,
        }
    }
}

/// Trace sink counting frames per mode.
struct TrafficCounter {
    modes: Vec<ModeStats>,
    ids: Vec<ModeId>,
    dropped_tx: u64,
}

impl TrafficCounter {
    fn new(registered: &[(ModeId, String)]) -> Self {
        TrafficCounter {
            modes: registered.iter().map(|(_, name)| ModeStats { name: name.clone(), ..ModeStats::default() }).collect(),
            ids: registered.iter().map(|(id, _)| *id).collect(),
            dropped_tx: 0,
        }
    }

    fn stats(&mut self, mode: &TxMode) -> Option<&mut ModeStats> {
        let index = self.ids.iter().position(|id| *id == mode.id())?;
        self.modes.get_mut(index)
    }
}

impl PhyTrace for TrafficCounter {
    fn tx(&mut self, _packet: &Packet, _tx_power_db: f64, mode: &TxMode) {
        if let Some(stats) = self.stats(mode) {
            stats.sent += 1;
        }
    }

    fn tx_drop(&mut self, _packet: &Packet) {
        self.dropped_tx += 1;
    }

    fn rx_ok(&mut self, _packet: &Packet, sinr_db: f64, mode: &TxMode) {
        if let Some(stats) = self.stats(mode) {
            stats.received += 1;
            stats.sinr_sum_db += sinr_db;
        }
    }

    fn rx_error(&mut self, _packet: &Packet, _sinr_db: f64, mode: &TxMode) {
        if let Some(stats) = self.stats(mode) {
            stats.corrupted += 1;
        }
    }
}

/// Send times of one device: a uniform start in the window, then exponential gaps.
fn send_times(rng: &mut ChaCha8Rng, scene: &Scene) -> Result<Vec<SimTime>> {
    let traffic = &scene.traffic;
    let gaps = Exp::new(1.0 / traffic.mean_interval_secs).context("Invalid mean_interval_secs")?;
    let mut at = if traffic.start_window_secs > 0.0 { rng.gen_range(0.0..traffic.start_window_secs) } else { 0.0 };
    let mut times = Vec::with_capacity(traffic.packets_per_node as usize);
    for _ in 0..traffic.packets_per_node {
        times.push(SimTime::from_secs_f64(at));
        at += gaps.sample(rng);
    }
    Ok(times)
}

/// Build the network described by `scene`, run it for `duration_secs` and
/// report gateway delivery statistics.
pub fn run_scene(scene: &Scene) -> Result<ScenarioReport> {
    let mut net = Network::new(scene.seed);
    let registered: Vec<(ModeId, String)> =
        scene.modes.iter().map(|spec| (net.modes_mut().register(spec.clone()), spec.name.clone())).collect();
    let all_modes: ModesList = registered.iter().map(|(id, _)| *id).collect();
    let channel = net.add_channel(scene.propagation.build(), scene.noise.build());

    let phy_setup = |modes: ModesList| PhySetup {
        config: scene.phy,
        modes: Some(modes),
        sinr: scene.sinr_model.build(),
        per: scene.per_model.build(),
    };

    // Gateway: one sub-PHY per mode behind a composite.
    let gateway_node = net.add_node(scene.gateway.position);
    let gateway_transducer = net.add_transducer();
    net.add_endpoint(channel, gateway_node, gateway_transducer)?;
    let mut sub_phys = Vec::with_capacity(registered.len());
    for (mode, _) in &registered {
        sub_phys.push(net.add_phy(gateway_transducer, phy_setup([*mode].into_iter().collect()))?);
    }
    let gateway = net.add_multi_phy(&sub_phys)?;
    let gateway_counter = Rc::new(RefCell::new(TrafficCounter::new(&registered)));
    net.multi_phy_add_trace(gateway, gateway_counter.clone())?;

    // End devices.
    let device_counter = Rc::new(RefCell::new(TrafficCounter::new(&registered)));
    let mut rng = ChaCha8Rng::seed_from_u64(scene.seed);
    for (index, spec) in scene.nodes.iter().enumerate() {
        let mode_index = scene.node_mode_index(index).with_context(|| format!("Node {} has no usable mode", spec.node_id))?;
        let node = net.add_node(spec.position);
        let transducer = net.add_transducer();
        net.add_endpoint(channel, node, transducer)?;
        let phy = net.add_phy(transducer, phy_setup(all_modes.clone()))?;
        net.phy_mut(phy)?.add_trace(Box::new(device_counter.clone()));

        let times = send_times(&mut rng, scene)?;
        debug!("Node {} sends {} packets in mode {}, first at {:?}", spec.node_id, times.len(), mode_index, times.first());
        let size = scene.traffic.packet_size_bytes;
        for at in times {
            net.schedule_callback(at, move |net| {
                let packet = net.create_packet(size);
                net.send_packet(phy, packet, mode_index)
            });
        }
    }

    info!(
        "Scenario: {} nodes, {} modes, {} packets per node, running for {:.1}s",
        scene.nodes.len(),
        registered.len(),
        scene.traffic.packets_per_node,
        scene.duration_secs
    );
    net.run_until(SimTime::from_secs_f64(scene.duration_secs))
        .with_context(|| format!("Simulation aborted at {}", net.now()))?;

    let received = gateway_counter.borrow();
    let sent = device_counter.borrow();
    let modes = sent
        .modes
        .iter()
        .zip(received.modes.iter())
        .map(|(tx, rx)| ModeStats { sent: tx.sent, ..rx.clone() })
        .collect();
    Ok(ScenarioReport { modes, dropped_tx: sent.dropped_tx, end_time: net.now(), events: net.scheduler().processed() })
}
