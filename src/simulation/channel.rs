//! Shared medium connecting transducers.
//!
//! The channel owns the propagation and noise models. A transmission is copied
//! to every other registered endpoint and delivered after the propagation
//! delay, attenuated by the path loss between the two node positions.
//!
//! Independently of propagation, the channel exposes three advisory sub-channel
//! flags that upper layers use for exclusive access.

use log::{debug, warn};

use super::error::{MediumError, Result};
use super::geometry::Position;
use super::network::Node;
use super::noise::NoiseModel;
use super::propagation::PropagationModel;
use super::scheduler::{Event, Scheduler};
use super::signal_calculations::integrate_noise_db;
use super::tx_mode::TxMode;
use super::types::{ChannelId, NodeId, Packet, SubChannelState, TransducerId};

/// Number of advisory sub-channels per channel.
pub const SUB_CHANNEL_COUNT: usize = 3;

pub struct Channel {
    id: ChannelId,
    endpoints: Vec<(NodeId, TransducerId)>,
    propagation: Box<dyn PropagationModel>,
    noise: Box<dyn NoiseModel>,
    sub_channels: [SubChannelState; SUB_CHANNEL_COUNT],
    current_packet: Option<Packet>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, propagation: Box<dyn PropagationModel>, noise: Box<dyn NoiseModel>) -> Self {
        Channel {
            id,
            endpoints: Vec::new(),
            propagation,
            noise,
            sub_channels: [SubChannelState::Idle; SUB_CHANNEL_COUNT],
            current_packet: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Register a (node, transducer) endpoint. Registering the same pair twice is a no-op.
    ///
    /// # Returns
    ///
    /// `true` if the endpoint was newly added.
    pub(crate) fn add_endpoint(&mut self, node: NodeId, transducer: TransducerId) -> bool {
        if self.endpoints.contains(&(node, transducer)) {
            return false;
        }
        debug!("Channel {:?}: adding endpoint #{} ({:?}, {:?})", self.id, self.endpoints.len(), node, transducer);
        self.endpoints.push((node, transducer));
        true
    }

    pub fn endpoints(&self) -> &[(NodeId, TransducerId)] {
        &self.endpoints
    }

    pub fn device_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn set_propagation_model(&mut self, propagation: Box<dyn PropagationModel>) {
        self.propagation = propagation;
    }

    pub fn set_noise_model(&mut self, noise: Box<dyn NoiseModel>) {
        self.noise = noise;
    }

    /// Ambient noise density in dB/Hz at `freq_khz`.
    pub fn noise_db_hz(&self, freq_khz: f64) -> f64 {
        self.noise.noise_db_hz(freq_khz)
    }

    /// Ambient noise power over the band occupied by `mode`.
    pub fn ambient_noise_db(&self, mode: &TxMode) -> f64 {
        integrate_noise_db(self.noise_db_hz(mode.center_freq_hz() as f64 / 1000.0), mode.bandwidth_hz())
    }

    /// Fan a transmission out to every endpoint except the source.
    ///
    /// Each receiver gets its own copy of the packet, delivered after the
    /// propagation delay with `tx_power_db − path loss`.
    ///
    /// # Returns
    ///
    /// Number of deliveries scheduled.
    pub(crate) fn transmit_packet(
        &self,
        src: TransducerId,
        packet: &Packet,
        tx_power_db: f64,
        mode: &TxMode,
        nodes: &[Node],
        scheduler: &mut Scheduler,
    ) -> Result<usize> {
        let (src_node, _) = self
            .endpoints
            .iter()
            .find(|(_, t)| *t == src)
            .ok_or(MediumError::UnregisteredTransducer { transducer: src, channel: self.id })?;
        let sender = node_position(nodes, *src_node)?;

        let mut scheduled = 0;
        for (node, transducer) in self.endpoints.iter().filter(|(_, t)| *t != src) {
            let receiver = node_position(nodes, *node)?;
            let delay = self.propagation.delay(&sender, &receiver, mode);
            let pdp = self.propagation.pdp(&sender, &receiver, mode);
            let rx_power_db = tx_power_db - self.propagation.path_loss_db(&sender, &receiver, mode);
            debug!(
                "Channel {:?}: packet {} to {:?}, tx {:.2} dB, rx {:.2} dB, distance {:.1}, delay {}",
                self.id,
                packet.uid(),
                transducer,
                tx_power_db,
                rx_power_db,
                sender.distance_to(&receiver),
                delay
            );
            scheduler.schedule_after(
                delay,
                Event::Deliver { transducer: *transducer, packet: packet.clone(), rx_power_db, mode: mode.id(), pdp },
            );
            scheduled += 1;
        }
        Ok(scheduled)
    }

    fn sub_channel_index(sub_channel: usize) -> Result<usize> {
        if sub_channel < SUB_CHANNEL_COUNT { Ok(sub_channel) } else { Err(MediumError::InvalidSubChannel(sub_channel)) }
    }

    /// Claim a sub-channel for transmission.
    ///
    /// # Returns
    ///
    /// `false` (and logs a warning) if the sub-channel is not idle.
    pub fn transmit_start(&mut self, packet: &Packet, sub_channel: usize) -> Result<bool> {
        let index = Self::sub_channel_index(sub_channel)?;
        if self.sub_channels[index] != SubChannelState::Idle {
            warn!("Channel {:?}: transmit start on sub-channel {} which is not idle", self.id, sub_channel);
            return Ok(false);
        }
        debug!("Channel {:?}: sub-channel {} transmitting packet {}", self.id, sub_channel, packet.uid());
        self.current_packet = Some(packet.clone());
        self.sub_channels[index] = SubChannelState::Transmitting;
        Ok(true)
    }

    /// Release a sub-channel claimed with [`Channel::transmit_start`].
    pub fn transmit_end(&mut self, sub_channel: usize) -> Result<()> {
        let index = Self::sub_channel_index(sub_channel)?;
        if self.sub_channels[index] != SubChannelState::Transmitting {
            return Err(MediumError::TransmitEndWithoutStart(sub_channel));
        }
        self.sub_channels[index] = SubChannelState::Idle;
        Ok(())
    }

    pub fn is_busy(&self, sub_channel: usize) -> Result<bool> {
        Ok(self.sub_channel_state(sub_channel)? != SubChannelState::Idle)
    }

    pub fn sub_channel_state(&self, sub_channel: usize) -> Result<SubChannelState> {
        Ok(self.sub_channels[Self::sub_channel_index(sub_channel)?])
    }

    /// Packet of the last successful [`Channel::transmit_start`].
    pub fn current_packet(&self) -> Option<&Packet> {
        self.current_packet.as_ref()
    }
}

fn node_position(nodes: &[Node], id: NodeId) -> Result<Position> {
    nodes.get(id.0).map(|n| n.position()).ok_or(MediumError::UnknownNode(id))
}
