//! Contract violations raised by the medium.
//!
//! Operational outcomes (dropped frames, failed decodes, busy medium) are state
//! transitions and callbacks, never errors. Everything in `MediumError` means the
//! caller broke an API contract; the event loop aborts the run when a handler
//! returns one.

use thiserror::Error;

use super::tx_mode::ModeId;
use super::types::{ChannelId, MultiPhyId, NodeId, PhyId, TransducerId};

/// Medium contract violations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MediumError {
    /// Mode id never registered.
    #[error("Transmission mode {0:?} is not registered")]
    UnknownMode(ModeId),

    /// Mode name never registered.
    #[error("No transmission mode named \"{0}\" is registered")]
    UnknownModeName(String),

    /// A PHY was asked for a mode index past the end of its mode list.
    #[error("Mode index {index} out of range ({count} modes supported)")]
    ModeIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of modes the PHY supports.
        count: usize,
    },

    /// Transmit from a transducer that never joined the channel.
    #[error("Transducer {transducer:?} is not registered on channel {channel:?}")]
    UnregisteredTransducer { transducer: TransducerId, channel: ChannelId },

    /// The transducer has no channel to transmit on or sense noise from.
    #[error("Transducer {0:?} is not attached to any channel")]
    DetachedTransducer(TransducerId),

    #[error("Sub-channel {0} out of range")]
    InvalidSubChannel(usize),

    #[error("Transmit end on sub-channel {0} without a matching transmit start")]
    TransmitEndWithoutStart(usize),

    #[error("Power delay profile tap {index} out of range ({len} taps)")]
    TapOutOfRange { index: usize, len: usize },

    /// A zero-resolution profile is an impulse and may only hold one tap.
    #[error("Zero-resolution power delay profile must hold exactly one tap, got {0}")]
    InvalidImpulseProfile(usize),

    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("Unknown channel {0:?}")]
    UnknownChannel(ChannelId),

    #[error("Unknown transducer {0:?}")]
    UnknownTransducer(TransducerId),

    #[error("Unknown PHY {0:?}")]
    UnknownPhy(PhyId),

    #[error("Unknown multi-mode PHY {0:?}")]
    UnknownMultiPhy(MultiPhyId),

    /// Raised by scheduled callbacks that want to abort the run.
    #[error("Scheduled callback failed: {0}")]
    Callback(String),
}

pub type Result<T> = std::result::Result<T, MediumError>;
