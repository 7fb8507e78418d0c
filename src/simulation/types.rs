//! Type definitions shared across the simulation.
//!
//! Contains:
//! - Virtual time (`SimTime`) with nanosecond resolution
//! - Typed arena indices for nodes, channels, transducers, PHYs and arrivals
//! - The opaque `Packet` payload carried over the medium
//! - PHY, transducer and sub-channel state enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Point on the virtual clock, stored as nanoseconds since the start of the run.
///
/// Arithmetic saturates: adding an unbounded airtime (zero data rate) yields
/// `SimTime::MAX` instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        SimTime(nanos)
    }

    pub const fn from_micros(micros: u64) -> Self {
        SimTime(micros.saturating_mul(1_000))
    }

    pub const fn from_millis(millis: u64) -> Self {
        SimTime(millis.saturating_mul(1_000_000))
    }

    /// Convert seconds to the nearest nanosecond. Negative and NaN inputs map to zero,
    /// infinite inputs saturate.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_nan() || secs <= 0.0 {
            return SimTime::ZERO;
        }
        // float to int casts saturate
        SimTime((secs * 1e9).round() as u64)
    }

    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub const fn saturating_sub(self, other: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(other.0))
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

/// Index of a node (a positioned device) inside the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Index of a channel inside the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub usize);

/// Index of a transducer inside the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransducerId(pub usize);

/// Index of a PHY inside the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhyId(pub usize);

/// Index of a composite multi-mode PHY inside the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MultiPhyId(pub usize);

/// Identity of one delivered copy of a packet at one transducer.
///
/// Copies of a packet share the packet uid, so the arrival id is what tells two
/// overlapping deliveries apart (stale end-of-reception checks, self exclusion in SINR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArrivalId(pub u64);

/// Opaque payload carried over the medium.
///
/// Only the byte size matters to the physical layer. Headers are pushed to and
/// popped from the front of the buffer by upper layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    uid: u64,
    data: Vec<u8>,
}

impl Packet {
    /// Zero-filled packet of `size` bytes.
    pub fn new(uid: u64, size: usize) -> Self {
        Packet { uid, data: vec![0; size] }
    }

    pub fn from_bytes(uid: u64, data: Vec<u8>) -> Self {
        Packet { uid, data }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn push_header(&mut self, header: &[u8]) {
        self.data.splice(0..0, header.iter().copied());
    }

    pub fn peek_header(&self, len: usize) -> Option<&[u8]> {
        self.data.get(..len)
    }

    pub fn pop_header(&mut self, len: usize) -> Option<Vec<u8>> {
        if len > self.data.len() {
            return None;
        }
        Some(self.data.drain(..len).collect())
    }
}

/// Receiver state of a PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhyState {
    Idle,
    /// Locked onto one arrival.
    Rx,
    Tx,
    /// Medium sensed busy, nothing being decoded.
    CcaBusy,
    Sleep,
}

impl fmt::Display for PhyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhyState::Idle => "IDLE",
            PhyState::Rx => "RX",
            PhyState::Tx => "TX",
            PhyState::CcaBusy => "CCABUSY",
            PhyState::Sleep => "SLEEP",
        };
        f.write_str(name)
    }
}

/// Half-duplex state of a transducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransducerState {
    Tx,
    Rx,
}

/// Advisory state of one channel sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubChannelState {
    Idle,
    Transmitting,
    Propagating,
}
