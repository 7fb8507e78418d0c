//! Shared wireless medium simulation core.
//!
//! This module models a lossy broadcast medium driven by a discrete-event
//! scheduler. It integrates:
//! - Transmission modes and power delay profiles
//! - Propagation (path loss, delay, multipath) and ambient noise models
//! - A channel fanning transmissions out to every endpoint
//! - Half-duplex transducers tracking overlapping arrivals
//! - Pluggable SINR and packet error models
//! - The PHY receiver state machine and its multi-mode composite
//!
//! ## Module Organization
//!
//! - `types`: Virtual time, typed ids, packets and state enums
//! - `error`: Contract violations (`MediumError`)
//! - `tx_mode`: Transmission modes, registry and per-PHY mode lists
//! - `pdp`: Power delay profiles
//! - `geometry`: Positions and distances
//! - `signal_calculations`: dB/linear power helpers
//! - `propagation`, `noise`: Channel models
//! - `sinr`, `error_model`: Reception strategies
//! - `scheduler`: Event queue and clock
//! - `transducer`, `channel`, `phy`, `multi_phy`: Medium components
//! - `network`: Arena owning all components and running the event loop
//! - `scenario`: Gateway experiment driven by a scene file
//!
//! ## Public API
//!
//! Build a `Network`, add nodes, channels, transducers and PHYs, send packets
//! and call `run`. `run_scene` does all of this from a `Scene`.

pub mod channel;
pub mod error;
pub mod error_model;
pub mod geometry;
pub mod multi_phy;
pub mod network;
pub mod noise;
pub mod pdp;
pub mod phy;
pub mod propagation;
pub mod scenario;
pub mod scheduler;
pub mod signal_calculations;
pub mod sinr;
pub mod transducer;
pub mod tx_mode;
pub mod types;

// Re-export commonly used types
pub use error::{MediumError, Result};
pub use geometry::Position;
pub use network::{Network, Node};
pub use phy::{PhyConfig, PhyListener, PhyReceiver, PhySetup, PhyTrace};
pub use scenario::{ScenarioReport, run_scene};
pub use tx_mode::{ModeId, ModeRegistry, ModeSpec, ModesList, ModulationType, TxMode};
pub use types::{Packet, PhyState, SimTime};
