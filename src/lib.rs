//! Discrete-event simulator of a shared, lossy wireless medium.

pub mod common;
pub mod simulation;
