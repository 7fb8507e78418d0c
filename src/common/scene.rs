//! Scene loading, parsing, and validation logic.
//!
//! A scene describes one run of the medium: the propagation and noise models,
//! the transmission modes, PHY defaults, a gateway and a set of end devices
//! around it, and the traffic they generate. Scenes are JSON or TOML, picked by
//! file extension.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::simulation::error_model::PerModelConfig;
use crate::simulation::geometry::Position;
use crate::simulation::noise::NoiseConfig;
use crate::simulation::phy::PhyConfig;
use crate::simulation::propagation::PropagationConfig;
use crate::simulation::sinr::SinrModelConfig;
use crate::simulation::tx_mode::ModeSpec;

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse scene: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// On-disk scene format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFormat {
    Json,
    Toml,
}

impl SceneFormat {
    /// `.toml` files are TOML, everything else is read as JSON.
    pub fn from_path(path: &str) -> Self {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => SceneFormat::Toml,
            _ => SceneFormat::Json,
        }
    }
}

/// The receiving gateway every end device talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySpec {
    pub position: Position,
}

/// End device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub node_id: u32,
    pub position: Position,
    /// Name of the mode the node transmits in. Without one, nodes rotate
    /// through the scene's modes by their position in the node list.
    #[serde(default)]
    pub mode: Option<String>,
}

fn default_packets_per_node() -> u32 {
    1
}

fn default_mean_interval() -> f64 {
    10.0
}

/// Traffic generated by every end device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSpec {
    pub packet_size_bytes: usize,
    #[serde(default = "default_packets_per_node")]
    pub packets_per_node: u32,
    /// First packets start uniformly at random within this window (seconds).
    #[serde(default)]
    pub start_window_secs: f64,
    /// Mean of the exponential gap between consecutive packets of a node (seconds).
    #[serde(default = "default_mean_interval")]
    pub mean_interval_secs: f64,
}

/// Root structure representing the entire scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Seed of every random stream of the run.
    #[serde(default)]
    pub seed: u64,
    /// Simulated time to run for, in seconds.
    pub duration_secs: f64,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    pub modes: Vec<ModeSpec>,
    /// Thresholds and powers shared by every PHY.
    #[serde(default)]
    pub phy: PhyConfig,
    #[serde(default)]
    pub sinr_model: SinrModelConfig,
    #[serde(default)]
    pub per_model: PerModelConfig,
    pub gateway: GatewaySpec,
    pub nodes: Vec<NodeSpec>,
    pub traffic: TrafficSpec,
}

impl Scene {
    /// Index into `modes` of the mode node number `index` transmits in.
    pub fn node_mode_index(&self, index: usize) -> Option<usize> {
        let node = self.nodes.get(index)?;
        match &node.mode {
            Some(name) => self.modes.iter().position(|m| &m.name == name),
            None if self.modes.is_empty() => None,
            None => Some(index % self.modes.len()),
        }
    }
}

/// Load, parse and validate a scene from a file.
///
/// # Parameters
///
/// * `path` - Path to the scene file (`.json` or `.toml`)
///
/// # Returns
///
/// Parsed and validated Scene or an error.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;

    parse_scene(&data, SceneFormat::from_path(path))
}

/// Parse and validate a scene held in memory.
pub fn parse_scene(data: &str, format: SceneFormat) -> Result<Scene, SceneLoadError> {
    let scene: Scene = match format {
        SceneFormat::Json => serde_json::from_str(data)
            .context("Invalid JSON format")
            .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?,
        SceneFormat::Toml => toml::from_str(data)
            .context("Invalid TOML format")
            .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?,
    };

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Validate scene configuration.
///
/// Rejects inputs that would make the run meaningless or break a contract
/// of the medium:
/// - Empty or oversized node lists, duplicate node IDs
/// - Missing modes, duplicate mode names, zero rates or bandwidths
/// - Nodes referencing an unknown mode
/// - Negative or non-finite durations and traffic timings
/// - Non-positive propagation speed
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_NODES: usize = 10000;

    // Check node count
    if scene.nodes.is_empty() {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.nodes.len(), MAX_NODES));
    }

    // Check for duplicate node IDs
    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
    }

    if scene.modes.is_empty() {
        return Err("Scene must define at least one transmission mode".to_string());
    }
    let mut mode_names = HashSet::new();
    for mode in &scene.modes {
        if !mode_names.insert(mode.name.as_str()) {
            return Err(format!("Duplicate mode name found: {}", mode.name));
        }
        if mode.data_rate_bps == 0 {
            return Err(format!("Mode {} has invalid data_rate_bps, must be positive", mode.name));
        }
        if mode.phy_rate_sps == 0 {
            return Err(format!("Mode {} has invalid phy_rate_sps, must be positive", mode.name));
        }
        if mode.bandwidth_hz == 0 {
            return Err(format!("Mode {} has invalid bandwidth_hz, must be positive", mode.name));
        }
    }

    for node in &scene.nodes {
        if let Some(name) = &node.mode {
            if !mode_names.contains(name.as_str()) {
                return Err(format!("Node {} references unknown mode {}", node.node_id, name));
            }
        }
    }

    if !scene.duration_secs.is_finite() || scene.duration_secs < 0.0 {
        return Err(format!("Invalid duration_secs {}, must be non-negative", scene.duration_secs));
    }

    let traffic = &scene.traffic;
    if traffic.packet_size_bytes == 0 {
        return Err("Invalid packet_size_bytes, must be positive".to_string());
    }
    if !traffic.start_window_secs.is_finite() || traffic.start_window_secs < 0.0 {
        return Err(format!("Invalid start_window_secs {}, must be non-negative", traffic.start_window_secs));
    }
    if !traffic.mean_interval_secs.is_finite() || traffic.mean_interval_secs <= 0.0 {
        return Err(format!("Invalid mean_interval_secs {}, must be positive", traffic.mean_interval_secs));
    }

    let speed = match scene.propagation {
        PropagationConfig::Ideal { propagation_speed } => propagation_speed,
        PropagationConfig::Thorp { propagation_speed, .. } => propagation_speed,
    };
    if speed <= 0.0 {
        return Err(format!("Invalid propagation_speed {}, must be positive", speed));
    }

    Ok(())
}
