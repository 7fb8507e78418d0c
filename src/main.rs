use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};

use radio_medium_simulator::common::scene::load_scene;
use radio_medium_simulator::simulation::run_scene;

/// Run a gateway scenario over the shared wireless medium
#[derive(Parser, Debug)]
#[command(name = "radio-medium-simulator")]
#[command(version, about, long_about = None)]
struct Args {
    /// Scene file (.json or .toml)
    scene: PathBuf,

    /// Override the seed stored in the scene
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("radio_medium_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let scene_path = args.scene.to_string_lossy();
    info!("Loading scene: {}", scene_path);
    let mut scene = load_scene(&scene_path).with_context(|| format!("Failed to load scene {}", scene_path))?;
    if let Some(seed) = args.seed {
        scene.seed = seed;
    }

    let report = run_scene(&scene).context("Scenario failed")?;

    info!(
        "Finished at {} after {} events: sent {}, received {}, corrupted {}, dropped at sender {}, delivery ratio {:.3}",
        report.end_time,
        report.events,
        report.sent(),
        report.received(),
        report.corrupted(),
        report.dropped_tx,
        report.delivery_ratio()
    );
    for mode in &report.modes {
        match mode.mean_sinr_db() {
            Some(sinr) => info!(
                "  {}: sent {}, received {}, corrupted {}, mean SINR {:.2} dB",
                mode.name, mode.sent, mode.received, mode.corrupted, sinr
            ),
            None => info!("  {}: sent {}, received {}, corrupted {}", mode.name, mode.sent, mode.received, mode.corrupted),
        }
    }
    Ok(())
}
