use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hydrocell_fluids::config::SimulationConfig;

mod run;

#[derive(Parser)]
#[command(version, about = "Voxel grid FLIP fluid simulation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a simulation, optionally recording every frame.
    Run {
        /// TOML scene description. Defaults to a dam break.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory to record frames into. Must not exist yet.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, default_value_t = 600)]
        frames: u64,
        #[arg(long, default_value_t = 60)]
        fps: u32,
        /// Overrides the time step of the configuration.
        #[arg(long)]
        dt: Option<f32>,
        /// Overrides the occupancy threshold of the configuration.
        #[arg(long)]
        occupancy_threshold: Option<u32>,
    },
    /// Print a summary of every frame of a recording.
    Inspect {
        path: PathBuf,
    },
    /// Print the default configuration as TOML.
    Config,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SimulationConfig> {
    let Some(path) = path else {
        return Ok(SimulationConfig::default());
    };

    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let config = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    log::info!("loaded configuration from {}", path.display());
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Run {
            config,
            output,
            frames,
            fps,
            dt,
            occupancy_threshold,
        } => {
            let mut config = load_config(config)?;
            if let Some(dt) = dt {
                config.dt = dt;
            }
            if let Some(threshold) = occupancy_threshold {
                config.occupancy_threshold = threshold;
            }

            run::run(&config, output, frames, fps)
        }
        Command::Inspect { path } => run::inspect(path),
        Command::Config => {
            print!("{}", toml::to_string_pretty(&SimulationConfig::default())?);
            Ok(())
        }
    }
}
