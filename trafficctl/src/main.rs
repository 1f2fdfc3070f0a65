// Traffic RL control CLI
// Train, evaluate, and demo the DQN traffic signal controller

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "trafficctl")]
#[command(about = "DQN traffic signal controller", version)]
struct Cli {
    /// What to do
    #[arg(value_enum)]
    mode: Mode,

    /// ID of the network stack to use
    #[arg(long = "arch", default_value = "v1")]
    arch: String,

    /// Load the saved networks and continue training
    #[arg(short = 'c', long = "continue")]
    load_nets: bool,

    /// Save the networks after every training episode
    #[arg(short, long)]
    save: bool,

    /// Number of episodes sampled during training
    #[arg(short, long, default_value_t = 1)]
    episodes: usize,

    /// Paths of observation images, and/or directories of images, to
    /// test the agent on
    #[arg(long, num_args = 1..)]
    images: Vec<PathBuf>,

    /// Directory holding the network checkpoints
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Full training loop against the configured simulator
    Train,
    /// Training loop against the scripted simulator, nothing persisted
    DryRun,
    /// Run saved networks over observation images
    Eval,
    /// Greedy policy rollout without learning
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Train => commands::train(&cli, false).await?,
        Mode::DryRun => commands::train(&cli, true).await?,
        Mode::Eval => commands::eval(&cli).await?,
        Mode::Demo => commands::demo(&cli).await?,
    }

    Ok(())
}
