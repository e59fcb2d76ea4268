// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "frame-provider")]
#[command(about = "Frame acquisition and relay for V4L2 infrared cameras")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: ~/.config/frame-provider/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices and their selected format
    List {
        /// Use a simulated device instead of V4L2
        #[arg(long)]
        simulate: bool,
    },

    /// Run a capture session and print statistics
    Capture {
        /// Device to open (default: /dev/video0, or sim0 with --simulate)
        #[arg(short, long)]
        device: Option<String>,

        /// Capture duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Use a simulated device instead of V4L2
        #[arg(long)]
        simulate: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=frame_provider=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { simulate } => cli::list_devices(cli.config, simulate),
        Commands::Capture {
            device,
            seconds,
            simulate,
        } => cli::capture(device, seconds, cli.config, simulate),
        Commands::Config => cli::show_config(cli.config),
    }
}
