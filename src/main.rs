// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "kinect-pipeline")]
#[command(about = "Decode Kinect v2 depth and color packets")]
#[command(version = kinect_pipeline::VERSION)]
struct Cli {
    /// JSON configuration file (defaults are used for missing fields)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the selected accelerators and available color decoders
    Info,

    /// Decode raw depth packets into IR and depth frames
    Depth {
        /// P0 tables command response as sent by the device
        #[arg(long)]
        p0: PathBuf,

        /// X geometry table (512x424 little-endian f32)
        #[arg(long = "xtable")]
        x_table: PathBuf,

        /// Z geometry table (512x424 little-endian f32)
        #[arg(long = "ztable")]
        z_table: PathBuf,

        /// 11-bit lookup table (2048 little-endian i16)
        #[arg(long)]
        lut: PathBuf,

        /// Raw depth packet files, processed in order
        #[arg(required = true)]
        packets: Vec<PathBuf>,
    },

    /// Decode compressed color packets
    Color {
        /// Compressed color packet files, processed in order
        #[arg(required = true)]
        packets: Vec<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=kinect_pipeline=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => cli::show_info(&config),
        Commands::Depth {
            p0,
            x_table,
            z_table,
            lut,
            packets,
        } => cli::decode_depth(
            &config,
            &cli::CalibrationFiles {
                p0,
                x_table,
                z_table,
                lut,
            },
            &packets,
        ),
        Commands::Color { packets } => cli::decode_color(&config, &packets),
    }
}
