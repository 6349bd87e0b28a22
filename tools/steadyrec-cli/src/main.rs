//! SteadyRec CLI: command-line front end for the capture engine.
//!
//! Usage:
//!   steadyrec record [OPTIONS]    Record with the synthetic pipeline
//!   steadyrec check               Show power, storage, and orphan status
//!   steadyrec orphans [--delete]  List or remove interrupted recordings
//!   steadyrec config [OPTIONS]    Show or update the saved configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use steadyrec_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "steadyrec",
    about = "Frame-paced screen recording engine",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the standard location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session using the synthetic capture pipeline
    Record {
        /// Target FPS (30 or 60)
        #[arg(long)]
        fps: Option<u32>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop automatically after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Pause this many seconds into the recording
        #[arg(long, requires = "pause_for")]
        pause_after: Option<f64>,

        /// How long to stay paused
        #[arg(long, requires = "pause_after")]
        pause_for: Option<f64>,

        /// Record silence instead of the test tone
        #[arg(long)]
        mute: bool,

        /// Maximum capture timing jitter in milliseconds
        #[arg(long, default_value = "0")]
        jitter_ms: u64,

        /// Print telemetry as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Check power state and storage
    Check,

    /// List recordings left behind by an interrupted session
    Orphans {
        /// Delete them instead of listing
        #[arg(long)]
        delete: bool,
    },

    /// Show or update the saved configuration
    Config {
        /// Default recording FPS
        #[arg(long)]
        fps: Option<u32>,

        /// Default output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    steadyrec_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record {
            fps,
            output,
            duration,
            pause_after,
            pause_for,
            mute,
            jitter_ms,
            json,
        } => {
            commands::record::run(
                config,
                commands::record::RecordOptions {
                    fps,
                    output,
                    duration,
                    pause: pause_after.zip(pause_for),
                    mute,
                    jitter_ms,
                    json,
                },
            )
            .await
        }
        Commands::Check => commands::check::run(&config),
        Commands::Orphans { delete } => commands::orphans::run(&config, delete),
        Commands::Config { fps, output_dir } => {
            commands::config::run(config, cli.config, fps, output_dir)
        }
    }
}
