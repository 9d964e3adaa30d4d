//! Montage CLI: export timelines and inspect media from the command line.
//!
//! Usage:
//!   montage export <TIMELINE>           Render a timeline snapshot to video
//!   montage probe <FILE>                Show duration and streams
//!   montage thumbnail <FILE>            Extract a first-frame thumbnail
//!   montage extract-audio <FILE>        Extract one audio stream to WAV
//!   montage check                       Check encoder and prober availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use montage_common::config::AppConfig;
use montage_timeline_model::Preset;

mod commands;

#[derive(Parser)]
#[command(
    name = "montage",
    about = "Timeline export and media tools for the Montage editor",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a timeline snapshot to a single video file
    Export {
        /// Timeline JSON (`{"clips": [...]}` or a bare clip array)
        timeline: PathBuf,

        /// Output file path
        #[arg(short, long, default_value = "export.mp4")]
        output: PathBuf,

        /// Quality preset: normal, smooth, hq, discord, custom
        #[arg(short, long, default_value = "normal")]
        preset: Preset,

        /// Output width (defaults to the preset's)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to the preset's)
        #[arg(long)]
        height: Option<u32>,

        /// Output frame rate, fractional rates allowed (defaults to the preset's)
        #[arg(long)]
        fps: Option<f64>,

        /// Target file size in MiB; overrides --crf and the preset bitrate
        #[arg(long)]
        target_mb: Option<f64>,

        /// Constant-quality factor (0-51)
        #[arg(long)]
        crf: Option<u8>,

        /// Print events as JSON lines instead of a progress line
        #[arg(long)]
        json: bool,
    },

    /// Probe a media file
    Probe {
        file: PathBuf,

        /// Print the probe result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract the first frame as a small JPEG
    Thumbnail {
        file: PathBuf,

        /// Directory the thumbnail is written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Extract one audio stream to 48 kHz stereo WAV
    ExtractAudio {
        file: PathBuf,

        /// Container stream index (as reported by `montage probe`)
        #[arg(short, long)]
        stream: u32,

        /// Directory the WAV is written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Check that the encoder and prober can run
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.json_logs;
    montage_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            timeline,
            output,
            preset,
            width,
            height,
            fps,
            target_mb,
            crf,
            json,
        } => {
            let args = commands::export::ExportArgs {
                timeline,
                output,
                preset,
                width,
                height,
                fps,
                target_mb,
                crf,
                json,
            };
            commands::export::run(config, args).await
        }
        Commands::Probe { file, json } => commands::probe::run(&config, file, json).await,
        Commands::Thumbnail { file, output_dir } => {
            commands::thumbnail::run(&config, file, output_dir).await
        }
        Commands::ExtractAudio {
            file,
            stream,
            output_dir,
        } => commands::extract_audio::run(&config, file, stream, output_dir).await,
        Commands::Check => commands::check::run(&config).await,
    }
}
