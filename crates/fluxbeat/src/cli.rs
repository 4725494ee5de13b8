use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fluxbeat", about = "Real-time audio band, beat and spectral analysis")]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also write logs to a file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze recorded magnitude snapshots (one JSON value per line)
    Analyze {
        /// Snapshot file; each line is a byte array or
        /// {"magnitudes": [...], "time_data": [...], "timestamp_ms": ...}
        input: PathBuf,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Frame rate used to timestamp snapshots without one
        #[arg(long, default_value_t = 60.0)]
        fps: f64,

        /// Run analysis on a worker thread
        #[arg(long)]
        offload: bool,
    },
    /// Answer protocol requests read as JSON lines on stdin
    Serve {
        /// Run analysis on a worker thread
        #[arg(long)]
        offload: bool,
    },
}
