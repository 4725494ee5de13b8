//! FluxBeat command line front end
//!
//! `analyze` runs a recorded snapshot file through the engine and prints
//! one JSON result per line; `serve` speaks the backend protocol over
//! stdin/stdout.

mod cli;
mod logging_setup;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use fluxbeat_core::backend::handle_json;
use fluxbeat_core::logging::LogConfig;
use fluxbeat_core::{AnalysisBackend, AnalysisConfig, FallbackBackend, InProcessBackend};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

/// One line of a snapshot file
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotLine {
    Bare(Vec<u8>),
    Full {
        magnitudes: Vec<u8>,
        #[serde(default)]
        time_data: Option<Vec<u8>>,
        #[serde(default)]
        timestamp_ms: Option<f64>,
    },
}

fn make_backend(offload: bool) -> Box<dyn AnalysisBackend> {
    if offload {
        Box::new(FallbackBackend::new())
    } else {
        Box::new(InProcessBackend::new())
    }
}

fn analyze(input: &Path, config: Option<&Path>, fps: f64, offload: bool) -> Result<()> {
    let config = match config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => AnalysisConfig::default(),
    };
    let frame_ms = if fps > 0.0 { 1000.0 / fps } else { 1000.0 / 60.0 };

    let mut backend = make_backend(offload);
    backend.initialize(config)?;
    info!("Analyzing {:?} on {} backend", input, backend.name());

    let file = std::fs::File::open(input).with_context(|| format!("Failed to open {:?}", input))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut frames = 0usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context("Failed to read snapshot file")?;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot: SnapshotLine = match serde_json::from_str(&line) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Skipping line {}: {}", index + 1, e);
                continue;
            }
        };
        let (magnitudes, time_data, timestamp_ms) = match snapshot {
            SnapshotLine::Bare(magnitudes) => (magnitudes, None, None),
            SnapshotLine::Full {
                magnitudes,
                time_data,
                timestamp_ms,
            } => (magnitudes, time_data, timestamp_ms),
        };
        let timestamp_ms = timestamp_ms.unwrap_or(frames as f64 * frame_ms);

        let result = backend.process(magnitudes, time_data, Some(timestamp_ms))?;
        writeln!(out, "{}", serde_json::to_string(&result)?)?;
        frames += 1;
    }
    out.flush()?;

    let stats = backend.stats()?;
    info!(
        "Analyzed {} frames: avg {:.3}ms, max {:.3}ms, stage {:?}",
        frames, stats.average_ms, stats.max_ms, stats.stage
    );
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn serve(offload: bool) -> Result<()> {
    let mut backend = make_backend(offload);
    info!("Serving analysis requests on {} backend", backend.name());

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read request")?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_json(backend.as_mut(), &line)?;
        writeln!(out, "{}", reply)?;
        out.flush()?;
    }
    info!("Input closed, shutting down");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig {
        level: cli.log_level.clone(),
        ..LogConfig::default()
    };
    if let Some(dir) = &cli.log_dir {
        log_config.file_output = true;
        log_config.log_dir = dir.clone();
    }
    let _log_guard = logging_setup::init(&log_config)?;

    match cli.command {
        Command::Analyze {
            input,
            config,
            fps,
            offload,
        } => analyze(&input, config.as_deref(), fps, offload),
        Command::Serve { offload } => serve(offload),
    }
}
