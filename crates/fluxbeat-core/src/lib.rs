//! FluxBeat Core - Real-time Audio Feature Extraction
//!
//! This crate turns byte-valued magnitude snapshots into:
//! - Smoothed perceptual band energies
//! - Beat events with strength, confidence and tempo
//! - Spectral shape features (centroid, rolloff, flux, flatness, mel/bark)
//! - A self-adapting quality governor that keeps per-frame cost in budget
//!
//! [`AnalysisEngine`] owns all state; [`backend`] runs it in-process or on a
//! worker thread behind one message protocol.

#![warn(missing_docs)]

pub mod backend;
pub mod bands;
pub mod beat;
pub mod bins;
pub mod config;
pub mod engine;
pub mod error;
pub mod governor;
pub mod logging;
pub mod spectral;

// --- Re-exports grouped by category ---

// Configuration
pub use config::{
    AnalysisConfig, BandDefinition, BeatConfig, ConfigPatch, FluxMode, GovernorConfig,
    SpectralConfig,
};

// Analysis Components
pub use bands::{BandEnergies, BandEnergyExtractor};
pub use beat::{BeatDetection, BeatDetector, BeatEvent, DetectorState, EnergyHistory};
pub use bins::{compute_bins, FrequencyBinMap, FrequencyBinMapper};
pub use spectral::{SpectralFeatureAnalyzer, SpectralFeatures};

// Engine & Performance
pub use engine::{AnalysisEngine, AnalysisResult, BeatState, SignalLevels};
pub use governor::{
    GovernorEvent, PerformanceGovernor, PerformanceStats, QualitySettings, QualityStage,
};

// Backends & Protocol
pub use backend::{
    AnalysisBackend, FallbackBackend, InProcessBackend, Request, Response, WorkerBackend,
};

// Errors & Logging
pub use error::{AnalysisError, Result};
pub use logging::LogConfig;
