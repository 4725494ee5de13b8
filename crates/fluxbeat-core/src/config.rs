//! Analysis configuration
//!
//! [`AnalysisConfig`] is the single source of truth for an engine instance.
//! It is supplied at construction, may be patched at runtime through
//! [`ConfigPatch`], and can be loaded from a TOML file:
//!
//! ```toml
//! fft_size = 2048
//! sample_rate = 44100.0
//! smoothing_factor = 0.8
//!
//! [bands.bass]
//! min_hz = 20.0
//! max_hz = 250.0
//! weight = 1.0
//!
//! [beat]
//! sensitivity = 1.2
//! ```

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Smallest FFT size accepted by the engine
pub const MIN_FFT_SIZE: usize = 512;
/// Largest FFT size accepted by the engine
pub const MAX_FFT_SIZE: usize = 32768;
/// Number of energy samples the beat detector needs before it can fire
pub const MIN_BEAT_SAMPLES: usize = 10;
/// Largest energy history the beat detector will allocate
pub const MAX_HISTORY_SIZE: usize = 4096;
/// Largest number of retained beat events
pub const MAX_BEAT_HISTORY_SIZE: usize = 1024;
/// Largest governor sample window
pub const MAX_SAMPLE_WINDOW: usize = 10_000;
/// Largest governor event channel
pub const MAX_EVENT_CAPACITY: usize = 65_536;

/// A named frequency range with a perceptual weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandDefinition {
    /// Lower bound in Hz (inclusive)
    pub min_hz: f32,
    /// Upper bound in Hz (inclusive)
    pub max_hz: f32,
    /// Weight applied to every bin of the band
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

impl BandDefinition {
    /// Create a band definition
    pub fn new(min_hz: f32, max_hz: f32, weight: f32) -> Self {
        Self {
            min_hz,
            max_hz,
            weight,
        }
    }

    /// True when `freq` lies within `[min_hz, max_hz]`
    #[inline]
    pub fn contains(&self, freq: f32) -> bool {
        freq >= self.min_hz && freq <= self.max_hz
    }
}

/// Tuning for the bass-energy beat detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Scales both threshold terms and the reported strength
    pub sensitivity: f32,
    /// Multiplier applied to the history's standard deviation
    ///
    /// Named after the historical "variance" term; the value it multiplies
    /// is the standard deviation of the energy history.
    pub variance_multiplier: f32,
    /// Energy a frame must exceed to count as a beat
    pub min_energy: f32,
    /// Refractory period between two beats
    pub min_beat_interval_ms: f64,
    /// Capacity of the energy ring buffer (~1s at 43 Hz)
    pub history_size: usize,
    /// Number of beat events retained for tempo estimation
    pub beat_history_size: usize,
    /// Fraction of the spectrum treated as the bass range
    pub bass_range_fraction: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            variance_multiplier: 1.5,
            min_energy: 0.05,
            min_beat_interval_ms: 300.0,
            history_size: 43,
            beat_history_size: 10,
            bass_range_fraction: 0.2,
        }
    }
}

/// How the spectral flux feature is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluxMode {
    /// Share of total energy held by the top 30% of bins (no frame memory)
    #[default]
    HighBandRatio,
    /// Half-wave rectified difference against the previous frame
    FrameDifference,
}

/// Tuning for the spectral shape analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Fraction of total energy that defines the rolloff point
    pub rolloff_fraction: f32,
    /// Flux computation strategy
    pub flux_mode: FluxMode,
    /// Number of mel output bins
    pub mel_bins: usize,
    /// Number of bark output bins
    pub bark_bins: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            rolloff_fraction: 0.9,
            flux_mode: FluxMode::HighBandRatio,
            mel_bins: 32,
            bark_bins: 24,
        }
    }
}

/// Time budget and hysteresis settings for the performance governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Per-call budget; exceeding it raises a warning
    pub target_ms: f64,
    /// Hard ceiling; sustained overruns degrade quality
    pub max_ms: f64,
    /// Minimum spacing between two quality reductions
    pub reduction_cooldown_ms: f64,
    /// Size of the rolling sample window
    pub sample_window: usize,
    /// Samples inspected for a degrade decision
    pub degrade_window: usize,
    /// Share of `degrade_window` samples that must exceed `max_ms`
    pub degrade_ratio: f32,
    /// Samples inspected for a restore decision
    pub restore_window: usize,
    /// Share of `restore_window` samples that must stay under `target_ms`
    pub restore_ratio: f32,
    /// Whether the governor may change quality on its own
    pub auto_adjust: bool,
    /// Capacity of the event channel
    pub event_capacity: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            target_ms: 2.0,
            max_ms: 5.0,
            reduction_cooldown_ms: 2000.0,
            sample_window: 100,
            degrade_window: 10,
            degrade_ratio: 0.7,
            restore_window: 20,
            restore_ratio: 0.9,
            auto_adjust: true,
            event_capacity: 64,
        }
    }
}

/// Complete configuration of an analysis engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// FFT size; snapshots carry `fft_size / 2` bins
    pub fft_size: usize,
    /// Sample rate of the analysed signal in Hz
    pub sample_rate: f32,
    /// Exponential smoothing factor for band energies
    pub smoothing_factor: f32,
    /// Named frequency bands
    pub bands: BTreeMap<String, BandDefinition>,
    /// Beat detector tuning
    pub beat: BeatConfig,
    /// Spectral analyzer tuning
    pub spectral: SpectralConfig,
    /// Performance governor tuning
    pub performance: GovernorConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            sample_rate: 44100.0,
            smoothing_factor: 0.8,
            bands: default_bands(),
            beat: BeatConfig::default(),
            spectral: SpectralConfig::default(),
            performance: GovernorConfig::default(),
        }
    }
}

/// The five perceptual bands used when no bands are configured
pub fn default_bands() -> BTreeMap<String, BandDefinition> {
    [
        ("bass", BandDefinition::new(20.0, 250.0, 1.0)),
        ("lowMid", BandDefinition::new(250.0, 500.0, 0.9)),
        ("mid", BandDefinition::new(500.0, 2000.0, 0.8)),
        ("highMid", BandDefinition::new(2000.0, 4000.0, 0.7)),
        ("treble", BandDefinition::new(4000.0, 20000.0, 0.6)),
    ]
    .into_iter()
    .map(|(name, band)| (name.to_string(), band))
    .collect()
}

impl AnalysisConfig {
    /// Number of bins in a snapshot for this configuration
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Parse a configuration from TOML and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check every field for values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(AnalysisError::config(format!(
                "fft_size must be a power of two in {}..={}, got {}",
                MIN_FFT_SIZE, MAX_FFT_SIZE, self.fft_size
            )));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(AnalysisError::config(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(AnalysisError::config(format!(
                "smoothing_factor must be within [0, 1], got {}",
                self.smoothing_factor
            )));
        }
        for (name, band) in &self.bands {
            validate_band(name, band)?;
        }

        let beat = &self.beat;
        if !(beat.sensitivity > 0.0) || !(beat.variance_multiplier >= 0.0) {
            return Err(AnalysisError::config(
                "beat sensitivity must be positive and variance_multiplier non-negative",
            ));
        }
        if !(MIN_BEAT_SAMPLES..=MAX_HISTORY_SIZE).contains(&beat.history_size) {
            return Err(AnalysisError::config(format!(
                "beat history_size must be within {}..={}, got {}",
                MIN_BEAT_SAMPLES, MAX_HISTORY_SIZE, beat.history_size
            )));
        }
        if !(1..=MAX_BEAT_HISTORY_SIZE).contains(&beat.beat_history_size) {
            return Err(AnalysisError::config(format!(
                "beat_history_size must be within 1..={}, got {}",
                MAX_BEAT_HISTORY_SIZE, beat.beat_history_size
            )));
        }
        if !beat.min_energy.is_finite() || beat.min_energy < 0.0 {
            return Err(AnalysisError::config(format!(
                "beat min_energy must be finite and non-negative, got {}",
                beat.min_energy
            )));
        }
        if !beat.min_beat_interval_ms.is_finite() || beat.min_beat_interval_ms < 0.0 {
            return Err(AnalysisError::config(format!(
                "min_beat_interval_ms must be finite and non-negative, got {}",
                beat.min_beat_interval_ms
            )));
        }
        if !(beat.bass_range_fraction > 0.0 && beat.bass_range_fraction <= 1.0) {
            return Err(AnalysisError::config(
                "bass_range_fraction must be within (0, 1]",
            ));
        }

        let spectral = &self.spectral;
        if !(spectral.rolloff_fraction > 0.0 && spectral.rolloff_fraction <= 1.0) {
            return Err(AnalysisError::config("rolloff_fraction must be within (0, 1]"));
        }
        let max_bins = self.bin_count();
        for (name, bins) in [("mel_bins", spectral.mel_bins), ("bark_bins", spectral.bark_bins)] {
            if !(1..=max_bins).contains(&bins) {
                return Err(AnalysisError::config(format!(
                    "{} must be within 1..={}, got {}",
                    name, max_bins, bins
                )));
            }
        }

        let perf = &self.performance;
        if !(perf.target_ms > 0.0) || !perf.max_ms.is_finite() || perf.max_ms < perf.target_ms {
            return Err(AnalysisError::config(format!(
                "performance budget must satisfy 0 < target_ms <= max_ms, got {} / {}",
                perf.target_ms, perf.max_ms
            )));
        }
        if !perf.reduction_cooldown_ms.is_finite() || perf.reduction_cooldown_ms < 0.0 {
            return Err(AnalysisError::config(format!(
                "reduction_cooldown_ms must be finite and non-negative, got {}",
                perf.reduction_cooldown_ms
            )));
        }
        if perf.degrade_window == 0 || perf.restore_window == 0 || perf.sample_window == 0 {
            return Err(AnalysisError::config("performance windows must be non-zero"));
        }
        if perf.sample_window > MAX_SAMPLE_WINDOW {
            return Err(AnalysisError::config(format!(
                "sample_window must be at most {}, got {}",
                MAX_SAMPLE_WINDOW, perf.sample_window
            )));
        }
        if perf.degrade_window > perf.sample_window || perf.restore_window > perf.sample_window
        {
            return Err(AnalysisError::config(
                "degrade/restore windows cannot exceed sample_window",
            ));
        }
        for ratio in [perf.degrade_ratio, perf.restore_ratio] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(AnalysisError::config(format!(
                    "performance ratios must be within (0, 1], got {}",
                    ratio
                )));
            }
        }
        if !(1..=MAX_EVENT_CAPACITY).contains(&perf.event_capacity) {
            return Err(AnalysisError::config(format!(
                "event_capacity must be within 1..={}, got {}",
                MAX_EVENT_CAPACITY, perf.event_capacity
            )));
        }

        Ok(())
    }
}

fn validate_band(name: &str, band: &BandDefinition) -> Result<()> {
    if !band.min_hz.is_finite() || !band.max_hz.is_finite() || band.min_hz < 0.0 {
        return Err(AnalysisError::config(format!(
            "band `{}` has invalid bounds {}..{}",
            name, band.min_hz, band.max_hz
        )));
    }
    if band.min_hz >= band.max_hz {
        return Err(AnalysisError::config(format!(
            "band `{}` must satisfy min_hz < max_hz, got {}..{}",
            name, band.min_hz, band.max_hz
        )));
    }
    if !band.weight.is_finite() || band.weight < 0.0 {
        return Err(AnalysisError::config(format!(
            "band `{}` has invalid weight {}",
            name, band.weight
        )));
    }
    Ok(())
}

/// Partial configuration update; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    /// New FFT size
    pub fft_size: Option<usize>,
    /// New sample rate
    pub sample_rate: Option<f32>,
    /// New smoothing factor
    pub smoothing_factor: Option<f32>,
    /// Replacement band table
    pub bands: Option<BTreeMap<String, BandDefinition>>,
    /// Replacement beat tuning
    pub beat: Option<BeatConfig>,
    /// Replacement spectral tuning
    pub spectral: Option<SpectralConfig>,
    /// Replacement governor tuning
    pub performance: Option<GovernorConfig>,
}

impl ConfigPatch {
    /// Merge the patch over `base`, validating the result
    pub fn apply_to(&self, base: &AnalysisConfig) -> Result<AnalysisConfig> {
        let mut next = base.clone();
        if let Some(fft_size) = self.fft_size {
            next.fft_size = fft_size;
        }
        if let Some(sample_rate) = self.sample_rate {
            next.sample_rate = sample_rate;
        }
        if let Some(smoothing) = self.smoothing_factor {
            next.smoothing_factor = smoothing;
        }
        if let Some(bands) = &self.bands {
            next.bands = bands.clone();
        }
        if let Some(beat) = &self.beat {
            next.beat = beat.clone();
        }
        if let Some(spectral) = &self.spectral {
            next.spectral = spectral.clone();
        }
        if let Some(performance) = &self.performance {
            next.performance = performance.clone();
        }
        next.validate()?;
        Ok(next)
    }

    /// True when the patch touches anything the bin map depends on
    pub fn affects_bins(&self) -> bool {
        self.fft_size.is_some() || self.sample_rate.is_some() || self.bands.is_some()
    }
}

impl From<AnalysisConfig> for ConfigPatch {
    fn from(config: AnalysisConfig) -> Self {
        Self {
            fft_size: Some(config.fft_size),
            sample_rate: Some(config.sample_rate),
            smoothing_factor: Some(config.smoothing_factor),
            bands: Some(config.bands),
            beat: Some(config.beat),
            spectral: Some(config.spectral),
            performance: Some(config.performance),
        }
    }
}
