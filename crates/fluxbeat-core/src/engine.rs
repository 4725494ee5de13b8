//! Analysis engine
//!
//! Owns the configuration and every stateful component, and runs one
//! snapshot through bands, beat detection and spectral analysis per call.
//! Each stage is timed by the [`PerformanceGovernor`], whose current
//! [`QualitySettings`] gate what the next frame computes.

use crate::bands::BandEnergyExtractor;
use crate::beat::{BeatDetector, BeatEvent, DetectorState};
use crate::bins::{FrequencyBinMap, FrequencyBinMapper};
use crate::config::{AnalysisConfig, ConfigPatch};
use crate::error::Result;
use crate::governor::{
    GovernorEvent, PerformanceGovernor, PerformanceStats, QualitySettings, QualityStage,
};
use crate::spectral::{decimate, SpectralFeatureAnalyzer, SpectralFeatures};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Waveform levels derived from time-domain bytes centred on 128
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalLevels {
    /// Root mean square amplitude in [0, 1]
    pub rms: f32,
    /// Absolute peak amplitude in [0, 1]
    pub peak: f32,
}

impl SignalLevels {
    /// Measure a byte waveform; `None` when it is empty
    pub fn from_time_data(time_data: &[u8]) -> Option<Self> {
        if time_data.is_empty() {
            return None;
        }
        let mut sum_sq = 0.0f32;
        let mut peak = 0.0f32;
        for &b in time_data {
            let sample = (b as f32 - 128.0) / 128.0;
            sum_sq += sample * sample;
            peak = peak.max(sample.abs());
        }
        Some(Self {
            rms: (sum_sq / time_data.len() as f32).sqrt().clamp(0.0, 1.0),
            peak: peak.clamp(0.0, 1.0),
        })
    }
}

/// Detector readings reported every frame, beat or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatState {
    /// Instantaneous bass energy
    pub energy: f32,
    /// Mean of the energy history
    pub avg_energy: f32,
    /// Threshold the energy had to exceed
    pub threshold: f32,
    /// Current tempo estimate
    pub bpm: f32,
    /// Detector warm-up state
    pub state: DetectorState,
    /// False when the governor has switched beat detection off
    pub enabled: bool,
}

/// Everything computed for one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Caller-supplied frame time
    pub timestamp_ms: f64,
    /// Smoothed per-band energies
    pub band_energies: BTreeMap<String, f32>,
    /// Unsmoothed per-band energies
    pub raw_band_energies: BTreeMap<String, f32>,
    /// Smoothed overall level
    pub overall_energy: f32,
    /// Unsmoothed overall level
    pub raw_overall_energy: f32,
    /// The beat that fired on this frame, if any
    pub beat: Option<BeatEvent>,
    /// Detector readings for this frame
    pub beat_state: BeatState,
    /// Spectral shape features
    pub spectral: SpectralFeatures,
    /// Waveform levels when time-domain data was supplied
    pub levels: Option<SignalLevels>,
    /// Wall time spent in [`AnalysisEngine::process`]
    pub analysis_time_ms: f64,
    /// Quality stage after this frame was recorded
    pub quality_stage: QualityStage,
}

/// Single owner of all analysis state
#[derive(Debug)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    mapper: FrequencyBinMapper,
    extractor: BandEnergyExtractor,
    detector: BeatDetector,
    spectral: SpectralFeatureAnalyzer,
    governor: PerformanceGovernor,
    repaired_frames: u64,
}

impl AnalysisEngine {
    /// Build an engine, validating `config` and computing its bin map
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let mut mapper = FrequencyBinMapper::new();
        mapper.get(&config)?;

        let governor = PerformanceGovernor::new(
            config.performance.clone(),
            QualitySettings::from_config(&config),
        );
        info!(
            "AnalysisEngine initialized: fft_size={}, sample_rate={}, bands={}",
            config.fft_size,
            config.sample_rate,
            config.bands.len()
        );

        Ok(Self {
            mapper,
            extractor: BandEnergyExtractor::new(),
            detector: BeatDetector::new(config.beat.clone()),
            spectral: SpectralFeatureAnalyzer::new(config.spectral.clone(), config.sample_rate),
            governor,
            repaired_frames: 0,
            config,
        })
    }

    /// Analyze one magnitude snapshot taken at `timestamp_ms`
    ///
    /// Snapshots of the wrong length are zero-padded or truncated to
    /// `fft_size / 2` bins and counted in [`repaired_frames`](Self::repaired_frames).
    pub fn process(
        &mut self,
        magnitudes: &[u8],
        time_data: Option<&[u8]>,
        timestamp_ms: f64,
    ) -> Result<AnalysisResult> {
        let frame_start = Instant::now();
        let expected = self.config.bin_count();
        let magnitudes = if magnitudes.len() == expected {
            Cow::Borrowed(magnitudes)
        } else {
            self.repaired_frames += 1;
            debug!(
                "Snapshot length {} repaired to {} bins",
                magnitudes.len(),
                expected
            );
            let mut fixed = magnitudes[..magnitudes.len().min(expected)].to_vec();
            fixed.resize(expected, 0);
            Cow::Owned(fixed)
        };
        let magnitudes = magnitudes.as_ref();

        let settings = self.governor.settings().clone();
        let smoothing = self
            .config
            .smoothing_factor
            .min(settings.smoothing_time_constant);

        let bin_map = self.mapper.get(&self.config)?;
        let bands = &self.config.bands;
        let extractor = &mut self.extractor;
        let (raw, smoothed) = self.governor.measure("bands", || {
            extractor.process(magnitudes, bin_map, bands, smoothing)
        });

        let (beat, beat_state) = if settings.beat_detection_enabled {
            let detector = &mut self.detector;
            let detection = self
                .governor
                .measure("beat", || detector.detect(magnitudes, timestamp_ms));
            let beat = if detection.is_beat {
                self.detector.last_beat().cloned()
            } else {
                None
            };
            let state = BeatState {
                energy: detection.energy,
                avg_energy: detection.avg_energy,
                threshold: detection.threshold,
                bpm: detection.bpm,
                state: detection.state,
                enabled: true,
            };
            (beat, state)
        } else {
            let state = BeatState {
                energy: 0.0,
                avg_energy: self.detector.energy_history().mean(),
                threshold: 0.0,
                bpm: self.detector.bpm(),
                state: self.detector.state(),
                enabled: false,
            };
            (None, state)
        };

        let spectrum = decimate(magnitudes, settings.spectrum_resolution);
        let analyzer = &mut self.spectral;
        let spectral = self.governor.measure("spectral", || {
            analyzer.analyze(&spectrum, settings.advanced_analysis_enabled)
        });

        let levels = time_data.and_then(SignalLevels::from_time_data);

        let analysis_time_ms = frame_start.elapsed().as_secs_f64() * 1000.0;
        let now = self.governor.now_ms();
        self.governor.record("total", analysis_time_ms, now);
        trace!(
            "Frame at {:.1}ms analyzed in {:.3}ms (stage {:?})",
            timestamp_ms,
            analysis_time_ms,
            self.governor.stage()
        );

        Ok(AnalysisResult {
            timestamp_ms,
            band_energies: smoothed.bands,
            raw_band_energies: raw.bands,
            overall_energy: smoothed.overall,
            raw_overall_energy: raw.overall,
            beat,
            beat_state,
            spectral,
            levels,
            analysis_time_ms,
            quality_stage: self.governor.stage(),
        })
    }

    /// Merge `patch` into the configuration
    ///
    /// The merged config is validated before anything changes; on success
    /// the bin map, detector, analyzer and governor ceilings follow it.
    /// Governor timing (including `auto_adjust`) is only replaced when the
    /// patch carries a `performance` section.
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<&AnalysisConfig> {
        let next = patch.apply_to(&self.config)?;
        if patch.affects_bins() {
            self.mapper.get(&next)?;
        }

        self.detector.set_config(next.beat.clone());
        self.spectral
            .set_config(next.spectral.clone(), next.sample_rate);
        // Runtime governor overrides survive patches that leave `performance` alone
        if patch.performance.is_some() {
            self.governor.set_config(next.performance.clone());
        }
        self.governor
            .set_original(QualitySettings::from_config(&next));
        debug!(
            "Configuration updated: fft_size={}, sample_rate={}, smoothing={}",
            next.fft_size, next.sample_rate, next.smoothing_factor
        );

        self.config = next;
        Ok(&self.config)
    }

    /// Current configuration
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Bin map for the current configuration
    pub fn bin_map(&self) -> Option<&FrequencyBinMap> {
        self.mapper.cached()
    }

    /// Performance statistics snapshot
    pub fn stats(&self) -> PerformanceStats {
        self.governor.stats()
    }

    /// Snapshots whose length had to be repaired
    pub fn repaired_frames(&self) -> u64 {
        self.repaired_frames
    }

    /// Settings the governor is currently applying
    pub fn quality_settings(&self) -> &QualitySettings {
        self.governor.settings()
    }

    /// Receiver for governor events
    pub fn events(&self) -> Receiver<GovernorEvent> {
        self.governor.subscribe()
    }

    /// Detector tempo and history
    pub fn beat_detector(&self) -> &BeatDetector {
        &self.detector
    }

    /// The governor, for manual overrides
    pub fn governor_mut(&mut self) -> &mut PerformanceGovernor {
        &mut self.governor
    }

    /// Clear histories, smoothing state and statistics
    ///
    /// The quality stage is kept; it reflects the host, not the signal.
    pub fn reset(&mut self) {
        self.extractor.reset();
        self.detector.reset();
        self.spectral.reset();
        self.governor.reset_stats();
        self.repaired_frames = 0;
        debug!("AnalysisEngine reset");
    }
}
