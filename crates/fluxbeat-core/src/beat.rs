//! Bass-energy beat detection with tempo estimation
//!
//! Each snapshot is reduced to a weighted RMS over the lowest part of the
//! spectrum. That instantaneous energy goes into a ring buffer (~1s of
//! frames), and a beat fires when the energy clears an adaptive threshold
//! built from the buffer's mean and standard deviation, subject to a
//! refractory period. Tempo is a recency-weighted average over the spacing
//! of the last few beats.

use crate::config::{BeatConfig, MIN_BEAT_SAMPLES};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

/// Floor for divisors in strength/confidence
const EPSILON: f32 = 1e-6;
/// Beats needed before a tempo is reported
const MIN_BEATS_FOR_BPM: usize = 3;
/// Beats considered for the tempo estimate
const BPM_WINDOW: usize = 5;
/// Plausible beat spacing (300 BPM down to 30 BPM)
const MIN_BEAT_SPACING_MS: f64 = 200.0;
const MAX_BEAT_SPACING_MS: f64 = 2000.0;

/// Fixed-capacity ring buffer of instantaneous energies
#[derive(Debug, Clone)]
pub struct EnergyHistory {
    buf: Vec<f32>,
    write: usize,
    count: usize,
}

impl EnergyHistory {
    /// Create an empty history holding at most `capacity` values
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            write: 0,
            count: 0,
        }
    }

    /// Append a value, overwriting the oldest once full
    pub fn push(&mut self, value: f32) {
        let cap = self.buf.len();
        self.buf[self.write] = value;
        self.write = (self.write + 1) % cap;
        if self.count < cap {
            self.count += 1;
        }
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when nothing has been pushed since creation or the last clear
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Maximum number of stored values
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let cap = self.buf.len();
        let start = (self.write + cap - self.count) % cap;
        (0..self.count).map(move |i| self.buf[(start + i) % cap])
    }

    /// Mean of the stored values, 0.0 when empty
    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.iter().sum::<f32>() / self.count as f32
    }

    /// Population standard deviation around `mean`
    pub fn std_dev(&self, mean: f32) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        let sum_sq: f32 = self.iter().map(|x| (x - mean) * (x - mean)).sum();
        (sum_sq / self.count as f32).sqrt()
    }

    /// Remove all values
    pub fn clear(&mut self) {
        self.write = 0;
        self.count = 0;
    }
}

/// A detected beat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Caller-supplied frame time
    pub timestamp_ms: f64,
    /// Instantaneous bass energy of the beat frame
    pub energy: f32,
    /// History mean at the time of the beat
    pub avg_energy: f32,
    /// How far above the mean, in standard deviations (0.0 - 2.0)
    pub strength: f32,
    /// How far above the threshold, relative to the mean (0.0 - 1.0)
    pub confidence: f32,
    /// Tempo estimate including this beat (0.0 when unknown)
    pub bpm: f32,
}

/// Detector readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    /// Fewer than the minimum number of samples; beats cannot fire
    WarmingUp,
    /// Enough history to evaluate the adaptive threshold
    Armed,
}

/// Outcome of a single detection call, beat or not
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatDetection {
    /// Whether a beat fired on this frame
    pub is_beat: bool,
    /// Instantaneous bass energy
    pub energy: f32,
    /// History mean (equals `energy` while warming up)
    pub avg_energy: f32,
    /// Adaptive threshold (0.0 while warming up)
    pub threshold: f32,
    /// Beat strength, 0.0 unless `is_beat`
    pub strength: f32,
    /// Beat confidence, 0.0 unless `is_beat`
    pub confidence: f32,
    /// Current tempo estimate
    pub bpm: f32,
    /// Detector state after this call
    pub state: DetectorState,
}

/// Adaptive-threshold beat detector
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: BeatConfig,
    history: EnergyHistory,
    beats: VecDeque<BeatEvent>,
    last_beat_ms: Option<f64>,
    bpm: f32,
}

impl BeatDetector {
    /// Create a detector with the given tuning
    pub fn new(config: BeatConfig) -> Self {
        Self {
            history: EnergyHistory::new(config.history_size),
            beats: VecDeque::with_capacity(config.beat_history_size),
            last_beat_ms: None,
            bpm: 0.0,
            config,
        }
    }

    /// Replace the tuning; histories are resized only if their capacity changed
    pub fn set_config(&mut self, config: BeatConfig) {
        if config.history_size != self.history.capacity() {
            self.history = EnergyHistory::new(config.history_size);
        }
        while self.beats.len() > config.beat_history_size {
            self.beats.pop_front();
        }
        self.config = config;
    }

    /// Current tuning
    pub fn config(&self) -> &BeatConfig {
        &self.config
    }

    /// Warm-up state derived from the history length
    pub fn state(&self) -> DetectorState {
        if self.history.len() < MIN_BEAT_SAMPLES {
            DetectorState::WarmingUp
        } else {
            DetectorState::Armed
        }
    }

    /// Latest tempo estimate (0.0 when unknown)
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Recorded beats, oldest first
    pub fn beat_history(&self) -> impl Iterator<Item = &BeatEvent> {
        self.beats.iter()
    }

    /// Energy history, oldest first
    pub fn energy_history(&self) -> &EnergyHistory {
        &self.history
    }

    /// Clear all history and return to [`DetectorState::WarmingUp`]
    pub fn reset(&mut self) {
        self.history.clear();
        self.beats.clear();
        self.last_beat_ms = None;
        self.bpm = 0.0;
    }

    /// Evaluate one snapshot taken at `now_ms`
    pub fn detect(&mut self, magnitudes: &[u8], now_ms: f64) -> BeatDetection {
        let energy = instant_energy(magnitudes, self.config.bass_range_fraction);
        self.history.push(energy);

        if self.state() == DetectorState::WarmingUp {
            return BeatDetection {
                is_beat: false,
                energy,
                avg_energy: energy,
                threshold: 0.0,
                strength: 0.0,
                confidence: 0.0,
                bpm: 0.0,
                state: DetectorState::WarmingUp,
            };
        }

        let avg_energy = self.history.mean();
        // Standard deviation, used as the "variance" term of the threshold
        let std_dev = self.history.std_dev(avg_energy);
        let sensitivity = self.config.sensitivity;

        let threshold = (avg_energy
            + self.config.variance_multiplier * std_dev * sensitivity)
            .max(avg_energy * (1.0 + sensitivity * 0.5));

        let cooled_down = self
            .last_beat_ms
            .map(|last| now_ms - last > self.config.min_beat_interval_ms)
            .unwrap_or(true);

        let is_beat = energy > threshold && energy > self.config.min_energy && cooled_down;

        let mut detection = BeatDetection {
            is_beat,
            energy,
            avg_energy,
            threshold,
            strength: 0.0,
            confidence: 0.0,
            bpm: self.bpm,
            state: DetectorState::Armed,
        };

        if is_beat {
            let strength =
                ((energy - avg_energy) / std_dev.max(EPSILON) * sensitivity).clamp(0.0, 2.0);
            let confidence = ((energy - threshold) / avg_energy.max(EPSILON)).clamp(0.0, 1.0);

            let timestamps: Vec<f64> = self
                .beats
                .iter()
                .map(|b| b.timestamp_ms)
                .chain(std::iter::once(now_ms))
                .collect();
            self.bpm = estimate_bpm(&timestamps);

            let event = BeatEvent {
                timestamp_ms: now_ms,
                energy,
                avg_energy,
                strength,
                confidence,
                bpm: self.bpm,
            };
            self.beats.push_back(event);
            while self.beats.len() > self.config.beat_history_size {
                self.beats.pop_front();
            }
            self.last_beat_ms = Some(now_ms);

            trace!(
                "Beat at {:.0}ms: energy={:.3}, avg={:.3}, strength={:.2}, bpm={:.1}",
                now_ms,
                energy,
                avg_energy,
                strength,
                self.bpm
            );

            detection.strength = strength;
            detection.confidence = confidence;
            detection.bpm = self.bpm;
        }

        detection
    }

    /// The most recent beat, if any
    pub fn last_beat(&self) -> Option<&BeatEvent> {
        self.beats.back()
    }
}

/// Weighted RMS over the bass range of a snapshot, in [0, 1]
///
/// The bass range is the lowest `fraction` of the bins (at least one).
/// Bins nearer to DC weigh more: `weight = max(1, range - index)`.
pub fn instant_energy(magnitudes: &[u8], fraction: f32) -> f32 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let range = ((magnitudes.len() as f32 * fraction) as usize).clamp(1, magnitudes.len());

    let mut weighted_sq = 0.0f32;
    let mut weight_sum = 0.0f32;
    for (i, &m) in magnitudes[..range].iter().enumerate() {
        let weight = range.saturating_sub(i).max(1) as f32;
        let value = m as f32 / 255.0;
        weighted_sq += value * value * weight;
        weight_sum += weight;
    }

    let energy = (weighted_sq / weight_sum).sqrt();
    if energy.is_finite() {
        energy.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Tempo from beat timestamps (oldest first)
///
/// Needs at least three beats. Only the last five are used; intervals
/// outside 200..=2000 ms are discarded and later intervals weigh more.
/// Returns 0.0 when no usable interval remains.
pub fn estimate_bpm(timestamps: &[f64]) -> f32 {
    if timestamps.len() < MIN_BEATS_FOR_BPM {
        return 0.0;
    }
    let recent = &timestamps[timestamps.len().saturating_sub(BPM_WINDOW)..];

    let mut weighted = 0.0f64;
    let mut weight_sum = 0.0f64;
    for (i, pair) in recent.windows(2).enumerate() {
        let interval = pair[1] - pair[0];
        if !(MIN_BEAT_SPACING_MS..=MAX_BEAT_SPACING_MS).contains(&interval) {
            continue;
        }
        let weight = (i + 1) as f64;
        weighted += interval * weight;
        weight_sum += weight;
    }

    if weight_sum <= 0.0 {
        return 0.0;
    }
    let avg_interval = weighted / weight_sum;
    if avg_interval <= f64::EPSILON {
        return 0.0;
    }
    (60_000.0 / avg_interval) as f32
}
