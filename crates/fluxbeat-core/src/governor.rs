//! Performance governor
//!
//! Times every analysis call, keeps rolling statistics and a per-category
//! bottleneck estimate, and walks a staged quality ladder to keep the
//! per-frame cost inside its budget.
//!
//! # Quality ladder
//!
//! | Stage | Change relative to the previous stage |
//! |-------|----------------------------------------|
//! | `Full` | original settings |
//! | `ReducedResolution` | fft size and spectrum resolution halved (floors 1024 / 128) |
//! | `ReducedSmoothing` | smoothing and effect complexity -0.2 (floors 0.5 / 0.5) |
//! | `BasicAnalysis` | advanced analysis off, effect complexity -0.2 (floor 0.3) |
//! | `Minimal` | beat detection off, effect complexity 0.2 |
//!
//! Degrading requires a sustained overrun (70% of the last 10 samples over
//! `max_ms`) and a cooldown since the previous reduction; restoring requires
//! 90% of the last 20 samples under `target_ms`. The gap between the two
//! ratios keeps borderline load from oscillating. Each decision moves
//! exactly one stage.
//!
//! Notifications are delivered as [`GovernorEvent`]s over a bounded channel
//! that callers poll or subscribe to.

use crate::config::{AnalysisConfig, GovernorConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Lowest FFT size the governor will reduce to
pub const FFT_SIZE_FLOOR: usize = 1024;
/// Lowest spectrum resolution the governor will reduce to
pub const RESOLUTION_FLOOR: usize = 128;
/// Weight of the newest sample in the bottleneck EMA
const BOTTLENECK_ALPHA: f64 = 0.1;
/// Share of `max_ms` above which a category counts as a bottleneck
const BOTTLENECK_FRACTION: f64 = 0.7;

/// Tunable analysis parameters controlled by the governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySettings {
    /// FFT size the capture side should use
    pub fft_size: usize,
    /// Number of bins fed to the spectral analyzer
    pub spectrum_resolution: usize,
    /// Band smoothing factor
    pub smoothing_time_constant: f32,
    /// Whether beat detection runs
    pub beat_detection_enabled: bool,
    /// Whether mel/bark spectra are computed
    pub advanced_analysis_enabled: bool,
    /// Hint for downstream visual complexity (0.0 - 1.0)
    pub effect_complexity: f32,
}

impl QualitySettings {
    /// Full-quality settings for a configuration
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            fft_size: config.fft_size,
            spectrum_resolution: config.bin_count(),
            smoothing_time_constant: config.smoothing_factor,
            beat_detection_enabled: true,
            advanced_analysis_enabled: true,
            effect_complexity: 1.0,
        }
    }

    /// Settings at `stage`, derived from these (original) settings
    ///
    /// Every reduction is floored and never exceeds the original value, so
    /// `Full` reproduces the original exactly.
    pub fn at_stage(&self, stage: QualityStage) -> Self {
        let mut s = self.clone();
        if stage >= QualityStage::ReducedResolution {
            s.fft_size = (s.fft_size / 2).max(FFT_SIZE_FLOOR).min(self.fft_size);
            s.spectrum_resolution = (s.spectrum_resolution / 2)
                .max(RESOLUTION_FLOOR)
                .min(self.spectrum_resolution);
        }
        if stage >= QualityStage::ReducedSmoothing {
            s.smoothing_time_constant = (s.smoothing_time_constant - 0.2)
                .max(0.5)
                .min(s.smoothing_time_constant);
            s.effect_complexity = (s.effect_complexity - 0.2).max(0.5).min(s.effect_complexity);
        }
        if stage >= QualityStage::BasicAnalysis {
            s.advanced_analysis_enabled = false;
            s.effect_complexity = (s.effect_complexity - 0.2).max(0.3).min(s.effect_complexity);
        }
        if stage >= QualityStage::Minimal {
            s.beat_detection_enabled = false;
            s.effect_complexity = s.effect_complexity.min(0.2);
        }
        s
    }

    /// Weighted quality score in [0, 1] relative to `original`
    ///
    /// fft 30%, resolution 20%, smoothing 15%, effect complexity 20%,
    /// feature flags 15% (half each).
    pub fn quality_level(&self, original: &QualitySettings) -> f32 {
        fn ratio(current: f32, original: f32) -> f32 {
            if original > 0.0 {
                (current / original).clamp(0.0, 1.0)
            } else {
                1.0
            }
        }

        let fft = ratio(self.fft_size as f32, original.fft_size as f32);
        let resolution = ratio(
            self.spectrum_resolution as f32,
            original.spectrum_resolution as f32,
        );
        let smoothing = ratio(
            self.smoothing_time_constant,
            original.smoothing_time_constant,
        );
        let flags = [self.beat_detection_enabled, self.advanced_analysis_enabled]
            .iter()
            .filter(|&&enabled| enabled)
            .count() as f32
            * 0.5;

        (fft * 0.30
            + resolution * 0.20
            + smoothing * 0.15
            + self.effect_complexity.clamp(0.0, 1.0) * 0.20
            + flags * 0.15)
            .clamp(0.0, 1.0)
    }
}

/// Position on the degradation ladder
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum QualityStage {
    /// Original settings
    #[default]
    Full,
    /// Halved FFT size and spectrum resolution
    ReducedResolution,
    /// Lower smoothing and effect complexity
    ReducedSmoothing,
    /// Advanced analysis disabled
    BasicAnalysis,
    /// Beat detection disabled
    Minimal,
}

impl QualityStage {
    /// The next lower-quality stage, `None` at the bottom
    pub fn degraded(self) -> Option<Self> {
        match self {
            Self::Full => Some(Self::ReducedResolution),
            Self::ReducedResolution => Some(Self::ReducedSmoothing),
            Self::ReducedSmoothing => Some(Self::BasicAnalysis),
            Self::BasicAnalysis => Some(Self::Minimal),
            Self::Minimal => None,
        }
    }

    /// The next higher-quality stage, `None` at the top
    pub fn restored(self) -> Option<Self> {
        match self {
            Self::Full => None,
            Self::ReducedResolution => Some(Self::Full),
            Self::ReducedSmoothing => Some(Self::ReducedResolution),
            Self::BasicAnalysis => Some(Self::ReducedSmoothing),
            Self::Minimal => Some(Self::BasicAnalysis),
        }
    }
}

/// Notification emitted by the governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GovernorEvent {
    /// A call exceeded `target_ms`
    WarningRaised {
        /// Timed category
        category: String,
        /// Measured duration
        time_ms: f64,
        /// Budget that was exceeded
        target_ms: f64,
    },
    /// A call exceeded 70% of `max_ms`
    BottleneckDetected {
        /// Timed category
        category: String,
        /// Measured duration
        time_ms: f64,
        /// Category EMA after this sample
        average_ms: f64,
    },
    /// The quality stage moved
    QualityChanged {
        /// Stage before the change
        from: QualityStage,
        /// Stage after the change
        to: QualityStage,
        /// Quality score after the change
        quality_level: f32,
    },
}

/// Rolling timing statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Most recent sample
    pub last_time_ms: f64,
    /// Mean over all samples since the last reset
    pub average_ms: f64,
    /// Fastest sample
    pub min_ms: f64,
    /// Slowest sample
    pub max_ms: f64,
    /// Samples recorded
    pub frame_count: u64,
    /// Samples over `target_ms`
    pub warning_count: u64,
    /// Quality reductions performed
    pub reduction_count: u64,
    /// Quality restorations performed
    pub restoration_count: u64,
    /// Governor time of the last reduction
    pub last_reduction_ms: Option<f64>,
    /// Per-category EMA of call durations
    pub bottlenecks: BTreeMap<String, f64>,
    /// Current ladder stage
    pub stage: QualityStage,
    /// Current quality score
    pub quality_level: f32,
    /// Events discarded because the channel was full
    pub dropped_events: u64,
}

/// Staged, hysteretic quality controller
#[derive(Debug)]
pub struct PerformanceGovernor {
    config: GovernorConfig,
    stats: PerformanceStats,
    total_ms: f64,
    recent: VecDeque<f64>,
    original: QualitySettings,
    settings: QualitySettings,
    stage: QualityStage,
    epoch: Instant,
    events_tx: Sender<GovernorEvent>,
    events_rx: Receiver<GovernorEvent>,
}

impl PerformanceGovernor {
    /// Create a governor starting at full quality
    pub fn new(config: GovernorConfig, original: QualitySettings) -> Self {
        let (tx, rx) = bounded(config.event_capacity.max(1));
        debug!(
            "PerformanceGovernor created: target={}ms, max={}ms, auto_adjust={}",
            config.target_ms, config.max_ms, config.auto_adjust
        );
        Self {
            recent: VecDeque::with_capacity(config.sample_window),
            settings: original.clone(),
            original,
            stage: QualityStage::Full,
            stats: PerformanceStats {
                quality_level: 1.0,
                ..Default::default()
            },
            total_ms: 0.0,
            epoch: Instant::now(),
            events_tx: tx,
            events_rx: rx,
            config,
        }
    }

    /// Milliseconds since the governor was created
    pub fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    /// Run `f`, observe its duration under `category`, and return its output
    ///
    /// Component timings feed the bottleneck map and events only; the
    /// quality ladder is driven by [`record`](Self::record).
    pub fn measure<T>(&mut self, category: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let output = f();
        self.observe(category, start.elapsed().as_secs_f64() * 1000.0);
        output
    }

    /// Update the bottleneck EMA for `category` and raise warning events
    pub fn observe(&mut self, category: &str, time_ms: f64) {
        let time_ms = sanitize(time_ms);

        let ema = self
            .stats
            .bottlenecks
            .entry(category.to_string())
            .or_insert(0.0);
        *ema = *ema * (1.0 - BOTTLENECK_ALPHA) + time_ms * BOTTLENECK_ALPHA;
        let ema = *ema;

        if time_ms > self.config.target_ms {
            self.stats.warning_count += 1;
            self.emit(GovernorEvent::WarningRaised {
                category: category.to_string(),
                time_ms,
                target_ms: self.config.target_ms,
            });
        }
        if time_ms > self.config.max_ms * BOTTLENECK_FRACTION {
            trace!("Bottleneck in `{}`: {:.3}ms (avg {:.3}ms)", category, time_ms, ema);
            self.emit(GovernorEvent::BottleneckDetected {
                category: category.to_string(),
                time_ms,
                average_ms: ema,
            });
        }
    }

    /// Record one frame sample that finished at governor time `now_ms`
    ///
    /// Updates the rolling statistics, observes the sample under
    /// `category`, then applies at most one quality change.
    pub fn record(&mut self, category: &str, time_ms: f64, now_ms: f64) {
        let time_ms = sanitize(time_ms);

        let stats = &mut self.stats;
        stats.last_time_ms = time_ms;
        stats.frame_count += 1;
        self.total_ms += time_ms;
        stats.average_ms = self.total_ms / stats.frame_count as f64;
        if stats.frame_count == 1 {
            stats.min_ms = time_ms;
            stats.max_ms = time_ms;
        } else {
            stats.min_ms = stats.min_ms.min(time_ms);
            stats.max_ms = stats.max_ms.max(time_ms);
        }
        self.recent.push_back(time_ms);
        while self.recent.len() > self.config.sample_window {
            self.recent.pop_front();
        }

        self.observe(category, time_ms);

        if !self.config.auto_adjust {
            return;
        }
        if self.should_degrade(time_ms, now_ms) {
            self.degrade(now_ms);
        } else if self.should_restore() {
            self.restore();
        }
    }

    fn window_count(&self, window: usize, pred: impl Fn(f64) -> bool) -> Option<usize> {
        if self.recent.len() < window {
            return None;
        }
        Some(self.recent.iter().rev().take(window).filter(|&&t| pred(t)).count())
    }

    fn should_degrade(&self, time_ms: f64, now_ms: f64) -> bool {
        if time_ms <= self.config.max_ms {
            return false;
        }
        let window = self.config.degrade_window;
        let max_ms = self.config.max_ms;
        let Some(slow) = self.window_count(window, |t| t > max_ms) else {
            return false;
        };
        if slow < required(self.config.degrade_ratio, window) {
            return false;
        }
        self.stats
            .last_reduction_ms
            .map(|last| now_ms - last >= self.config.reduction_cooldown_ms)
            .unwrap_or(true)
    }

    fn should_restore(&self) -> bool {
        if self.stage == QualityStage::Full {
            return false;
        }
        let window = self.config.restore_window;
        let target_ms = self.config.target_ms;
        self.window_count(window, |t| t < target_ms)
            .map(|fast| fast >= required(self.config.restore_ratio, window))
            .unwrap_or(false)
    }

    fn degrade(&mut self, now_ms: f64) {
        let Some(next) = self.stage.degraded() else {
            debug!("Quality already at minimum; no further reduction possible");
            return;
        };
        self.stats.reduction_count += 1;
        self.stats.last_reduction_ms = Some(now_ms);
        let from = self.transition(next);
        warn!(
            "Performance budget exceeded, quality reduced {:?} -> {:?} (level {:.2})",
            from, next, self.stats.quality_level
        );
    }

    fn restore(&mut self) {
        let Some(previous) = self.stage.restored() else {
            return;
        };
        self.stats.restoration_count += 1;
        let from = self.transition(previous);
        info!(
            "Performance recovered, quality restored {:?} -> {:?} (level {:.2})",
            from, previous, self.stats.quality_level
        );
    }

    fn transition(&mut self, to: QualityStage) -> QualityStage {
        let from = self.stage;
        self.stage = to;
        self.settings = self.original.at_stage(to);
        self.stats.stage = to;
        self.stats.quality_level = self.quality_level();
        self.emit(GovernorEvent::QualityChanged {
            from,
            to,
            quality_level: self.stats.quality_level,
        });
        from
    }

    /// Move to `stage` immediately, bypassing the hysteresis rules
    pub fn force_stage(&mut self, stage: QualityStage) {
        if stage != self.stage {
            let from = self.transition(stage);
            info!("Quality stage forced {:?} -> {:?}", from, stage);
        }
    }

    fn emit(&mut self, event: GovernorEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.dropped_events += 1;
            }
        }
    }

    /// Replace the ceiling settings; the current stage is re-derived from them
    pub fn set_original(&mut self, original: QualitySettings) {
        self.original = original;
        self.settings = self.original.at_stage(self.stage);
        self.stats.quality_level = self.quality_level();
        debug!(
            "Governor ceilings updated: fft_size={}, resolution={}, stage={:?}",
            self.original.fft_size, self.original.spectrum_resolution, self.stage
        );
    }

    /// Replace the timing configuration, keeping statistics and stage
    pub fn set_config(&mut self, config: GovernorConfig) {
        if config.event_capacity != self.config.event_capacity {
            let (tx, rx) = bounded(config.event_capacity.max(1));
            self.events_tx = tx;
            self.events_rx = rx;
        }
        while self.recent.len() > config.sample_window {
            self.recent.pop_front();
        }
        self.config = config;
    }

    /// Enable or disable automatic quality changes
    pub fn set_auto_adjust(&mut self, enabled: bool) {
        self.config.auto_adjust = enabled;
    }

    /// Whether the governor may change quality on its own
    pub fn auto_adjust(&self) -> bool {
        self.config.auto_adjust
    }

    /// Current operating settings
    pub fn settings(&self) -> &QualitySettings {
        &self.settings
    }

    /// Ceiling settings
    pub fn original(&self) -> &QualitySettings {
        &self.original
    }

    /// Current ladder stage
    pub fn stage(&self) -> QualityStage {
        self.stage
    }

    /// Quality score of the current settings
    pub fn quality_level(&self) -> f32 {
        self.settings.quality_level(&self.original)
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> PerformanceStats {
        let mut stats = self.stats.clone();
        stats.stage = self.stage;
        stats.quality_level = self.quality_level();
        stats
    }

    /// Zero all statistics; the quality stage is kept
    pub fn reset_stats(&mut self) {
        self.stats = PerformanceStats {
            stage: self.stage,
            quality_level: self.quality_level(),
            ..Default::default()
        };
        self.total_ms = 0.0;
        self.recent.clear();
        debug!("Performance statistics reset");
    }

    /// Next pending event, if any
    pub fn try_recv_event(&self) -> Option<GovernorEvent> {
        self.events_rx.try_recv().ok()
    }

    /// All pending events
    pub fn drain_events(&self) -> Vec<GovernorEvent> {
        self.events_rx.try_iter().collect()
    }

    /// A receiver for the event channel
    ///
    /// Receivers share one queue: each event reaches exactly one of them.
    pub fn subscribe(&self) -> Receiver<GovernorEvent> {
        self.events_rx.clone()
    }
}

fn sanitize(time_ms: f64) -> f64 {
    if time_ms.is_finite() {
        time_ms.max(0.0)
    } else {
        0.0
    }
}

/// Minimum sample count for `ratio` of `window`, tolerant of float rounding
fn required(ratio: f32, window: usize) -> usize {
    ((ratio as f64 * window as f64) - 1e-6).ceil().max(0.0) as usize
}
