//! Spectral shape features
//!
//! Computes, from a normalized magnitude spectrum:
//!
//! - **centroid**: amplitude-weighted mean bin, as a fraction of the spectrum
//! - **rolloff**: bin below which 90% of the energy lies, as a fraction
//! - **flux**: either the high-band energy share or a true frame difference
//! - **flatness**: geometric over arithmetic mean (1 = noise, 0 = tonal)
//! - **mel / bark spectra**: perceptual re-binnings driven by per-bin lookup
//!   tables that are rebuilt only when the bin count or sample rate changes
//!
//! Every feature is 0.0 for an all-zero spectrum.

use crate::config::{FluxMode, SpectralConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Share of the spectrum (from the top) treated as the high band for flux
const HIGH_BAND_FRACTION: f32 = 0.3;
/// Floor applied to silent bins inside the geometric mean
const FLATNESS_FLOOR: f32 = 1e-6;

/// Convert frequency in Hz to mel
#[inline]
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert frequency in Hz to bark (Zwicker)
#[inline]
pub fn hz_to_bark(hz: f32) -> f32 {
    13.0 * (0.00076 * hz).atan() + 3.5 * (hz / 7500.0).powi(2).atan()
}

/// Spectral shape of one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    /// Normalized spectral centroid (0.0 - 1.0)
    pub centroid: f32,
    /// Normalized rolloff point (0.0 - 1.0)
    pub rolloff: f32,
    /// Spectral flux (0.0 - 1.0), see [`FluxMode`]
    pub flux: f32,
    /// Spectral flatness (0.0 - 1.0)
    pub flatness: f32,
    /// Mel-scale spectrum, present when advanced analysis ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mel_spectrum: Option<Vec<f32>>,
    /// Bark-scale spectrum, present when advanced analysis ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bark_spectrum: Option<Vec<f32>>,
}

/// Per-bin perceptual scale values for one spectrum geometry
#[derive(Debug, Clone)]
struct ScaleTables {
    bin_count: usize,
    sample_rate: f32,
    mel: Vec<f32>,
    bark: Vec<f32>,
}

impl ScaleTables {
    fn build(bin_count: usize, sample_rate: f32) -> Self {
        let nyquist = sample_rate / 2.0;
        let freqs = (0..bin_count).map(|i| i as f32 * nyquist / bin_count as f32);
        let (mel, bark) = freqs.map(|f| (hz_to_mel(f), hz_to_bark(f))).unzip();
        Self {
            bin_count,
            sample_rate,
            mel,
            bark,
        }
    }

    fn matches(&self, bin_count: usize, sample_rate: f32) -> bool {
        self.bin_count == bin_count && self.sample_rate == sample_rate
    }
}

/// Stateful spectral feature analyzer
#[derive(Debug, Clone)]
pub struct SpectralFeatureAnalyzer {
    config: SpectralConfig,
    sample_rate: f32,
    tables: Option<ScaleTables>,
    previous: Vec<f32>,
}

impl SpectralFeatureAnalyzer {
    /// Create an analyzer for spectra sampled at `sample_rate`
    pub fn new(config: SpectralConfig, sample_rate: f32) -> Self {
        Self {
            config,
            sample_rate,
            tables: None,
            previous: Vec::new(),
        }
    }

    /// Replace tuning and sample rate; lookup tables follow lazily
    pub fn set_config(&mut self, config: SpectralConfig, sample_rate: f32) {
        if config.flux_mode != self.config.flux_mode {
            self.previous.clear();
        }
        self.config = config;
        self.sample_rate = sample_rate;
    }

    /// Current tuning
    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Forget the previous frame used by [`FluxMode::FrameDifference`]
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Analyze a normalized spectrum (values in [0, 1])
    ///
    /// Mel and bark spectra are only computed when `advanced` is set.
    pub fn analyze(&mut self, spectrum: &[f32], advanced: bool) -> SpectralFeatures {
        let flux = match self.config.flux_mode {
            FluxMode::HighBandRatio => high_band_ratio(spectrum),
            FluxMode::FrameDifference => self.frame_difference(spectrum),
        };

        let mut features = SpectralFeatures {
            centroid: centroid(spectrum),
            rolloff: rolloff(spectrum, self.config.rolloff_fraction),
            flux,
            flatness: flatness(spectrum),
            mel_spectrum: None,
            bark_spectrum: None,
        };

        if advanced && !spectrum.is_empty() {
            let (mel_bins, bark_bins) = (self.config.mel_bins, self.config.bark_bins);
            let tables = self.tables_for(spectrum.len());
            let mel = mel_spectrum(spectrum, &tables.mel, mel_bins);
            let bark = bark_spectrum(spectrum, &tables.bark, bark_bins);
            features.mel_spectrum = Some(mel);
            features.bark_spectrum = Some(bark);
        }

        features
    }

    fn tables_for(&mut self, bin_count: usize) -> &ScaleTables {
        let sample_rate = self.sample_rate;
        let fresh = self
            .tables
            .as_ref()
            .is_some_and(|t| t.matches(bin_count, sample_rate));
        if !fresh {
            debug!(
                "Rebuilding mel/bark tables: bins={}, sample_rate={}",
                bin_count, sample_rate
            );
            self.tables = Some(ScaleTables::build(bin_count, sample_rate));
        }
        self.tables
            .get_or_insert_with(|| ScaleTables::build(bin_count, sample_rate))
    }

    fn frame_difference(&mut self, spectrum: &[f32]) -> f32 {
        if self.previous.len() != spectrum.len() {
            self.previous = vec![0.0; spectrum.len()];
        }
        let rise: f32 = spectrum
            .iter()
            .zip(&self.previous)
            .map(|(cur, prev)| (cur - prev).max(0.0))
            .sum();
        self.previous.copy_from_slice(spectrum);

        if spectrum.is_empty() {
            0.0
        } else {
            (rise / spectrum.len() as f32).clamp(0.0, 1.0)
        }
    }
}

/// Normalize a byte snapshot, averaging groups down to `resolution` bins
///
/// A `resolution` of zero or at least the snapshot length keeps every bin.
pub fn decimate(magnitudes: &[u8], resolution: usize) -> Vec<f32> {
    let len = magnitudes.len();
    if resolution == 0 || resolution >= len {
        return magnitudes.iter().map(|&m| m as f32 / 255.0).collect();
    }

    (0..resolution)
        .map(|j| {
            let start = j * len / resolution;
            let end = ((j + 1) * len / resolution).max(start + 1);
            let group = &magnitudes[start..end];
            let sum: u32 = group.iter().map(|&m| m as u32).sum();
            sum as f32 / group.len() as f32 / 255.0
        })
        .collect()
}

/// Amplitude-weighted mean bin index divided by the spectrum length
pub fn centroid(spectrum: &[f32]) -> f32 {
    let total: f32 = spectrum.iter().sum();
    if spectrum.is_empty() || total <= 0.0 {
        return 0.0;
    }
    let weighted: f32 = spectrum
        .iter()
        .enumerate()
        .map(|(i, &m)| i as f32 * m)
        .sum();
    (weighted / total / spectrum.len() as f32).clamp(0.0, 1.0)
}

/// Smallest bin whose cumulative energy reaches `fraction` of the total,
/// divided by the spectrum length
pub fn rolloff(spectrum: &[f32], fraction: f32) -> f32 {
    let total: f32 = spectrum.iter().map(|m| m * m).sum();
    if spectrum.is_empty() || total <= 0.0 {
        return 0.0;
    }
    let target = total * fraction;
    let mut cumulative = 0.0f32;
    for (i, &m) in spectrum.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= target {
            return (i as f32 / spectrum.len() as f32).clamp(0.0, 1.0);
        }
    }
    // Rounding can leave the sum a hair short of the target
    ((spectrum.len() - 1) as f32 / spectrum.len() as f32).clamp(0.0, 1.0)
}

/// Share of the total energy carried by the top 30% of bins
///
/// Stand-in for flux that needs no frame memory.
pub fn high_band_ratio(spectrum: &[f32]) -> f32 {
    let total: f32 = spectrum.iter().map(|m| m * m).sum();
    if spectrum.is_empty() || total <= 0.0 {
        return 0.0;
    }
    let high_start = spectrum.len() - (spectrum.len() as f32 * HIGH_BAND_FRACTION) as usize;
    let high: f32 = spectrum[high_start..].iter().map(|m| m * m).sum();
    (high / total).clamp(0.0, 1.0)
}

/// Geometric over arithmetic mean of the non-DC bins
///
/// Silent bins are floored at a tiny value so that a lone peak over
/// silence reads as tonal; an all-zero spectrum returns 0.0.
pub fn flatness(spectrum: &[f32]) -> f32 {
    if spectrum.len() < 2 {
        return 0.0;
    }
    let bins = &spectrum[1..];
    let arithmetic = bins.iter().sum::<f32>() / bins.len() as f32;
    if arithmetic <= 0.0 {
        return 0.0;
    }
    let log_mean =
        bins.iter().map(|&m| m.max(FLATNESS_FLOOR).ln()).sum::<f32>() / bins.len() as f32;
    let geometric = log_mean.exp();
    let value = geometric / arithmetic;
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Triangular mel filterbank over per-bin mel values
///
/// Filter centres are evenly spaced on the mel axis up to the highest
/// bin; a filter too narrow to cover any bin takes its nearest bin.
fn mel_spectrum(spectrum: &[f32], mel_table: &[f32], bins: usize) -> Vec<f32> {
    let mel_max = mel_table.last().copied().unwrap_or(0.0);
    if bins == 0 || mel_max <= 0.0 {
        return vec![0.0; bins];
    }
    let step = mel_max / (bins + 1) as f32;

    (0..bins)
        .map(|k| {
            let left = step * k as f32;
            let centre = step * (k + 1) as f32;
            let right = step * (k + 2) as f32;

            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;
            for (&m, &mel) in spectrum.iter().zip(mel_table) {
                let weight = if mel > left && mel <= centre {
                    (mel - left) / (centre - left)
                } else if mel > centre && mel < right {
                    (right - mel) / (right - centre)
                } else {
                    0.0
                };
                sum += m * weight;
                weight_sum += weight;
            }

            let value = if weight_sum > 0.0 {
                sum / weight_sum
            } else {
                nearest_value(spectrum, mel_table, centre)
            };
            value.clamp(0.0, 1.0)
        })
        .collect()
}

/// Bark re-binning: every bin feeds the output whose centre is nearest
fn bark_spectrum(spectrum: &[f32], bark_table: &[f32], bins: usize) -> Vec<f32> {
    let bark_max = bark_table.last().copied().unwrap_or(0.0);
    if bins == 0 || bark_max <= 0.0 {
        return vec![0.0; bins];
    }
    let width = bark_max / bins as f32;

    let mut sums = vec![0.0f32; bins];
    let mut counts = vec![0u32; bins];
    for (&m, &bark) in spectrum.iter().zip(bark_table) {
        let k = ((bark / width) as usize).min(bins - 1);
        sums[k] += m;
        counts[k] += 1;
    }

    (0..bins)
        .map(|k| {
            let value = if counts[k] > 0 {
                sums[k] / counts[k] as f32
            } else {
                nearest_value(spectrum, bark_table, width * (k as f32 + 0.5))
            };
            value.clamp(0.0, 1.0)
        })
        .collect()
}

fn nearest_value(spectrum: &[f32], table: &[f32], target: f32) -> f32 {
    table
        .iter()
        .zip(spectrum)
        .min_by(|(a, _), (b, _)| {
            (*a - target)
                .abs()
                .partial_cmp(&(*b - target).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(_, &m)| m)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> SpectralFeatureAnalyzer {
        SpectralFeatureAnalyzer::new(SpectralConfig::default(), 44100.0)
    }

    #[test]
    fn test_scale_conversions() {
        assert!((hz_to_mel(1000.0) - 1000.0).abs() < 1.0);
        assert_eq!(hz_to_mel(0.0), 0.0);
        assert_eq!(hz_to_bark(0.0), 0.0);
        let bark_1k = hz_to_bark(1000.0);
        assert!((8.0..9.0).contains(&bark_1k), "bark(1k) was {}", bark_1k);
        assert!(hz_to_bark(20000.0) < 26.0);
    }

    #[test]
    fn test_all_zero_spectrum_yields_zeros() {
        let spectrum = vec![0.0f32; 1024];
        let features = analyzer().analyze(&spectrum, true);
        assert_eq!(features.centroid, 0.0);
        assert_eq!(features.rolloff, 0.0);
        assert_eq!(features.flux, 0.0);
        assert_eq!(features.flatness, 0.0);
        assert!(features.mel_spectrum.unwrap().iter().all(|&v| v == 0.0));
        assert!(features.bark_spectrum.unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_flatness_uniform_vs_peak() {
        let uniform = vec![0.5f32; 512];
        assert!((flatness(&uniform) - 1.0).abs() < 1e-3);

        let mut peak = vec![0.0f32; 512];
        peak[100] = 1.0;
        assert!(flatness(&peak) < 0.01, "peak flatness {}", flatness(&peak));
    }

    #[test]
    fn test_centroid_and_rolloff_track_content() {
        let mut low = vec![0.0f32; 1000];
        low[100] = 1.0;
        assert!((centroid(&low) - 0.1).abs() < 1e-6);
        assert!((rolloff(&low, 0.9) - 0.1).abs() < 1e-6);

        let uniform = vec![1.0f32; 1000];
        assert!((centroid(&uniform) - 0.4995).abs() < 1e-3);
        let r = rolloff(&uniform, 0.9);
        assert!((r - 0.899).abs() < 2e-3, "rolloff was {}", r);
    }

    #[test]
    fn test_high_band_ratio() {
        let mut spectrum = vec![0.0f32; 100];
        spectrum[10] = 1.0;
        assert_eq!(high_band_ratio(&spectrum), 0.0);
        spectrum[90] = 1.0;
        assert!((high_band_ratio(&spectrum) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_frame_difference_flux() {
        let config = SpectralConfig {
            flux_mode: FluxMode::FrameDifference,
            ..Default::default()
        };
        let mut analyzer = SpectralFeatureAnalyzer::new(config, 44100.0);
        let quiet = vec![0.0f32; 256];
        let loud = vec![0.5f32; 256];

        assert_eq!(analyzer.analyze(&quiet, false).flux, 0.0);
        assert!((analyzer.analyze(&loud, false).flux - 0.5).abs() < 1e-6);
        // Steady state: no change, no flux
        assert_eq!(analyzer.analyze(&loud, false).flux, 0.0);
        // Falling energy is rectified away
        assert_eq!(analyzer.analyze(&quiet, false).flux, 0.0);

        analyzer.analyze(&loud, false);
        analyzer.reset();
        assert!((analyzer.analyze(&loud, false).flux - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_perceptual_spectra_shape() {
        let mut analyzer = analyzer();
        let mut spectrum = vec![0.0f32; 1024];
        // Low-frequency content only (below ~430 Hz)
        spectrum[..20].fill(1.0);
        let features = analyzer.analyze(&spectrum, true);

        let mel = features.mel_spectrum.unwrap();
        let bark = features.bark_spectrum.unwrap();
        assert_eq!(mel.len(), 32);
        assert_eq!(bark.len(), 24);
        assert!(mel[0] > 0.5);
        assert_eq!(*mel.last().unwrap(), 0.0);
        assert!(bark[0] > 0.5);
        assert_eq!(*bark.last().unwrap(), 0.0);
        assert!(mel.iter().chain(bark.iter()).all(|v| (0.0..=1.0).contains(v)));

        let basic = analyzer.analyze(&spectrum, false);
        assert!(basic.mel_spectrum.is_none() && basic.bark_spectrum.is_none());
    }

    #[test]
    fn test_decimate() {
        let magnitudes: Vec<u8> = (0..8).map(|i| (i * 30) as u8).collect();
        let full = decimate(&magnitudes, 0);
        assert_eq!(full.len(), 8);
        assert!((full[1] - 30.0 / 255.0).abs() < 1e-6);

        let halved = decimate(&magnitudes, 4);
        assert_eq!(halved.len(), 4);
        assert!((halved[0] - 15.0 / 255.0).abs() < 1e-6);
        assert!((halved[3] - 195.0 / 255.0).abs() < 1e-6);

        assert_eq!(decimate(&magnitudes, 64).len(), 8);
        assert!(decimate(&[], 4).is_empty());
    }
}
