//! Frequency bin mapping
//!
//! Derives, from the FFT size, sample rate and band table, which spectrum
//! bins belong to each named band. Bin `i` has the centre frequency
//! `i * (sample_rate / 2) / (fft_size / 2)`; it is assigned to every band
//! whose inclusive range contains that frequency, so overlapping bands
//! share bins.

use crate::config::{AnalysisConfig, BandDefinition};
use crate::error::{AnalysisError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// Bin indices per band, derived from an [`AnalysisConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyBinMap {
    bands: BTreeMap<String, Vec<usize>>,
    bin_count: usize,
    bin_width_hz: f32,
}

impl FrequencyBinMap {
    /// Number of bins in a snapshot (`fft_size / 2`)
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Frequency distance between two adjacent bins
    pub fn bin_width_hz(&self) -> f32 {
        self.bin_width_hz
    }

    /// Centre frequency of bin `index`
    pub fn bin_frequency(&self, index: usize) -> f32 {
        index as f32 * self.bin_width_hz
    }

    /// Bin indices of a band, ascending; `None` for unknown bands
    pub fn bins(&self, band: &str) -> Option<&[usize]> {
        self.bands.get(band).map(Vec::as_slice)
    }

    /// Iterate over `(band name, bin indices)` in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.bands
            .iter()
            .map(|(name, bins)| (name.as_str(), bins.as_slice()))
    }

    /// Number of bands in the map
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }
}

/// Compute the bin map for the given FFT size, sample rate and bands
///
/// Fails with [`AnalysisError::Config`] when `fft_size` is zero or odd,
/// `sample_rate` is not positive, or a band has `min_hz >= max_hz`.
pub fn compute_bins(
    fft_size: usize,
    sample_rate: f32,
    bands: &BTreeMap<String, BandDefinition>,
) -> Result<FrequencyBinMap> {
    if fft_size == 0 || fft_size % 2 != 0 {
        return Err(AnalysisError::config(format!(
            "fft_size must be a positive even number, got {}",
            fft_size
        )));
    }
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(AnalysisError::config(format!(
            "sample_rate must be positive, got {}",
            sample_rate
        )));
    }

    let bin_count = fft_size / 2;
    let nyquist = sample_rate / 2.0;
    let bin_width_hz = nyquist / bin_count as f32;

    let mut map = BTreeMap::new();
    for (name, band) in bands {
        if !(band.min_hz < band.max_hz) {
            return Err(AnalysisError::config(format!(
                "band `{}` must satisfy min_hz < max_hz",
                name
            )));
        }
        // Walking bins in order keeps every list sorted and duplicate-free
        let bins: Vec<usize> = (0..bin_count)
            .filter(|&i| band.contains(i as f32 * bin_width_hz))
            .collect();
        map.insert(name.clone(), bins);
    }

    Ok(FrequencyBinMap {
        bands: map,
        bin_count,
        bin_width_hz,
    })
}

/// Caching wrapper that recomputes the bin map only when its inputs change
#[derive(Debug, Default)]
pub struct FrequencyBinMapper {
    key: Option<MapKey>,
    map: Option<FrequencyBinMap>,
    rebuilds: u64,
}

#[derive(Debug, Clone, PartialEq)]
struct MapKey {
    fft_size: usize,
    sample_rate: f32,
    bands: BTreeMap<String, BandDefinition>,
}

impl MapKey {
    fn of(config: &AnalysisConfig) -> Self {
        Self {
            fft_size: config.fft_size,
            sample_rate: config.sample_rate,
            bands: config.bands.clone(),
        }
    }

    fn matches(&self, config: &AnalysisConfig) -> bool {
        self.fft_size == config.fft_size
            && self.sample_rate == config.sample_rate
            && self.bands == config.bands
    }
}

impl FrequencyBinMapper {
    /// Create an empty mapper
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the bin map for `config`, recomputing it if the FFT size,
    /// sample rate or band table changed since the last call
    ///
    /// A cache hit compares against `config` in place and allocates nothing.
    pub fn get(&mut self, config: &AnalysisConfig) -> Result<&FrequencyBinMap> {
        let fresh = self.map.is_some() && self.key.as_ref().is_some_and(|k| k.matches(config));
        if !fresh {
            let map = compute_bins(config.fft_size, config.sample_rate, &config.bands)?;
            debug!(
                "Bin map rebuilt: fft_size={}, sample_rate={}, bin_width={:.2}Hz, bands={}",
                config.fft_size,
                config.sample_rate,
                map.bin_width_hz(),
                map.band_count()
            );
            self.key = Some(MapKey::of(config));
            self.map = Some(map);
            self.rebuilds += 1;
        }

        self.map
            .as_ref()
            .ok_or_else(|| AnalysisError::NotInitialized("bin map".to_string()))
    }

    /// Number of times the map has been computed
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Drop the cached map so the next [`get`](Self::get) recomputes it
    pub fn invalidate(&mut self) {
        self.key = None;
        self.map = None;
    }

    /// The cached map, if one has been computed
    pub fn cached(&self) -> Option<&FrequencyBinMap> {
        self.map.as_ref()
    }
}
