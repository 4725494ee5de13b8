//! Band energy extraction
//!
//! Reduces a byte magnitude snapshot to one normalized energy per band plus
//! an overall level, then exponentially smooths both across frames.

use crate::bins::FrequencyBinMap;
use crate::config::BandDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-band energies and the overall level, all within [0, 1]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    /// Energy per band name
    pub bands: BTreeMap<String, f32>,
    /// Mean level of the whole snapshot
    pub overall: f32,
}

impl BandEnergies {
    /// Energy of a band, 0.0 for unknown names
    pub fn get(&self, band: &str) -> f32 {
        self.bands.get(band).copied().unwrap_or(0.0)
    }
}

/// Compute raw (unsmoothed) band energies for one snapshot
///
/// Each band is the weight-normalized mean of `magnitude / 255` over its
/// bins; bins past the end of `magnitudes` read as silence. The overall
/// level is the plain mean over the entire snapshot.
pub fn extract(
    magnitudes: &[u8],
    bin_map: &FrequencyBinMap,
    bands: &BTreeMap<String, BandDefinition>,
) -> BandEnergies {
    let mut energies = BTreeMap::new();

    for (name, bins) in bin_map.iter() {
        let weight = bands.get(name).map(|b| b.weight).unwrap_or(1.0);
        let mut weighted_sum = 0.0f32;
        let mut weight_sum = 0.0f32;

        for &bin in bins {
            let value = magnitudes.get(bin).copied().unwrap_or(0) as f32 / 255.0;
            weighted_sum += value * weight;
            weight_sum += weight;
        }

        let energy = if weight_sum > 0.0 {
            (weighted_sum / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        };
        energies.insert(name.to_string(), energy);
    }

    let overall = if magnitudes.is_empty() {
        0.0
    } else {
        let sum: u64 = magnitudes.iter().map(|&m| m as u64).sum();
        (sum as f32 / magnitudes.len() as f32 / 255.0).clamp(0.0, 1.0)
    };

    BandEnergies {
        bands: energies,
        overall,
    }
}

/// Stateful smoother over successive [`BandEnergies`]
#[derive(Debug, Clone, Default)]
pub struct BandEnergyExtractor {
    smoothed: BandEnergies,
}

impl BandEnergyExtractor {
    /// Create an extractor with all smoothed values at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract raw energies and fold them into the smoothed state
    ///
    /// Returns `(raw, smoothed)`.
    pub fn process(
        &mut self,
        magnitudes: &[u8],
        bin_map: &FrequencyBinMap,
        bands: &BTreeMap<String, BandDefinition>,
        smoothing: f32,
    ) -> (BandEnergies, BandEnergies) {
        let raw = extract(magnitudes, bin_map, bands);
        let smoothed = self.smooth(&raw, smoothing);
        (raw, smoothed)
    }

    /// Apply `smoothed = smoothed * k + raw * (1 - k)` per band and overall
    ///
    /// Bands that disappeared from `raw` are dropped; new bands start at 0.
    pub fn smooth(&mut self, raw: &BandEnergies, smoothing: f32) -> BandEnergies {
        let k = smoothing.clamp(0.0, 1.0);
        let previous = std::mem::take(&mut self.smoothed.bands);

        for (name, &value) in &raw.bands {
            let old = previous.get(name).copied().unwrap_or(0.0);
            self.smoothed
                .bands
                .insert(name.clone(), (old * k + value * (1.0 - k)).clamp(0.0, 1.0));
        }
        self.smoothed.overall =
            (self.smoothed.overall * k + raw.overall * (1.0 - k)).clamp(0.0, 1.0);

        self.smoothed.clone()
    }

    /// Current smoothed state
    pub fn smoothed(&self) -> &BandEnergies {
        &self.smoothed
    }

    /// Zero the smoothed state
    pub fn reset(&mut self) {
        self.smoothed = BandEnergies::default();
    }
}
