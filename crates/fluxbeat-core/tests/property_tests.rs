use fluxbeat_core::beat::{estimate_bpm, BeatDetector};
use fluxbeat_core::bins::compute_bins;
use fluxbeat_core::config::{default_bands, BeatConfig, GovernorConfig};
use fluxbeat_core::spectral::{centroid, decimate, flatness, rolloff};
use fluxbeat_core::{
    AnalysisConfig, AnalysisEngine, GovernorEvent, PerformanceGovernor, QualitySettings,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn energies_stay_in_unit_range(
        frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..2048), 1..20)
    ) {
        let mut config = AnalysisConfig::default();
        config.performance.auto_adjust = false;
        let mut engine = AnalysisEngine::new(config).unwrap();

        for (i, frame) in frames.iter().enumerate() {
            let result = engine.process(frame, None, i as f64 * 16.0).unwrap();
            for value in result.band_energies.values().chain(result.raw_band_energies.values()) {
                prop_assert!((0.0..=1.0).contains(value));
            }
            prop_assert!((0.0..=1.0).contains(&result.overall_energy));
            prop_assert!((0.0..=1.0).contains(&result.spectral.centroid));
            prop_assert!((0.0..=1.0).contains(&result.spectral.rolloff));
            prop_assert!((0.0..=1.0).contains(&result.spectral.flux));
            prop_assert!((0.0..=1.0).contains(&result.spectral.flatness));
        }
    }

    #[test]
    fn beats_never_closer_than_interval(
        levels in proptest::collection::vec(any::<u8>(), 10..200),
        steps in proptest::collection::vec(1u32..120, 200)
    ) {
        let mut detector = BeatDetector::new(BeatConfig::default());
        let mut now = 0.0f64;
        let mut last: Option<f64> = None;

        for (level, step) in levels.iter().zip(&steps) {
            now += *step as f64;
            let detection = detector.detect(&vec![*level; 1024], now);
            if detection.is_beat {
                if let Some(previous) = last {
                    prop_assert!(now - previous > 300.0);
                }
                last = Some(now);
                prop_assert!((0.0..=2.0).contains(&detection.strength));
                prop_assert!((0.0..=1.0).contains(&detection.confidence));
            }
        }
    }

    #[test]
    fn warm_up_never_beats(levels in proptest::collection::vec(any::<u8>(), 1..10)) {
        let mut detector = BeatDetector::new(BeatConfig::default());
        for (i, level) in levels.iter().enumerate() {
            let detection = detector.detect(&vec![*level; 1024], i as f64 * 1000.0);
            prop_assert!(!detection.is_beat);
        }
    }

    #[test]
    fn bpm_uses_plausible_intervals(
        mut timestamps in proptest::collection::vec(0.0f64..60_000.0, 0..12)
    ) {
        timestamps.sort_by(|a, b| a.total_cmp(b));
        let bpm = estimate_bpm(&timestamps);
        if timestamps.len() < 3 {
            prop_assert_eq!(bpm, 0.0);
        } else {
            prop_assert!(bpm == 0.0 || (29.9..=300.1).contains(&bpm), "bpm {}", bpm);
        }
    }

    #[test]
    fn quality_moves_one_stage_within_bounds(
        samples in proptest::collection::vec(0.0f64..12.0, 1..400)
    ) {
        let original = QualitySettings::from_config(&AnalysisConfig::default());
        let config = GovernorConfig {
            reduction_cooldown_ms: 100.0,
            event_capacity: 4096,
            ..Default::default()
        };
        let mut governor = PerformanceGovernor::new(config, original.clone());

        for (i, time_ms) in samples.iter().enumerate() {
            governor.record("total", *time_ms, i as f64 * 16.0);
            for event in governor.drain_events() {
                if let GovernorEvent::QualityChanged { from, to, .. } = event {
                    prop_assert_eq!((from as i32 - to as i32).abs(), 1);
                }
            }
            let s = governor.settings();
            prop_assert!(s.fft_size >= 1024 && s.fft_size <= original.fft_size);
            prop_assert!(s.spectrum_resolution >= 128);
            prop_assert!(s.spectrum_resolution <= original.spectrum_resolution);
            prop_assert!(s.smoothing_time_constant <= original.smoothing_time_constant);
            prop_assert!((0.0..=1.0).contains(&s.effect_complexity));
            prop_assert!((0.0..=1.0).contains(&governor.quality_level()));
        }
    }

    #[test]
    fn bin_lists_sorted_and_unique(exp in 9u32..=15, rate in 8000.0f32..96000.0) {
        let map = compute_bins(1 << exp, rate, &default_bands()).unwrap();
        for (_, bins) in map.iter() {
            prop_assert!(bins.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(bins.iter().all(|&b| b < map.bin_count()));
        }
    }

    #[test]
    fn spectral_features_bounded(
        magnitudes in proptest::collection::vec(any::<u8>(), 2..1024),
        resolution in 0usize..1024
    ) {
        let spectrum = decimate(&magnitudes, resolution);
        prop_assert!(!spectrum.is_empty());
        prop_assert!((0.0..=1.0).contains(&centroid(&spectrum)));
        prop_assert!((0.0..=1.0).contains(&rolloff(&spectrum, 0.9)));
        prop_assert!((0.0..=1.0).contains(&flatness(&spectrum)));
    }
}

#[test]
fn flatness_extremes() {
    assert!(flatness(&[0.5f32; 512]) > 0.99);
    let mut peak = vec![0.0f32; 512];
    peak[100] = 1.0;
    assert!(flatness(&peak) < 0.05);
}
