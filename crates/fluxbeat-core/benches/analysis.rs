use criterion::{criterion_group, criterion_main, Criterion};
use fluxbeat_core::spectral::{decimate, SpectralFeatureAnalyzer};
use fluxbeat_core::{AnalysisConfig, AnalysisEngine, QualityStage, SpectralConfig};

fn snapshot(frame: usize) -> Vec<u8> {
    (0..1024)
        .map(|i| {
            let base = 200usize.saturating_sub(i / 6);
            let kick = if frame % 25 == 0 && i < 100 { 50 } else { 0 };
            ((base + kick + (i * 7 + frame) % 13) as u32).min(255) as u8
        })
        .collect()
}

fn engine_benchmark(c: &mut Criterion) {
    let frames: Vec<Vec<u8>> = (0..64).map(snapshot).collect();

    let mut group = c.benchmark_group("AnalysisEngine");
    for stage in [QualityStage::Full, QualityStage::Minimal] {
        let mut config = AnalysisConfig::default();
        config.performance.auto_adjust = false;
        let mut engine = AnalysisEngine::new(config).unwrap();
        engine.governor_mut().force_stage(stage);

        let mut frame = 0usize;
        group.bench_function(format!("process_{:?}", stage), |b| {
            b.iter(|| {
                frame += 1;
                let result = engine
                    .process(
                        std::hint::black_box(&frames[frame % frames.len()]),
                        None,
                        frame as f64 * 16.0,
                    )
                    .unwrap();
                std::hint::black_box(result);
            })
        });
    }
    group.finish();
}

fn spectral_benchmark(c: &mut Criterion) {
    let spectrum = decimate(&snapshot(0), 0);
    let mut analyzer = SpectralFeatureAnalyzer::new(SpectralConfig::default(), 44100.0);

    let mut group = c.benchmark_group("SpectralFeatureAnalyzer");
    group.bench_function("basic", |b| {
        b.iter(|| analyzer.analyze(std::hint::black_box(&spectrum), false))
    });
    group.bench_function("advanced", |b| {
        b.iter(|| analyzer.analyze(std::hint::black_box(&spectrum), true))
    });
    group.finish();
}

criterion_group!(benches, engine_benchmark, spectral_benchmark);
criterion_main!(benches);
