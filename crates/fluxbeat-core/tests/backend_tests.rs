use fluxbeat_core::backend::{handle_json, ErrorKind};
use fluxbeat_core::{
    AnalysisBackend, AnalysisConfig, ConfigPatch, FallbackBackend, InProcessBackend, Request,
    Response, WorkerBackend,
};

fn session(backend: &mut dyn AnalysisBackend) -> Vec<Response> {
    let lines = [
        r#"{"type":"process","magnitudes":[0,0,0]}"#.to_string(),
        r#"{"type":"initialize","config":{"fft_size":1024}}"#.to_string(),
        serde_json::to_string(&Request::Process {
            magnitudes: vec![255; 512],
            time_data: Some(vec![128; 256]),
            timestamp_ms: Some(0.0),
        })
        .unwrap(),
        r#"{"type":"update_config","patch":{"smoothing_factor":0.2}}"#.to_string(),
        r#"{"type":"get_stats"}"#.to_string(),
        r#"{"type":"bogus"}"#.to_string(),
        r#"{"type":"reset"}"#.to_string(),
    ];
    lines
        .iter()
        .map(|line| serde_json::from_str(&handle_json(backend, line).unwrap()).unwrap())
        .collect()
}

fn check_session(replies: &[Response]) {
    assert!(matches!(
        replies[0],
        Response::Error {
            kind: ErrorKind::NotInitialized,
            ..
        }
    ));
    match &replies[1] {
        Response::Initialized { applied_config } => assert_eq!(applied_config.fft_size, 1024),
        other => panic!("expected initialized, got {:?}", other),
    }
    match &replies[2] {
        Response::Analysis { result } => {
            assert!((result.raw_overall_energy - 1.0).abs() < 1e-6);
            assert_eq!(result.levels.unwrap().rms, 0.0);
        }
        other => panic!("expected analysis, got {:?}", other),
    }
    match &replies[3] {
        Response::ConfigUpdated { applied_config } => {
            assert_eq!(applied_config.smoothing_factor, 0.2);
            assert_eq!(applied_config.fft_size, 1024);
        }
        other => panic!("expected config update, got {:?}", other),
    }
    match &replies[4] {
        Response::Stats { stats } => assert_eq!(stats.frame_count, 1),
        other => panic!("expected stats, got {:?}", other),
    }
    match &replies[5] {
        Response::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::UnknownMessage);
            assert!(message.contains("bogus"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(replies[6], Response::ResetDone);
}

#[test]
fn test_in_process_session() {
    let mut backend = InProcessBackend::new();
    check_session(&session(&mut backend));
}

#[test]
fn test_worker_session() {
    let mut backend = WorkerBackend::spawn().unwrap();
    check_session(&session(&mut backend));
}

#[test]
fn test_fallback_session() {
    let mut backend = FallbackBackend::new();
    check_session(&session(&mut backend));
    assert!(backend.is_offloaded());
}

#[test]
fn test_fallback_survives_worker_shutdown() {
    let mut worker = WorkerBackend::spawn().unwrap();
    worker.shutdown();
    let mut backend = FallbackBackend::with_primary(Box::new(worker));

    let applied = backend.initialize(AnalysisConfig::default()).unwrap();
    assert_eq!(applied.fft_size, 2048);
    assert!(!backend.is_offloaded());

    backend
        .update_config(ConfigPatch {
            sample_rate: Some(48000.0),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(backend.last_config().unwrap().sample_rate, 48000.0);
    backend.process(vec![10; 1024], None, None).unwrap();
    assert_eq!(backend.stats().unwrap().frame_count, 1);
}
