//! Synchronous backend running the engine on the caller's thread

use super::{AnalysisBackend, Request, Response};
use crate::engine::AnalysisEngine;
use crate::error::{AnalysisError, Result};
use std::time::Instant;
use tracing::debug;

/// Backend that owns an [`AnalysisEngine`] directly
#[derive(Debug)]
pub struct InProcessBackend {
    engine: Option<AnalysisEngine>,
    epoch: Instant,
}

impl Default for InProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBackend {
    /// Create an uninitialized backend
    pub fn new() -> Self {
        Self {
            engine: None,
            epoch: Instant::now(),
        }
    }

    /// The engine, once initialized
    pub fn engine(&self) -> Option<&AnalysisEngine> {
        self.engine.as_ref()
    }

    fn engine_mut(&mut self, request: &str) -> Result<&mut AnalysisEngine> {
        self.engine.as_mut().ok_or_else(|| {
            AnalysisError::NotInitialized(format!("`{}` requires `initialize` first", request))
        })
    }
}

impl AnalysisBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn handle(&mut self, request: Request) -> Result<Response> {
        let kind = request.kind();
        match request {
            Request::Initialize { config } => {
                let engine = AnalysisEngine::new(config)?;
                let applied_config = engine.config().clone();
                self.engine = Some(engine);
                Ok(Response::Initialized { applied_config })
            }
            Request::Process {
                magnitudes,
                time_data,
                timestamp_ms,
            } => {
                let now = self.epoch.elapsed().as_secs_f64() * 1000.0;
                let engine = self.engine_mut(kind)?;
                let result = engine.process(
                    &magnitudes,
                    time_data.as_deref(),
                    timestamp_ms.unwrap_or(now),
                )?;
                Ok(Response::Analysis {
                    result: Box::new(result),
                })
            }
            Request::UpdateConfig { patch } => {
                let applied_config = self.engine_mut(kind)?.update_config(&patch)?.clone();
                Ok(Response::ConfigUpdated { applied_config })
            }
            Request::GetStats => {
                let stats = self.engine_mut(kind)?.stats();
                Ok(Response::Stats { stats })
            }
            Request::Reset => {
                self.engine_mut(kind)?.reset();
                debug!("In-process backend reset");
                Ok(Response::ResetDone)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisConfig, ConfigPatch};

    #[test]
    fn test_requires_initialize() {
        let mut backend = InProcessBackend::new();
        assert!(matches!(
            backend.process(vec![0; 1024], None, None),
            Err(AnalysisError::NotInitialized(_))
        ));
        assert!(matches!(backend.stats(), Err(AnalysisError::NotInitialized(_))));
        assert!(backend.engine().is_none());
    }

    #[test]
    fn test_typed_round_trip() {
        let mut backend = InProcessBackend::new();
        let applied = backend.initialize(AnalysisConfig::default()).unwrap();
        assert_eq!(applied.fft_size, 2048);

        let result = backend.process(vec![128; 1024], None, Some(5.0)).unwrap();
        assert_eq!(result.timestamp_ms, 5.0);
        assert!(result.overall_energy > 0.0);

        let applied = backend
            .update_config(ConfigPatch {
                smoothing_factor: Some(0.5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(applied.smoothing_factor, 0.5);

        assert_eq!(backend.stats().unwrap().frame_count, 1);
        backend.reset().unwrap();
        assert_eq!(backend.stats().unwrap().frame_count, 0);
    }

    #[test]
    fn test_invalid_initialize_keeps_previous_engine() {
        let mut backend = InProcessBackend::new();
        backend.initialize(AnalysisConfig::default()).unwrap();

        let bad = AnalysisConfig {
            sample_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            backend.initialize(bad),
            Err(AnalysisError::Config(_))
        ));
        assert!(backend.engine().is_some());
    }
}
