//! Worker backend with synchronous fallback

use super::{AnalysisBackend, InProcessBackend, Request, Response, WorkerBackend};
use crate::config::AnalysisConfig;
use crate::error::Result;
use tracing::{info, warn};

/// Prefers an offloaded backend and switches to in-process analysis when
/// it fails
///
/// On the first transport failure the primary is dropped, a fresh
/// [`InProcessBackend`] is initialized with the last applied configuration,
/// and the failed request is retried there. Engine errors (bad config,
/// missing initialize) are returned as-is without falling back.
pub struct FallbackBackend {
    primary: Option<Box<dyn AnalysisBackend + Send>>,
    fallback: Option<InProcessBackend>,
    last_config: Option<AnalysisConfig>,
}

impl Default for FallbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackBackend {
    /// Try to spawn a [`WorkerBackend`]; fall back immediately if that fails
    pub fn new() -> Self {
        match WorkerBackend::spawn() {
            Ok(worker) => Self::with_primary(Box::new(worker)),
            Err(e) => {
                warn!("Analysis worker unavailable ({}), running in-process", e);
                Self {
                    primary: None,
                    fallback: None,
                    last_config: None,
                }
            }
        }
    }

    /// Use `primary` until it reports an offload error
    pub fn with_primary(primary: Box<dyn AnalysisBackend + Send>) -> Self {
        Self {
            primary: Some(primary),
            fallback: None,
            last_config: None,
        }
    }

    /// True while requests still go to the primary backend
    pub fn is_offloaded(&self) -> bool {
        self.primary.is_some()
    }

    /// Last configuration a backend confirmed
    pub fn last_config(&self) -> Option<&AnalysisConfig> {
        self.last_config.as_ref()
    }

    fn remember(&mut self, response: &Response) {
        if let Response::Initialized { applied_config }
        | Response::ConfigUpdated { applied_config } = response
        {
            self.last_config = Some(applied_config.clone());
        }
    }

    fn fallback(&mut self) -> Result<&mut InProcessBackend> {
        if self.fallback.is_none() {
            let mut backend = InProcessBackend::new();
            if let Some(config) = &self.last_config {
                backend.handle(Request::Initialize {
                    config: config.clone(),
                })?;
                info!("Replayed last configuration on in-process backend");
            }
            self.fallback = Some(backend);
        }
        Ok(self.fallback.get_or_insert_with(InProcessBackend::new))
    }
}

impl AnalysisBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        match &self.primary {
            Some(primary) => primary.name(),
            None => "in-process",
        }
    }

    fn handle(&mut self, request: Request) -> Result<Response> {
        if let Some(primary) = self.primary.as_mut() {
            match primary.handle(request.clone()) {
                Ok(response) => {
                    self.remember(&response);
                    return Ok(response);
                }
                Err(e) if e.is_offload() => {
                    warn!(
                        "{} backend failed ({}), falling back to in-process analysis",
                        primary.name(),
                        e
                    );
                    self.primary = None;
                }
                Err(e) => return Err(e),
            }
        }

        let response = self.fallback()?.handle(request)?;
        self.remember(&response);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;

    /// Delegates to an in-process backend for a fixed number of calls,
    /// then behaves like a dead worker
    struct FlakyBackend {
        inner: InProcessBackend,
        remaining: usize,
    }

    impl AnalysisBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn handle(&mut self, request: Request) -> Result<Response> {
            if self.remaining == 0 {
                return Err(AnalysisError::Offload("worker died".to_string()));
            }
            self.remaining -= 1;
            self.inner.handle(request)
        }
    }

    fn flaky(remaining: usize) -> FallbackBackend {
        FallbackBackend::with_primary(Box::new(FlakyBackend {
            inner: InProcessBackend::new(),
            remaining,
        }))
    }

    #[test]
    fn test_falls_back_and_replays_config() {
        let mut backend = flaky(2);
        let config = AnalysisConfig {
            fft_size: 1024,
            ..Default::default()
        };
        backend.initialize(config).unwrap();
        backend.process(vec![0; 512], None, Some(0.0)).unwrap();
        assert!(backend.is_offloaded());

        // Third call hits the dead primary and is retried in-process
        let result = backend.process(vec![255; 512], None, Some(16.0)).unwrap();
        assert!(!backend.is_offloaded());
        assert!(result.raw_overall_energy > 0.99);
        assert_eq!(backend.last_config().unwrap().fft_size, 1024);
        assert_eq!(backend.name(), "in-process");
    }

    #[test]
    fn test_engine_errors_do_not_trigger_fallback() {
        let mut backend = flaky(5);
        assert!(matches!(
            backend.stats(),
            Err(AnalysisError::NotInitialized(_))
        ));
        assert!(backend.is_offloaded());
    }

    #[test]
    fn test_fallback_before_initialize_reports_not_initialized() {
        let mut backend = flaky(0);
        assert!(matches!(
            backend.process(vec![0; 1024], None, None),
            Err(AnalysisError::NotInitialized(_))
        ));
        assert!(!backend.is_offloaded());
    }

    #[test]
    fn test_real_worker_path() {
        let mut backend = FallbackBackend::new();
        backend.initialize(AnalysisConfig::default()).unwrap();
        let result = backend.process(vec![0; 1024], None, Some(0.0)).unwrap();
        assert_eq!(result.overall_energy, 0.0);
    }
}
