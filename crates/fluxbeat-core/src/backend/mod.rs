//! Analysis backends and the message protocol
//!
//! Every backend speaks the same [`Request`] / [`Response`] protocol, so
//! the caller does not care whether analysis runs on its own thread
//! ([`InProcessBackend`]), on a dedicated worker ([`WorkerBackend`]), or on
//! a worker that falls back to in-process analysis when it dies
//! ([`FallbackBackend`]).
//!
//! On the wire each message is a JSON object tagged by `"type"`:
//!
//! ```json
//! {"type": "initialize", "config": {"fft_size": 2048}}
//! {"type": "process", "magnitudes": [0, 12, 255]}
//! {"type": "get_stats"}
//! ```

mod fallback;
mod in_process;
mod worker;

pub use fallback::FallbackBackend;
pub use in_process::InProcessBackend;
pub use worker::WorkerBackend;

use crate::config::{AnalysisConfig, ConfigPatch};
use crate::engine::AnalysisResult;
use crate::error::{AnalysisError, Result};
use crate::governor::PerformanceStats;
use serde::{Deserialize, Serialize};

/// Message sent to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Create (or recreate) the engine
    Initialize {
        /// Engine configuration
        #[serde(default)]
        config: AnalysisConfig,
    },
    /// Analyze one snapshot
    Process {
        /// Byte magnitudes, `fft_size / 2` of them
        magnitudes: Vec<u8>,
        /// Optional byte waveform centred on 128
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_data: Option<Vec<u8>>,
        /// Frame time; the backend clock is used when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp_ms: Option<f64>,
    },
    /// Merge a partial configuration
    UpdateConfig {
        /// Fields to change
        patch: ConfigPatch,
    },
    /// Fetch performance statistics
    GetStats,
    /// Clear histories and statistics
    Reset,
}

impl Request {
    /// Every recognized `type` tag
    pub const TYPES: [&'static str; 5] =
        ["initialize", "process", "update_config", "get_stats", "reset"];

    /// The `type` tag of this request
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Process { .. } => "process",
            Self::UpdateConfig { .. } => "update_config",
            Self::GetStats => "get_stats",
            Self::Reset => "reset",
        }
    }
}

/// Category of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid configuration
    Config,
    /// Request needs an initialized engine
    NotInitialized,
    /// Unrecognized `type` tag
    UnknownMessage,
    /// Malformed message body
    InvalidMessage,
    /// Worker unavailable
    Offload,
    /// Anything else
    Internal,
}

/// Message returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Engine created
    Initialized {
        /// Configuration actually in effect
        applied_config: AnalysisConfig,
    },
    /// Snapshot analyzed
    Analysis {
        /// Per-frame result
        result: Box<AnalysisResult>,
    },
    /// Patch merged
    ConfigUpdated {
        /// Configuration actually in effect
        applied_config: AnalysisConfig,
    },
    /// Statistics snapshot
    Stats {
        /// Governor statistics
        stats: PerformanceStats,
    },
    /// Reset completed
    ResetDone,
    /// The request failed
    Error {
        /// Failure category
        kind: ErrorKind,
        /// Human readable description
        message: String,
    },
}

impl Response {
    /// Wire representation of an error
    pub fn from_error(err: &AnalysisError) -> Self {
        let kind = match err {
            AnalysisError::Config(_) | AnalysisError::Toml(_) => ErrorKind::Config,
            AnalysisError::NotInitialized(_) => ErrorKind::NotInitialized,
            AnalysisError::UnknownMessage(_) => ErrorKind::UnknownMessage,
            AnalysisError::Json(_) => ErrorKind::InvalidMessage,
            AnalysisError::Offload(_) => ErrorKind::Offload,
            AnalysisError::Protocol(_) | AnalysisError::Io(_) => ErrorKind::Internal,
        };
        Self::Error {
            kind,
            message: err.to_string(),
        }
    }
}

fn unexpected(request: &str, response: Response) -> AnalysisError {
    match response {
        Response::Error { message, .. } => AnalysisError::Protocol(message),
        other => AnalysisError::Protocol(format!(
            "unexpected response to `{}`: {:?}",
            request, other
        )),
    }
}

/// A place analysis can run
///
/// Implementors only provide [`handle`](Self::handle); the typed helpers
/// wrap it. Engine errors come back as `Err`, never as
/// [`Response::Error`].
pub trait AnalysisBackend {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Handle one request
    fn handle(&mut self, request: Request) -> Result<Response>;

    /// Create the engine, returning the applied configuration
    fn initialize(&mut self, config: AnalysisConfig) -> Result<AnalysisConfig> {
        match self.handle(Request::Initialize { config })? {
            Response::Initialized { applied_config } => Ok(applied_config),
            other => Err(unexpected("initialize", other)),
        }
    }

    /// Analyze one snapshot
    fn process(
        &mut self,
        magnitudes: Vec<u8>,
        time_data: Option<Vec<u8>>,
        timestamp_ms: Option<f64>,
    ) -> Result<AnalysisResult> {
        let request = Request::Process {
            magnitudes,
            time_data,
            timestamp_ms,
        };
        match self.handle(request)? {
            Response::Analysis { result } => Ok(*result),
            other => Err(unexpected("process", other)),
        }
    }

    /// Merge a partial configuration, returning the applied configuration
    fn update_config(&mut self, patch: ConfigPatch) -> Result<AnalysisConfig> {
        match self.handle(Request::UpdateConfig { patch })? {
            Response::ConfigUpdated { applied_config } => Ok(applied_config),
            other => Err(unexpected("update_config", other)),
        }
    }

    /// Fetch performance statistics
    fn stats(&mut self) -> Result<PerformanceStats> {
        match self.handle(Request::GetStats)? {
            Response::Stats { stats } => Ok(stats),
            other => Err(unexpected("get_stats", other)),
        }
    }

    /// Clear histories and statistics
    fn reset(&mut self) -> Result<()> {
        match self.handle(Request::Reset)? {
            Response::ResetDone => Ok(()),
            other => Err(unexpected("reset", other)),
        }
    }
}

/// Parse a JSON request, rejecting unknown `type` tags by name
pub fn decode_request(text: &str) -> Result<Request> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| AnalysisError::UnknownMessage("<missing type>".to_string()))?;
    if !Request::TYPES.contains(&kind) {
        return Err(AnalysisError::UnknownMessage(kind.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Handle one JSON request line and encode the reply
///
/// Request failures are encoded as [`Response::Error`]; only a reply that
/// cannot be serialized is returned as `Err`.
pub fn handle_json(backend: &mut dyn AnalysisBackend, text: &str) -> Result<String> {
    let response = decode_request(text)
        .and_then(|request| backend.handle(request))
        .unwrap_or_else(|err| Response::from_error(&err));
    Ok(serde_json::to_string(&response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernorConfig;

    #[test]
    fn test_request_wire_format() {
        let request = decode_request(r#"{"type":"process","magnitudes":[1,2,3]}"#).unwrap();
        assert_eq!(
            request,
            Request::Process {
                magnitudes: vec![1, 2, 3],
                time_data: None,
                timestamp_ms: None,
            }
        );
        assert_eq!(request.kind(), "process");

        let json = serde_json::to_string(&Request::GetStats).unwrap();
        assert_eq!(json, r#"{"type":"get_stats"}"#);
    }

    #[test]
    fn test_initialize_with_partial_config() {
        let request =
            decode_request(r#"{"type":"initialize","config":{"fft_size":4096}}"#).unwrap();
        match request {
            Request::Initialize { config } => {
                assert_eq!(config.fft_size, 4096);
                assert_eq!(config.sample_rate, 44100.0);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_named() {
        let err = decode_request(r#"{"type":"explode"}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownMessage(ref t) if t == "explode"));

        let err = decode_request(r#"{"magnitudes":[]}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownMessage(_)));
    }

    #[test]
    fn test_error_responses() {
        let mut backend = InProcessBackend::new();

        let reply = handle_json(&mut backend, r#"{"type":"explode"}"#).unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        match response {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::UnknownMessage);
                assert!(message.contains("explode"));
            }
            other => panic!("expected error, got {:?}", other),
        }

        let reply = handle_json(&mut backend, r#"{"type":"process","magnitudes":[0]}"#).unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert!(matches!(
            response,
            Response::Error {
                kind: ErrorKind::NotInitialized,
                ..
            }
        ));

        let reply = handle_json(&mut backend, "not json").unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert!(matches!(
            response,
            Response::Error {
                kind: ErrorKind::InvalidMessage,
                ..
            }
        ));
    }

    #[test]
    fn test_oversized_initialize_is_config_error() {
        let mut backend = InProcessBackend::new();
        let reply = handle_json(
            &mut backend,
            r#"{"type":"initialize","config":{"beat":{"beat_history_size":18446744073709551615}}}"#,
        )
        .unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert!(matches!(
            response,
            Response::Error {
                kind: ErrorKind::Config,
                ..
            }
        ));

        let mut fallback = FallbackBackend::new();
        let config = AnalysisConfig {
            performance: GovernorConfig {
                event_capacity: usize::MAX,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            fallback.initialize(config),
            Err(AnalysisError::Config(_))
        ));
        assert!(fallback.is_offloaded());
    }

    #[test]
    fn test_json_session() {
        let mut backend = InProcessBackend::new();
        let reply = handle_json(&mut backend, r#"{"type":"initialize"}"#).unwrap();
        assert!(reply.contains(r#""type":"initialized""#));

        let process = serde_json::to_string(&Request::Process {
            magnitudes: vec![0; 1024],
            time_data: None,
            timestamp_ms: Some(0.0),
        })
        .unwrap();
        let reply = handle_json(&mut backend, &process).unwrap();
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert!(matches!(response, Response::Analysis { .. }));

        let reply = handle_json(&mut backend, r#"{"type":"reset"}"#).unwrap();
        assert_eq!(reply, r#"{"type":"reset_done"}"#);
    }
}
