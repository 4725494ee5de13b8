//! Error types for the analysis core
use thiserror::Error;

/// Analysis core errors
///
/// Per-frame numeric problems (short snapshots, silent input, near-zero
/// divisors) are repaired where they happen and never show up here. Only
/// configuration and ordering mistakes are surfaced to the caller.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Invalid FFT size, sample rate or band bounds
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation attempted before the engine was initialized
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// The offload worker could not be reached
    #[error("Offload error: {0}")]
    Offload(String),

    /// A protocol message carried an unknown `type` tag
    #[error("Unknown message type: {0}")]
    UnknownMessage(String),

    /// A backend answered with a response that does not match the request
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Shorthand for a [`AnalysisError::Config`] error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for transport failures that a synchronous fallback can recover from
    pub fn is_offload(&self) -> bool {
        matches!(self, Self::Offload(_))
    }
}

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
