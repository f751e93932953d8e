//! Error types for the synthetic load workspace

use thiserror::Error;

/// Top-level error surfaced by pipeline setup and the runner
#[derive(Error, Debug)]
pub enum SynthError {
    /// Invalid stage or engine configuration
    #[error("config error: {0}")]
    Config(String),

    /// Load engine failure (worker spawn, worker panic)
    #[error("engine error: {0}")]
    Engine(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the synthetic load workspace
pub type SynthResult<T> = Result<T, SynthError>;
