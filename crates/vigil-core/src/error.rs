//! Engine error types.
//!
//! These surface only during construction/configuration. `validate` itself
//! is infallible: detector-local failures degrade and are recorded in the
//! verdict's metadata instead of propagating.

use thiserror::Error;

/// Errors that can occur while building the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A detection rule failed to compile.
    #[error("Invalid detection rule '{pattern}': {message}")]
    InvalidRule { pattern: String, message: String },

    /// The remote judge is required by configuration but has no credentials.
    #[error("Remote judge requires credentials but none were configured")]
    MissingCredentials,

    /// The statistical model file exists but could not be parsed.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error from the pattern-stat store.
    #[error("Storage error: {0}")]
    Storage(#[from] vigil_storage::StorageError),

    /// IO error (e.g., reading a config or model file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine construction.
pub type Result<T> = std::result::Result<T, EngineError>;
