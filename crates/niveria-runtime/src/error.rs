//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The log subscriber or its file appender could not be set up.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    /// The background flusher panicked or was aborted.
    #[error("Flusher task failed: {0}")]
    Flusher(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
