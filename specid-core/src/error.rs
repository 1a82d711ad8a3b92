//! Error types for specid-core.

use thiserror::Error;

/// Result type alias for specid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for spectrum and calibration handling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Energy calibration could not be constructed or used.
    #[error("invalid energy calibration: {0}")]
    InvalidCalibration(String),

    /// Malformed or inconsistent input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Channel count does not match what the calibration or grid expects.
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
