//! Error types for calibration fitting and sample aggregation.

use thiserror::Error;

/// Result type for specid-algorithms operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Algorithm error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Under-determined or malformed fit/aggregation input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A calibration cannot be used for the requested operation.
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// The normal-equation matrix could not be inverted.
    #[error("singular matrix: {0}")]
    SingularMatrix(String),

    /// A fit was attempted but produced an unusable calibration.
    #[error("calibration fit failure: {0}")]
    CalibrationFitFailure(String),

    /// Foreground, background, or windows could not be determined.
    #[error("ambiguous input: {0}")]
    AmbiguousInput(String),

    /// Internal invariant violation.
    #[error("logic error: {0}")]
    LogicError(String),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] specid_core::Error),
}
