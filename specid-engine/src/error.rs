//! Error types for the identification engine interface.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine library or one of its entry points could not be loaded.
    #[error("identification engine unavailable: {0}")]
    Unavailable(String),

    /// The engine rejected its configuration.
    #[error("engine initialization failed ({code}): {reason}")]
    Initialization { code: i32, reason: String },

    /// The engine returned a negative analysis status.
    #[error("engine analysis failed ({code}): {message}")]
    Analysis { code: i32, message: String },

    /// The engine's per-isotope arrays disagree in length.
    #[error("engine result mismatch: {0}")]
    ResultMismatch(String),

    /// Invalid use of the engine interface.
    #[error("logic error: {0}")]
    LogicError(String),
}

impl EngineError {
    /// Builds an [`EngineError::Initialization`] with the reason for `code`.
    pub fn initialization(code: i32) -> Self {
        Self::Initialization {
            code,
            reason: crate::codes::init_error_reason(code),
        }
    }

    /// Numeric engine code, if the error carries one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Initialization { code, .. } | Self::Analysis { code, .. } => Some(*code),
            _ => None,
        }
    }
}
