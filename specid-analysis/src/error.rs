//! Error types for the analysis worker and strategies.

use specid_engine::EngineError;
use thiserror::Error;

/// Result type for analysis operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Analysis error types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("analysis worker is not running")]
    NotRunning,

    #[error("analysis worker is already running")]
    AlreadyRunning,

    /// Malformed or inconsistent request.
    #[error("{0}")]
    InvalidInput(String),

    /// Foreground and background could not be told apart.
    #[error("{0}")]
    AmbiguousInput(String),

    #[error("logic error: {0}")]
    LogicError(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Algorithm(#[from] specid_algorithms::Error),

    #[error(transparent)]
    Core(#[from] specid_core::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Message shown to the user in an analysis result.
    pub fn user_message(&self) -> String {
        match self {
            Error::Engine(EngineError::Initialization { reason, .. }) => reason.clone(),
            Error::Engine(EngineError::Analysis { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}
