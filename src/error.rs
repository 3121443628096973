//! Error types for the data hub

use thiserror::Error;

/// Main error type for the data hub
#[derive(Error, Debug)]
pub enum DataHubError {
    /// Bad parameter types or combinations. Always raised, never swallowed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate dedup-key on insert. Recovered locally by the table assembler.
    #[error("Duplicate value for key '{key}' with value '{value}'")]
    PersistenceConflict { key: String, value: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Detector '{detector}' failed: {reason}")]
    DetectorExecution { detector: String, reason: String },

    #[error("Calendar error: {0}")]
    CalendarError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl DataHubError {
    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        DataHubError::Validation(msg.into())
    }

    /// Whether this error is a duplicate-key conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, DataHubError::PersistenceConflict { .. })
    }
}

/// Result type alias for data hub operations
pub type Result<T> = std::result::Result<T, DataHubError>;
