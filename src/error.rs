//! Error types for the Gatehouse service.

use thiserror::Error;

/// Main error type for Gatehouse operations.
///
/// Rate decisions (allowed, blocked, blacklisted) are never errors; they are
/// returned as [`crate::ratelimit::Decision`] values.
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Configuration-related errors, raised at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// A declared-required resource field was absent from the request data
    #[error("Required resource field missing: {field}")]
    MissingField { field: String },

    /// The request body could not be parsed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The record store could not read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Response serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GatehouseError {
    fn from(err: ::config::ConfigError) -> Self {
        GatehouseError::Config(err.to_string())
    }
}

/// Result type alias for Gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;
