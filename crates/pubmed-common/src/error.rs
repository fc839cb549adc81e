//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by shared helpers (configuration parsing, serialization)
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CommonError {
    /// Configuration error for an environment variable that failed to parse
    pub fn invalid_env(name: &str, value: &str) -> Self {
        Self::Config(format!("{} has invalid value '{}'", name, value))
    }
}
