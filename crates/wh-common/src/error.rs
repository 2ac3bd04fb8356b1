//! Error types shared by the warehouse crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, WhError>;

#[derive(Error, Debug)]
pub enum WhError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Logging error: {0}")]
    Logging(String),
}
