//! Cache and configuration errors

use thiserror::Error;

/// Frame cache lifecycle errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    #[error("Frame cache is not initialized")]
    NotInitialized,

    #[error("Frame cache is already initialized")]
    AlreadyInitialized,
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
