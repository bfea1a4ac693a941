use std::io;

use thiserror::Error;

/// Result type used across the Hookline core crate.
pub type Result<T> = std::result::Result<T, HooklineError>;

/// Canonical error representation shared by all crates.
#[derive(Debug, Error)]
pub enum HooklineError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("deserialization error: {0}")]
    DeserializationError(String),

    #[error("invalid rule definition: {0}")]
    InvalidRule(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("dispatch error: {0}")]
    DispatchError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("general error: {0}")]
    GeneralError(String),
}

impl From<serde_json::Error> for HooklineError {
    fn from(err: serde_json::Error) -> Self {
        HooklineError::DeserializationError(err.to_string())
    }
}

/// Dedicated configuration error used by the configuration module.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl From<ConfigError> for HooklineError {
    fn from(value: ConfigError) -> Self {
        HooklineError::ConfigError(value.to_string())
    }
}
