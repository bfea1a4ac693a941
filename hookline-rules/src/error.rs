use std::path::PathBuf;

use hookline_core::HooklineError;
use thiserror::Error;

/// Errors returned when loading, parsing or storing rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rules path does not exist: {0}")]
    MissingPath(String),
    #[error("failed to read rules from {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rules from {path}: {message}")]
    Parse { path: String, message: String },
    #[error("duplicate identifier detected: {id}")]
    DuplicateRule { id: String },
    #[error("invalid condition: {0}")]
    InvalidCondition(String),
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    #[error("condition nesting exceeds the limit of {max} levels")]
    DepthExceeded { max: usize },
    #[error("invalid rule {id}: {message}")]
    InvalidRule { id: String, message: String },
    #[error("rule not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(String),
}

impl RuleError {
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuleError::Io {
            path: path.into().display().to_string(),
            source,
        }
    }

    pub fn parse_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        RuleError::Parse {
            path: path.into().display().to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_rule(id: impl Into<String>, message: impl Into<String>) -> Self {
        RuleError::InvalidRule {
            id: id.into(),
            message: message.into(),
        }
    }
}

impl From<RuleError> for HooklineError {
    fn from(value: RuleError) -> Self {
        match value {
            RuleError::Store(message) => HooklineError::StoreError(message),
            other => HooklineError::InvalidRule(other.to_string()),
        }
    }
}
