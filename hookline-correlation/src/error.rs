use hookline_core::HooklineError;
use hookline_rules::RuleError;
use thiserror::Error;

/// Errors raised by correlation rules and their state stores.
#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("invalid correlation rule {id}: {message}")]
    InvalidRule { id: String, message: String },
    #[error("correlation rule not found: {0}")]
    RuleNotFound(String),
    #[error("invalid match conditions: {0}")]
    Conditions(#[from] RuleError),
    #[error("correlation store error: {0}")]
    Store(String),
}

impl CorrelationError {
    pub fn invalid_rule(id: impl Into<String>, message: impl Into<String>) -> Self {
        CorrelationError::InvalidRule {
            id: id.into(),
            message: message.into(),
        }
    }
}

impl From<CorrelationError> for HooklineError {
    fn from(value: CorrelationError) -> Self {
        match value {
            CorrelationError::Store(message) => HooklineError::StoreError(message),
            other => HooklineError::InvalidRule(other.to_string()),
        }
    }
}
