use hookline_core::HooklineError;
use thiserror::Error;

/// Errors raised while building a gateway. Sends never return errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid channel url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<DispatchError> for HooklineError {
    fn from(value: DispatchError) -> Self {
        HooklineError::DispatchError(value.to_string())
    }
}
