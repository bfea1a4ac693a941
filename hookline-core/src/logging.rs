use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

use crate::config::EngineConfig;
use crate::errors::{HooklineError, Result};

const DEFAULT_LEVEL: &str = "info";

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level`. Output goes to stderr so that reports printed
/// on stdout stay machine readable; colours are only used on a terminal.
pub fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or(DEFAULT_LEVEL)))
        .map_err(|err| HooklineError::ConfigError(format!("invalid log filter: {err}")))?;

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init()
        .map_err(|err| HooklineError::GeneralError(err.to_string()))
}

/// [`init_tracing`] with the level carried by an engine configuration.
pub fn init_tracing_from_config(config: &EngineConfig) -> Result<()> {
    init_tracing(config.log_level.as_deref())
}
