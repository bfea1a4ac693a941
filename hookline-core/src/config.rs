use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, HooklineError};

const DEFAULT_PREFIX: &str = "HOOKLINE_";

/// Runtime knobs for the rule and correlation engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for a single channel send.
    pub dispatch_timeout_ms: u64,
    /// Cadence of the correlation expiry sweep.
    pub sweep_interval_secs: u64,
    /// Maximum nesting of condition groups, the root group counts as one.
    pub max_condition_depth: usize,
    /// Payload paths probed, in order, for an entity name.
    pub entity_name_fields: Vec<String>,
    /// Payload paths probed, in order, for an entity status.
    pub entity_status_fields: Vec<String>,
    /// How long completed and timed-out correlation states are kept before
    /// the sweep drops them.
    pub state_retention_secs: u64,
    pub log_level: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 10_000,
            sweep_interval_secs: 30,
            max_condition_depth: 10,
            entity_name_fields: ["entity", "server", "host", "hostname", "monitor.name"]
                .iter()
                .map(|field| field.to_string())
                .collect(),
            entity_status_fields: ["status", "state", "online", "heartbeat.status"]
                .iter()
                .map(|field| field.to_string())
                .collect(),
            state_retention_secs: 3600,
            log_level: None,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `HOOKLINE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix(DEFAULT_PREFIX)
    }

    /// Loads configuration from env vars prefixed with the provided value.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let key = |suffix: &str| format!("{}{}", prefix, suffix);
        let mut config = Self::default();

        if let Some(value) = parse_var::<u64>(&key("DISPATCH_TIMEOUT_MS"))? {
            config.dispatch_timeout_ms = value;
        }
        if let Some(value) = parse_var::<u64>(&key("SWEEP_INTERVAL_SECS"))? {
            config.sweep_interval_secs = value;
        }
        if let Some(value) = parse_var::<usize>(&key("MAX_CONDITION_DEPTH"))? {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key("MAX_CONDITION_DEPTH"),
                    value: value.to_string(),
                });
            }
            config.max_condition_depth = value;
        }
        if let Some(value) = parse_var::<u64>(&key("STATE_RETENTION_SECS"))? {
            config.state_retention_secs = value;
        }
        if let Some(fields) = list_var(&key("ENTITY_NAME_FIELDS")) {
            config.entity_name_fields = fields;
        }
        if let Some(fields) = list_var(&key("ENTITY_STATUS_FIELDS")) {
            config.entity_status_fields = fields;
        }
        config.log_level = env::var(key("LOG_LEVEL")).ok();

        Ok(config)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Retention of closed correlation states, never below one minute so a
    /// state cannot vanish between closing and claiming its action.
    pub fn state_retention(&self) -> Duration {
        Duration::from_secs(self.state_retention_secs.max(60))
    }
}

fn parse_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn list_var(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let fields: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect();
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

/// Helper that loads config and converts to the canonical Hookline error type.
pub fn load_engine_config() -> Result<EngineConfig, HooklineError> {
    Ok(EngineConfig::from_env()?)
}
