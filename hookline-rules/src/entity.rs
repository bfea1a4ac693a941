use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::EngineConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::RuleError;
use crate::path::resolve;

/// Last known status of a monitored entity (a server, a host, a service).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    pub name: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// Storage for entity status records read by the entity operators.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    async fn get(&self, name: &str) -> Result<Option<EntityState>, RuleError>;

    async fn upsert(
        &self,
        name: &str,
        is_online: bool,
        metadata: Value,
    ) -> Result<EntityState, RuleError>;
}

/// In-memory [`EntityStore`].
#[derive(Default, Clone)]
pub struct MemoryEntityStore {
    inner: Arc<RwLock<HashMap<String, EntityState>>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn get(&self, name: &str) -> Result<Option<EntityState>, RuleError> {
        Ok(self.inner.read().get(name).cloned())
    }

    async fn upsert(
        &self,
        name: &str,
        is_online: bool,
        metadata: Value,
    ) -> Result<EntityState, RuleError> {
        let state = EntityState {
            name: name.to_string(),
            is_online,
            last_seen: Utc::now(),
            metadata,
        };
        self.inner.write().insert(name.to_string(), state.clone());
        Ok(state)
    }
}

/// Entity status recognised in a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityObservation {
    pub name: String,
    pub is_online: bool,
    pub status_field: String,
    pub raw_status: Value,
}

/// Looks for an entity name and a status in the payload using the configured
/// field lists, first match wins for each.
pub fn observe_entity(payload: &Value, config: &EngineConfig) -> Option<EntityObservation> {
    let name = config
        .entity_name_fields
        .iter()
        .find_map(|field| match resolve(payload, field)? {
            Value::String(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })?;

    config.entity_status_fields.iter().find_map(|field| {
        let raw = resolve(payload, field)?;
        parse_status(raw).map(|is_online| EntityObservation {
            name: name.clone(),
            is_online,
            status_field: field.clone(),
            raw_status: raw.clone(),
        })
    })
}

fn parse_status(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_f64() {
            Some(n) if n == 1.0 => Some(true),
            Some(n) if n == 0.0 => Some(false),
            _ => None,
        },
        Value::String(text) => match text.trim().to_lowercase().as_str() {
            "up" | "online" | "ok" | "healthy" | "resolved" | "running" | "true" | "1" => {
                Some(true)
            }
            "down" | "offline" | "critical" | "error" | "failed" | "unhealthy" | "firing"
            | "stopped" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Records the entity status carried by `payload`, if any.
///
/// Store failures are logged and swallowed.
pub async fn record_entity_status(
    store: &dyn EntityStore,
    payload: &Value,
    config: &EngineConfig,
) -> Option<EntityState> {
    let observation = observe_entity(payload, config)?;
    let metadata = json!({
        "statusField": observation.status_field,
        "rawStatus": observation.raw_status,
    });

    match store
        .upsert(&observation.name, observation.is_online, metadata)
        .await
    {
        Ok(state) => {
            debug!(entity = %state.name, online = state.is_online, "entity status updated");
            Some(state)
        }
        Err(err) => {
            warn!(entity = %observation.name, error = %err, "failed to update entity status");
            None
        }
    }
}
