use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hookline_core::EngineConfig;
use hookline_rules::{is_debounced, seconds};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::cross_entity::{CorrelationRule, CorrelationState};
use crate::error::CorrelationError;
use crate::field::{FieldCorrelationRule, FieldCorrelationState};
use crate::report::CorrelationStatus;
use crate::store::{CorrelationStore, FieldCorrelationStore, RecordOutcome, RecordStatus};

/// In-memory [`CorrelationStore`]. States are kept in opening order.
///
/// Closed states are dropped by [`CorrelationStore::expire_waiting`] once
/// they are older than the retention.
#[derive(Clone)]
pub struct MemoryCorrelationStore {
    rules: Arc<RwLock<HashMap<String, CorrelationRule>>>,
    states: Arc<RwLock<Vec<CorrelationState>>>,
    retention: Duration,
}

impl Default for MemoryCorrelationStore {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl MemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rules: Arc::default(),
            states: Arc::default(),
            retention: retention(config),
        }
    }

    /// Validates and stores a rule, generating an id when blank.
    pub fn put_rule(&self, mut rule: CorrelationRule) -> Result<CorrelationRule, CorrelationError> {
        if rule.id.trim().is_empty() {
            rule.id = format!("correlation-{}", Uuid::new_v4());
        }
        rule.validate()?;
        self.rules.write().insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<CorrelationRule> {
        self.rules.read().get(rule_id).cloned()
    }

    pub fn list_rules(&self) -> Vec<CorrelationRule> {
        let mut rules: Vec<_> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rules
    }

    /// Removes a rule. Its states stay behind and age out in the sweep.
    pub fn remove_rule(&self, rule_id: &str) -> Option<CorrelationRule> {
        self.rules.write().remove(rule_id)
    }

    pub fn set_enabled(
        &self,
        rule_id: &str,
        enabled: bool,
    ) -> Result<CorrelationRule, CorrelationError> {
        let mut rules = self.rules.write();
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| CorrelationError::RuleNotFound(rule_id.to_string()))?;
        rule.enabled = enabled;
        Ok(rule.clone())
    }

    pub fn states(&self) -> Vec<CorrelationState> {
        self.states.read().clone()
    }

    pub fn states_for_rule(&self, rule_id: &str) -> Vec<CorrelationState> {
        self.states
            .read()
            .iter()
            .filter(|state| state.rule_id == rule_id)
            .cloned()
            .collect()
    }

    fn rules_where(&self, predicate: impl Fn(&CorrelationRule) -> bool) -> Vec<CorrelationRule> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .values()
            .filter(|rule| predicate(rule))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rules
    }
}

fn retention(config: &EngineConfig) -> Duration {
    seconds(config.state_retention().as_secs())
}

/// Closed more than `retention` before `now`.
fn outlived(closed_at: Option<DateTime<Utc>>, now: DateTime<Utc>, retention: Duration) -> bool {
    closed_at.map_or(false, |at| now - at >= retention)
}

fn oldest_open(
    states: &[CorrelationState],
    rule_id: &str,
    now: DateTime<Utc>,
) -> Option<usize> {
    states
        .iter()
        .enumerate()
        .filter(|(_, state)| state.rule_id == rule_id && state.is_open_at(now))
        .min_by_key(|(index, state)| (state.source_received_at, *index))
        .map(|(index, _)| index)
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn rules_for_source(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<CorrelationRule>, CorrelationError> {
        Ok(self.rules_where(|rule| rule.source_webhook_id == webhook_id))
    }

    async fn rules_for_target(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<CorrelationRule>, CorrelationError> {
        Ok(self.rules_where(|rule| rule.target_webhook_id == webhook_id))
    }

    async fn rule(&self, rule_id: &str) -> Result<Option<CorrelationRule>, CorrelationError> {
        Ok(self.get_rule(rule_id))
    }

    async fn open_state(&self, state: CorrelationState) -> Result<(), CorrelationError> {
        self.states.write().push(state);
        Ok(())
    }

    async fn oldest_waiting(
        &self,
        rule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CorrelationState>, CorrelationError> {
        let states = self.states.read();
        Ok(oldest_open(&states, rule_id, now).map(|index| states[index].clone()))
    }

    async fn complete_oldest_waiting(
        &self,
        rule_id: &str,
        target_payload: Value,
        now: DateTime<Utc>,
    ) -> Result<Option<CorrelationState>, CorrelationError> {
        let mut states = self.states.write();
        let Some(index) = oldest_open(&states, rule_id, now) else {
            return Ok(None);
        };
        let state = &mut states[index];
        state.status = CorrelationStatus::Completed;
        state.target_payload = Some(target_payload);
        state.target_received_at = Some(now);
        state.closed_at = Some(now);
        Ok(Some(state.clone()))
    }

    async fn expire_waiting(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CorrelationState>, CorrelationError> {
        let mut states = self.states.write();

        let before = states.len();
        states.retain(|state| {
            state.status == CorrelationStatus::Waiting
                || !outlived(state.closed_at, now, self.retention)
        });
        if states.len() < before {
            debug!(dropped = before - states.len(), "dropped closed correlation states");
        }

        Ok(states
            .iter_mut()
            .filter(|state| state.status == CorrelationStatus::Waiting && state.expires_at <= now)
            .map(|state| {
                state.status = CorrelationStatus::Timeout;
                state.closed_at = Some(now);
                state.clone()
            })
            .collect())
    }

    async fn mark_action_triggered(&self, state_id: &str) -> Result<bool, CorrelationError> {
        let mut states = self.states.write();
        match states.iter_mut().find(|state| state.id == state_id) {
            Some(state) if !state.action_triggered => {
                state.action_triggered = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CorrelationError::Store(format!(
                "correlation state not found: {state_id}"
            ))),
        }
    }
}

/// In-memory [`FieldCorrelationStore`], with the same retention of closed
/// states as [`MemoryCorrelationStore`].
#[derive(Clone)]
pub struct MemoryFieldCorrelationStore {
    rules: Arc<RwLock<HashMap<String, FieldCorrelationRule>>>,
    states: Arc<RwLock<Vec<FieldCorrelationState>>>,
    retention: Duration,
}

impl Default for MemoryFieldCorrelationStore {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl MemoryFieldCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            rules: Arc::default(),
            states: Arc::default(),
            retention: retention(config),
        }
    }

    /// Normalizes, validates and stores a rule, generating an id when blank.
    pub fn put_rule(
        &self,
        mut rule: FieldCorrelationRule,
    ) -> Result<FieldCorrelationRule, CorrelationError> {
        if rule.id.trim().is_empty() {
            rule.id = format!("field-correlation-{}", Uuid::new_v4());
        }
        rule.normalize()?;
        self.rules.write().insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<FieldCorrelationRule> {
        self.rules.read().get(rule_id).cloned()
    }

    pub fn list_rules(&self) -> Vec<FieldCorrelationRule> {
        let mut rules: Vec<_> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rules
    }

    pub fn remove_rule(&self, rule_id: &str) -> Option<FieldCorrelationRule> {
        self.rules.write().remove(rule_id)
    }

    pub fn set_enabled(
        &self,
        rule_id: &str,
        enabled: bool,
    ) -> Result<FieldCorrelationRule, CorrelationError> {
        let mut rules = self.rules.write();
        let rule = rules
            .get_mut(rule_id)
            .ok_or_else(|| CorrelationError::RuleNotFound(rule_id.to_string()))?;
        rule.enabled = enabled;
        Ok(rule.clone())
    }

    pub fn states(&self) -> Vec<FieldCorrelationState> {
        self.states.read().clone()
    }

    pub fn states_for_rule(&self, rule_id: &str) -> Vec<FieldCorrelationState> {
        self.states
            .read()
            .iter()
            .filter(|state| state.rule_id == rule_id)
            .cloned()
            .collect()
    }
}

fn time_out(state: &mut FieldCorrelationState, now: DateTime<Utc>) -> FieldCorrelationState {
    state.status = CorrelationStatus::Timeout;
    state.completed_at = Some(now);
    state.clone()
}

#[async_trait]
impl FieldCorrelationStore for MemoryFieldCorrelationStore {
    async fn rules_for_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<FieldCorrelationRule>, CorrelationError> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .values()
            .filter(|rule| rule.webhook_id == webhook_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rules)
    }

    async fn rule(
        &self,
        rule_id: &str,
    ) -> Result<Option<FieldCorrelationRule>, CorrelationError> {
        Ok(self.get_rule(rule_id))
    }

    async fn record_value(
        &self,
        rule: &FieldCorrelationRule,
        value: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, CorrelationError> {
        let mut states = self.states.write();

        let expired: Vec<_> = states
            .iter_mut()
            .filter(|state| {
                state.rule_id == rule.id
                    && state.status == CorrelationStatus::Waiting
                    && state.expires_at <= now
            })
            .map(|state| time_out(state, now))
            .collect();

        // The stored rule carries the latest trigger time; `rule` may be a
        // snapshot taken before a concurrent completion.
        let (last_triggered_at, debounce) = self
            .rules
            .read()
            .get(&rule.id)
            .map(|stored| (stored.last_triggered_at, stored.debounce()))
            .unwrap_or((rule.last_triggered_at, rule.debounce()));
        if is_debounced(last_triggered_at, now, debounce) {
            return Ok(RecordOutcome {
                status: RecordStatus::Debounced,
                state: None,
                expired,
            });
        }

        let open = states
            .iter()
            .position(|state| state.rule_id == rule.id && state.is_open_at(now));

        let (status, state) = match open {
            Some(index) => {
                let state = &mut states[index];
                let status = if !state.record(value, payload) {
                    RecordStatus::Duplicate
                } else if state.pending_values.is_empty() {
                    state.status = CorrelationStatus::Completed;
                    state.completed_at = Some(now);
                    RecordStatus::Completed
                } else {
                    RecordStatus::Recorded
                };
                (status, state.clone())
            }
            None if !rule.enabled => {
                return Ok(RecordOutcome {
                    status: RecordStatus::Closed,
                    state: None,
                    expired,
                })
            }
            None => {
                let mut state = FieldCorrelationState::open(rule, payload.clone(), now);
                state.record(value, payload);
                let status = if state.pending_values.is_empty() {
                    state.status = CorrelationStatus::Completed;
                    state.completed_at = Some(now);
                    RecordStatus::Completed
                } else {
                    RecordStatus::Opened
                };
                states.push(state.clone());
                (status, state)
            }
        };

        if status == RecordStatus::Completed {
            if let Some(stored) = self.rules.write().get_mut(&rule.id) {
                stored.last_triggered_at = Some(now);
            }
        }

        Ok(RecordOutcome {
            status,
            state: Some(state),
            expired,
        })
    }

    async fn expire_waiting(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FieldCorrelationState>, CorrelationError> {
        let mut states = self.states.write();

        let before = states.len();
        states.retain(|state| {
            state.status == CorrelationStatus::Waiting
                || !outlived(state.completed_at, now, self.retention)
        });
        if states.len() < before {
            debug!(dropped = before - states.len(), "dropped closed field correlation states");
        }

        Ok(states
            .iter_mut()
            .filter(|state| state.status == CorrelationStatus::Waiting && state.expires_at <= now)
            .map(|state| time_out(state, now))
            .collect())
    }

    async fn mark_action_triggered(&self, state_id: &str) -> Result<bool, CorrelationError> {
        let mut states = self.states.write();
        match states.iter_mut().find(|state| state.id == state_id) {
            Some(state) if !state.action_triggered => {
                state.action_triggered = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CorrelationError::Store(format!(
                "field correlation state not found: {state_id}"
            ))),
        }
    }
}
