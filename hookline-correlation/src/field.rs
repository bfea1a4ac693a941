use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::serde_utils::into_object;
use hookline_core::EngineConfig;
use hookline_dispatch::DispatchGateway;
use hookline_rules::template::stringify;
use hookline_rules::{
    seconds, ConditionGroup, EntityStore, Event, FieldPath, NotificationAction,
    RuleError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{elapsed_ms, fire};
use crate::error::CorrelationError;
use crate::report::{
    CorrelationDispatch, CorrelationKind, CorrelationReport, CorrelationStatus,
    CorrelationTrigger, SweepReport,
};
use crate::store::{FieldCorrelationStore, RecordStatus};

/// Waits until events of one webhook carry every expected value of a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCorrelationRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub webhook_id: String,
    pub correlation_field: FieldPath,
    pub expected_values: Vec<String>,
    /// Optional condition tree an event must satisfy before joining.
    #[serde(default)]
    pub match_conditions: Option<Value>,
    pub time_window_secs: u64,
    pub success_action: NotificationAction,
    #[serde(default)]
    pub timeout_action: Option<NotificationAction>,
    #[serde(default)]
    pub debounce_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl FieldCorrelationRule {
    pub fn time_window(&self) -> chrono::Duration {
        seconds(self.time_window_secs)
    }

    pub fn debounce(&self) -> chrono::Duration {
        seconds(self.debounce_secs)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn expects(&self, value: &str) -> bool {
        self.expected_values.iter().any(|expected| expected == value)
    }

    /// Parsed match conditions; `None` when the rule matches every event.
    pub fn condition_group(&self, max_depth: usize) -> Result<Option<ConditionGroup>, RuleError> {
        match &self.match_conditions {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => ConditionGroup::parse(raw, max_depth).map(Some),
        }
    }

    /// Drops duplicate expected values and checks the rule is usable.
    pub fn normalize(&mut self) -> Result<(), CorrelationError> {
        let mut seen = Vec::with_capacity(self.expected_values.len());
        for value in self.expected_values.drain(..) {
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
        self.expected_values = seen;
        self.validate()
    }

    pub fn validate(&self) -> Result<(), CorrelationError> {
        if self.correlation_field.as_str().trim().is_empty() {
            return Err(CorrelationError::invalid_rule(&self.id, "correlation field is required"));
        }
        if self.expected_values.len() < 2 {
            return Err(CorrelationError::invalid_rule(
                &self.id,
                "at least two distinct expected values are required",
            ));
        }
        if self.time_window_secs == 0 {
            return Err(CorrelationError::invalid_rule(
                &self.id,
                "time window must be at least one second",
            ));
        }
        Ok(())
    }
}

/// Values received so far for one correlation window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCorrelationState {
    pub id: String,
    pub rule_id: String,
    pub received_values: BTreeMap<String, Value>,
    /// Expected values not received yet, in rule order.
    pub pending_values: Vec<String>,
    pub first_payload: Value,
    pub first_received_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: CorrelationStatus,
    pub action_triggered: bool,
}

impl FieldCorrelationState {
    pub fn open(rule: &FieldCorrelationRule, first_payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("fcorr-{}", Uuid::new_v4()),
            rule_id: rule.id.clone(),
            received_values: BTreeMap::new(),
            pending_values: rule.expected_values.clone(),
            first_payload,
            first_received_at: now,
            expires_at: now + rule.time_window(),
            completed_at: None,
            status: CorrelationStatus::Waiting,
            action_triggered: false,
        }
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CorrelationStatus::Waiting && self.expires_at > now
    }

    /// Records a pending value. Returns `false` for values already received
    /// or not expected.
    pub fn record(&mut self, value: &str, payload: Value) -> bool {
        let Some(index) = self.pending_values.iter().position(|pending| pending == value) else {
            return false;
        };
        self.pending_values.remove(index);
        self.received_values.insert(value.to_string(), payload);
        true
    }

    pub fn sources(&self) -> Vec<String> {
        self.received_values.keys().cloned().collect()
    }

    pub fn completion_payload(&self, rule: &FieldCorrelationRule) -> Value {
        self.combined_payload(rule, false)
    }

    pub fn timeout_payload(&self, rule: &FieldCorrelationRule) -> Value {
        self.combined_payload(rule, true)
    }

    fn combined_payload(&self, rule: &FieldCorrelationRule, timed_out: bool) -> Value {
        let closed_at = self.completed_at.unwrap_or(self.expires_at);
        let mut correlation = json!({
            "ruleId": rule.id,
            "ruleName": rule.display_name(),
            "field": rule.correlation_field.as_str(),
            "sources": self.sources(),
            "missing": self.pending_values,
            "elapsedMs": elapsed_ms(self.first_received_at, closed_at),
            "payloads": self.received_values,
        });
        if timed_out {
            correlation["timedOut"] = Value::Bool(true);
        }

        let mut merged = into_object(self.first_payload.clone(), "event");
        merged.insert("correlation".to_string(), correlation);
        Value::Object(merged)
    }
}

/// Collects expected field values arriving on one webhook.
#[derive(Clone)]
pub struct FieldCorrelationEngine {
    store: Arc<dyn FieldCorrelationStore>,
    entities: Arc<dyn EntityStore>,
    gateway: Arc<dyn DispatchGateway>,
    max_condition_depth: usize,
    dispatch_timeout: Duration,
}

impl FieldCorrelationEngine {
    pub fn new(
        store: Arc<dyn FieldCorrelationStore>,
        entities: Arc<dyn EntityStore>,
        gateway: Arc<dyn DispatchGateway>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            entities,
            gateway,
            max_condition_depth: config.max_condition_depth,
            dispatch_timeout: config.dispatch_timeout(),
        }
    }

    pub async fn on_event(&self, event: &Event) -> CorrelationReport {
        let mut report = CorrelationReport::new(&event.webhook_id);
        let payload = event.annotated_payload();

        let rules = match self.store.rules_for_webhook(&event.webhook_id).await {
            Ok(rules) => rules,
            Err(err) => {
                warn!(webhook_id = %event.webhook_id, error = %err, "failed to load field correlation rules");
                report.push_issue(None, err.to_string());
                return report;
            }
        };

        for rule in &rules {
            self.process(rule, &payload, event.received_at, &mut report)
                .await;
        }
        report
    }

    async fn process(
        &self,
        rule: &FieldCorrelationRule,
        payload: &Value,
        now: DateTime<Utc>,
        report: &mut CorrelationReport,
    ) {
        match rule.condition_group(self.max_condition_depth) {
            Ok(Some(group)) => {
                if !group.evaluate_with(payload, self.entities.as_ref()).await {
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(rule_id = %rule.id, error = %err, "skipping field correlation with invalid conditions");
                report.push_issue(Some(&rule.id), err.to_string());
                return;
            }
        }

        let Some(value) = rule.correlation_field.resolve(payload).map(stringify) else {
            return;
        };
        if !rule.expects(&value) {
            return;
        }

        let outcome = match self
            .store
            .record_value(rule, &value, payload.clone(), now)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(rule_id = %rule.id, error = %err, "failed to record correlation value");
                report.push_issue(Some(&rule.id), err.to_string());
                return;
            }
        };

        for expired in &outcome.expired {
            report.timed_out_states.push(expired.id.clone());
            match self.time_out(rule, expired).await {
                Ok(Some(dispatch)) => report.dispatches.push(dispatch),
                Ok(None) => {}
                Err(err) => report.push_issue(Some(&rule.id), err.to_string()),
            }
        }

        if outcome.status == RecordStatus::Debounced {
            debug!(rule_id = %rule.id, "field correlation debounced");
            report.debounced_rule_ids.push(rule.id.clone());
            return;
        }
        let Some(state) = outcome.state else {
            debug!(rule_id = %rule.id, "field correlation disabled, value ignored");
            return;
        };

        match outcome.status {
            RecordStatus::Opened => {
                debug!(rule_id = %rule.id, state_id = %state.id, value = %value, "field correlation opened");
                report.opened_states.push(state.id.clone());
            }
            RecordStatus::Recorded => {
                debug!(rule_id = %rule.id, state_id = %state.id, value = %value, "field correlation value recorded");
            }
            RecordStatus::Duplicate | RecordStatus::Closed | RecordStatus::Debounced => {
                debug!(rule_id = %rule.id, value = %value, "field correlation value ignored");
            }
            RecordStatus::Completed => {
                info!(rule_id = %rule.id, state_id = %state.id, "field correlation completed");
                report.completed_states.push(state.id.clone());
                let payload = state.completion_payload(rule);
                match self
                    .dispatch(rule, &state, CorrelationTrigger::Completed, &rule.success_action, &payload)
                    .await
                {
                    Ok(Some(dispatch)) => report.dispatches.push(dispatch),
                    Ok(None) => {}
                    Err(err) => report.push_issue(Some(&rule.id), err.to_string()),
                }
            }
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::new(now);
        let expired = match self.store.expire_waiting(now).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "failed to expire field correlations");
                report.push_issue(None, err.to_string());
                return report;
            }
        };

        for state in expired {
            report.timed_out_states.push(state.id.clone());
            let rule = match self.store.rule(&state.rule_id).await {
                Ok(Some(rule)) => rule,
                Ok(None) => {
                    debug!(rule_id = %state.rule_id, state_id = %state.id, "orphaned field correlation timed out");
                    report.orphaned_states.push(state.id.clone());
                    continue;
                }
                Err(err) => {
                    warn!(rule_id = %state.rule_id, error = %err, "failed to load field correlation rule");
                    report.push_issue(Some(&state.rule_id), err.to_string());
                    continue;
                }
            };

            match self.time_out(&rule, &state).await {
                Ok(Some(dispatch)) => report.dispatches.push(dispatch),
                Ok(None) => {}
                Err(err) => report.push_issue(Some(&rule.id), err.to_string()),
            }
        }

        report
    }

    async fn time_out(
        &self,
        rule: &FieldCorrelationRule,
        state: &FieldCorrelationState,
    ) -> Result<Option<CorrelationDispatch>, CorrelationError> {
        info!(rule_id = %rule.id, state_id = %state.id, missing = ?state.pending_values, "field correlation timed out");
        let Some(action) = &rule.timeout_action else {
            return Ok(None);
        };
        let payload = state.timeout_payload(rule);
        self.dispatch(rule, state, CorrelationTrigger::TimedOut, action, &payload)
            .await
    }

    async fn dispatch(
        &self,
        rule: &FieldCorrelationRule,
        state: &FieldCorrelationState,
        trigger: CorrelationTrigger,
        action: &NotificationAction,
        payload: &Value,
    ) -> Result<Option<CorrelationDispatch>, CorrelationError> {
        if !self.store.mark_action_triggered(&state.id).await? {
            debug!(state_id = %state.id, "field correlation action already dispatched");
            return Ok(None);
        }

        let results = fire(
            self.gateway.as_ref(),
            action,
            payload,
            rule.display_name(),
            self.dispatch_timeout,
        )
        .await;
        Ok(Some(CorrelationDispatch {
            kind: CorrelationKind::Field,
            trigger,
            rule_id: rule.id.clone(),
            state_id: state.id.clone(),
            results,
        }))
    }
}
