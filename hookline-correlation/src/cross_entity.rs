use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::EngineConfig;
use hookline_dispatch::DispatchGateway;
use hookline_rules::{seconds, Event, NotificationAction};
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
use crate::store::CorrelationStore;

/// Waits for an event on a target webhook after an event on a source webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub source_webhook_id: String,
    pub target_webhook_id: String,
    pub time_window_secs: u64,
    pub success_action: NotificationAction,
    #[serde(default)]
    pub timeout_action: Option<NotificationAction>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl CorrelationRule {
    pub fn time_window(&self) -> chrono::Duration {
        seconds(self.time_window_secs)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<(), CorrelationError> {
        if self.source_webhook_id.trim().is_empty() || self.target_webhook_id.trim().is_empty() {
            return Err(CorrelationError::invalid_rule(
                &self.id,
                "source and target webhooks are required",
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

/// One source event waiting for its target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationState {
    pub id: String,
    pub rule_id: String,
    pub source_payload: Value,
    pub source_received_at: DateTime<Utc>,
    pub target_payload: Option<Value>,
    pub target_received_at: Option<DateTime<Utc>>,
    pub status: CorrelationStatus,
    pub expires_at: DateTime<Utc>,
    /// When the state left `waiting`.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub action_triggered: bool,
}

impl CorrelationState {
    pub fn open(rule: &CorrelationRule, source_payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("corr-{}", Uuid::new_v4()),
            rule_id: rule.id.clone(),
            source_payload,
            source_received_at: now,
            target_payload: None,
            target_received_at: None,
            status: CorrelationStatus::Waiting,
            expires_at: now + rule.time_window(),
            closed_at: None,
            action_triggered: false,
        }
    }

    /// Whether a target arriving at `now` may still complete this state.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CorrelationStatus::Waiting && self.expires_at > now
    }

    pub fn completion_payload(&self, rule: &CorrelationRule) -> Value {
        let target_received_at = self.target_received_at.unwrap_or(self.source_received_at);
        json!({
            "source": self.source_payload,
            "target": self.target_payload.clone().unwrap_or(Value::Null),
            "correlation": {
                "ruleId": rule.id,
                "ruleName": rule.display_name(),
                "sourceReceivedAt": self.source_received_at.to_rfc3339(),
                "targetReceivedAt": target_received_at.to_rfc3339(),
                "elapsedMs": elapsed_ms(self.source_received_at, target_received_at),
            }
        })
    }

    pub fn timeout_payload(&self, rule: &CorrelationRule) -> Value {
        json!({
            "source": self.source_payload,
            "correlation": {
                "ruleId": rule.id,
                "ruleName": rule.display_name(),
                "sourceReceivedAt": self.source_received_at.to_rfc3339(),
                "expiredAt": self.expires_at.to_rfc3339(),
                "missingTarget": true,
            }
        })
    }
}

/// Pairs source and target events of cross-entity rules.
#[derive(Clone)]
pub struct CrossEntityEngine {
    store: Arc<dyn CorrelationStore>,
    gateway: Arc<dyn DispatchGateway>,
    dispatch_timeout: Duration,
}

impl CrossEntityEngine {
    pub fn new(
        store: Arc<dyn CorrelationStore>,
        gateway: Arc<dyn DispatchGateway>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            dispatch_timeout: config.dispatch_timeout(),
        }
    }

    /// Plays the event in its target role first, then in its source role, so
    /// an event never completes the state it opened itself.
    pub async fn on_event(&self, event: &Event) -> CorrelationReport {
        let mut report = CorrelationReport::new(&event.webhook_id);
        let payload = event.annotated_payload();
        let now = event.received_at;

        match self.store.rules_for_target(&event.webhook_id).await {
            Ok(rules) => {
                for rule in &rules {
                    self.complete(rule, &payload, now, &mut report).await;
                }
            }
            Err(err) => {
                warn!(webhook_id = %event.webhook_id, error = %err, "failed to load target correlation rules");
                report.push_issue(None, err.to_string());
            }
        }

        match self.store.rules_for_source(&event.webhook_id).await {
            Ok(rules) => {
                for rule in rules.iter().filter(|rule| rule.enabled) {
                    let state = CorrelationState::open(rule, payload.clone(), now);
                    let state_id = state.id.clone();
                    match self.store.open_state(state).await {
                        Ok(()) => {
                            debug!(rule_id = %rule.id, state_id = %state_id, "correlation opened");
                            report.opened_states.push(state_id);
                        }
                        Err(err) => {
                            warn!(rule_id = %rule.id, error = %err, "failed to open correlation");
                            report.push_issue(Some(&rule.id), err.to_string());
                        }
                    }
                }
            }
            Err(err) => {
                warn!(webhook_id = %event.webhook_id, error = %err, "failed to load source correlation rules");
                report.push_issue(None, err.to_string());
            }
        }

        report
    }

    async fn complete(
        &self,
        rule: &CorrelationRule,
        payload: &Value,
        now: DateTime<Utc>,
        report: &mut CorrelationReport,
    ) {
        let state = match self
            .store
            .complete_oldest_waiting(&rule.id, payload.clone(), now)
            .await
        {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(err) => {
                warn!(rule_id = %rule.id, error = %err, "failed to complete correlation");
                report.push_issue(Some(&rule.id), err.to_string());
                return;
            }
        };

        info!(rule_id = %rule.id, state_id = %state.id, "correlation completed");
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

    /// Times out every waiting state expired at `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::new(now);
        let expired = match self.store.expire_waiting(now).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "failed to expire correlations");
                report.push_issue(None, err.to_string());
                return report;
            }
        };

        for state in expired {
            report.timed_out_states.push(state.id.clone());
            let rule = match self.store.rule(&state.rule_id).await {
                Ok(Some(rule)) => rule,
                Ok(None) => {
                    debug!(rule_id = %state.rule_id, state_id = %state.id, "orphaned correlation timed out");
                    report.orphaned_states.push(state.id.clone());
                    continue;
                }
                Err(err) => {
                    warn!(rule_id = %state.rule_id, error = %err, "failed to load correlation rule");
                    report.push_issue(Some(&state.rule_id), err.to_string());
                    continue;
                }
            };

            info!(rule_id = %rule.id, state_id = %state.id, "correlation timed out");
            let Some(action) = &rule.timeout_action else {
                continue;
            };
            let payload = state.timeout_payload(&rule);
            match self
                .dispatch(&rule, &state, CorrelationTrigger::TimedOut, action, &payload)
                .await
            {
                Ok(Some(dispatch)) => report.dispatches.push(dispatch),
                Ok(None) => {}
                Err(err) => report.push_issue(Some(&rule.id), err.to_string()),
            }
        }

        report
    }

    async fn dispatch(
        &self,
        rule: &CorrelationRule,
        state: &CorrelationState,
        trigger: CorrelationTrigger,
        action: &NotificationAction,
        payload: &Value,
    ) -> Result<Option<CorrelationDispatch>, CorrelationError> {
        if !self.store.mark_action_triggered(&state.id).await? {
            debug!(state_id = %state.id, "correlation action already dispatched");
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
            kind: CorrelationKind::CrossEntity,
            trigger,
            rule_id: rule.id.clone(),
            state_id: state.id.clone(),
            results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCorrelationStore;
    use chrono::Duration as ChronoDuration;
    use hookline_dispatch::RecordingGateway;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + ChronoDuration::seconds(secs)
    }

    fn action(channel: &str, title: &str) -> NotificationAction {
        NotificationAction {
            channels: vec![channel.into()],
            title_template: Some(title.into()),
            message_template: "{{correlation.ruleName}}".into(),
            priority: Default::default(),
        }
    }

    fn backup_rule(source: &str, target: &str) -> CorrelationRule {
        CorrelationRule {
            id: "backup".into(),
            name: "Backup finished".into(),
            source_webhook_id: source.into(),
            target_webhook_id: target.into(),
            time_window_secs: 600,
            success_action: action("ok", "{{source.job}} done in {{correlation.elapsedMs}}ms"),
            timeout_action: Some(action("late", "{{source.job}} missing")),
            enabled: true,
            created_at: t0(),
        }
    }

    struct Harness {
        store: MemoryCorrelationStore,
        gateway: RecordingGateway,
        engine: CrossEntityEngine,
    }

    fn harness(rule: CorrelationRule) -> Harness {
        let store = MemoryCorrelationStore::new();
        store.put_rule(rule).expect("valid rule");
        let gateway = RecordingGateway::new();
        let engine = CrossEntityEngine::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            &EngineConfig::default(),
        );
        Harness {
            store,
            gateway,
            engine,
        }
    }

    fn event(webhook: &str, secs: i64) -> Event {
        Event::received_at(webhook, json!({"job": "nightly"}), at(secs))
    }

    #[tokio::test]
    async fn target_within_window_completes_once() {
        let h = harness(backup_rule("start", "finish"));

        let opened = h.engine.on_event(&event("start", 0)).await;
        assert_eq!(opened.opened_states.len(), 1);

        let done = h.engine.on_event(&event("finish", 90)).await;
        assert_eq!(done.completed_states, opened.opened_states);
        assert_eq!(done.dispatches.len(), 1);
        assert_eq!(done.dispatches[0].trigger, CorrelationTrigger::Completed);

        let sent = h.gateway.sent_to("ok");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "nightly done in 90000ms");
        assert_eq!(sent[0].body, "Backup finished");

        let sweep = h.engine.sweep(at(3600)).await;
        assert!(sweep.timed_out_states.is_empty());
        assert!(h.gateway.sent_to("late").is_empty());

        let states = h.store.states_for_rule("backup");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, CorrelationStatus::Completed);
        assert!(states[0].action_triggered);
    }

    #[tokio::test]
    async fn untargeted_source_times_out_once() {
        let h = harness(backup_rule("start", "finish"));
        h.engine.on_event(&event("start", 0)).await;

        let late = h.engine.on_event(&event("finish", 600)).await;
        assert!(late.completed_states.is_empty(), "expires_at is exclusive");

        let sweep = h.engine.sweep(at(600)).await;
        assert_eq!(sweep.timed_out_states.len(), 1);
        assert_eq!(sweep.dispatches.len(), 1);
        assert_eq!(h.gateway.sent_to("late")[0].title, "nightly missing");

        assert!(h.engine.sweep(at(900)).await.timed_out_states.is_empty());
        assert!(h.gateway.sent_to("ok").is_empty());
        assert_eq!(h.store.states_for_rule("backup")[0].status, CorrelationStatus::Timeout);
    }

    #[tokio::test]
    async fn target_completes_the_oldest_state() {
        let h = harness(backup_rule("start", "finish"));
        let first = h.engine.on_event(&event("start", 0)).await;
        let second = h.engine.on_event(&event("start", 10)).await;

        let done = h.engine.on_event(&event("finish", 20)).await;
        assert_eq!(done.completed_states, first.opened_states);

        let done = h.engine.on_event(&event("finish", 30)).await;
        assert_eq!(done.completed_states, second.opened_states);
        assert_eq!(h.gateway.sent_to("ok").len(), 2);
    }

    #[tokio::test]
    async fn self_correlating_webhook_pairs_consecutive_events() {
        let h = harness(backup_rule("heartbeat", "heartbeat"));

        let first = h.engine.on_event(&event("heartbeat", 0)).await;
        assert!(first.completed_states.is_empty());
        assert_eq!(first.opened_states.len(), 1);

        let second = h.engine.on_event(&event("heartbeat", 30)).await;
        assert_eq!(second.completed_states, first.opened_states);
        assert_eq!(second.opened_states.len(), 1);
    }

    #[tokio::test]
    async fn orphaned_states_time_out_silently() {
        let h = harness(backup_rule("start", "finish"));
        h.engine.on_event(&event("start", 0)).await;
        h.store.remove_rule("backup");

        let sweep = h.engine.sweep(at(601)).await;
        assert_eq!(sweep.orphaned_states.len(), 1);
        assert!(sweep.dispatches.is_empty());
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn disabled_rule_finishes_in_flight_states_only() {
        let h = harness(backup_rule("start", "finish"));
        h.engine.on_event(&event("start", 0)).await;
        h.store.set_enabled("backup", false).unwrap();

        let ignored = h.engine.on_event(&event("start", 5)).await;
        assert!(ignored.opened_states.is_empty());

        let done = h.engine.on_event(&event("finish", 10)).await;
        assert_eq!(done.completed_states.len(), 1);
        assert_eq!(h.gateway.sent_to("ok").len(), 1);
    }

    #[tokio::test]
    async fn timeout_without_action_dispatches_nothing() {
        let mut rule = backup_rule("start", "finish");
        rule.timeout_action = None;
        let h = harness(rule);
        h.engine.on_event(&event("start", 0)).await;

        let sweep = h.engine.sweep(at(700)).await;
        assert_eq!(sweep.timed_out_states.len(), 1);
        assert!(sweep.dispatches.is_empty());
    }

    #[tokio::test]
    async fn concurrent_targets_complete_a_single_state() {
        let h = harness(backup_rule("start", "finish"));
        h.engine.on_event(&event("start", 0)).await;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.on_event(&event("finish", 10 + i)).await })
            })
            .collect();
        let completed: usize = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|report| report.unwrap().completed_states.len())
            .sum();

        assert_eq!(completed, 1);
        assert_eq!(h.gateway.sent_to("ok").len(), 1);
    }

    #[test]
    fn rejects_zero_window() {
        let mut rule = backup_rule("start", "finish");
        rule.time_window_secs = 0;
        assert!(rule.validate().is_err());
    }
}
