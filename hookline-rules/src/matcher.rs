use std::sync::Arc;
use std::time::Duration;

use hookline_core::EngineConfig;
use hookline_dispatch::{deliver, DispatchGateway};
use tracing::{debug, info, warn};

use crate::entity::EntityStore;
use crate::event::Event;
use crate::outcome::EvaluationReport;
use crate::rule::{MatchMode, Rule, Webhook};
use crate::store::{RuleStore, TriggerClaim};

/// Evaluates a webhook's rules against events and dispatches the actions of
/// the rules that fire.
#[derive(Clone)]
pub struct RuleMatcher {
    rules: Arc<dyn RuleStore>,
    entities: Arc<dyn EntityStore>,
    gateway: Arc<dyn DispatchGateway>,
    max_condition_depth: usize,
    dispatch_timeout: Duration,
}

impl RuleMatcher {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        entities: Arc<dyn EntityStore>,
        gateway: Arc<dyn DispatchGateway>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            rules,
            entities,
            gateway,
            max_condition_depth: config.max_condition_depth,
            dispatch_timeout: config.dispatch_timeout(),
        }
    }

    /// Runs the event through the webhook's enabled rules.
    ///
    /// Rules are visited by descending priority. In first-match mode the walk
    /// stops at the first rule that fires or is debounced. Nothing here
    /// returns an error: problems end up in the report.
    pub async fn evaluate(&self, webhook: &Webhook, event: &Event) -> EvaluationReport {
        let mut report = EvaluationReport::new(&webhook.id);
        let payload = event.annotated_payload();
        let now = event.received_at;

        let mut rules: Vec<Rule> = match self.rules.enabled_rules(&webhook.id).await {
            Ok(rules) => rules,
            Err(err) => {
                warn!(webhook_id = %webhook.id, error = %err, "failed to load rules");
                report.store_failure(err.to_string());
                return report.finish();
            }
        };
        rules.sort_by(Rule::evaluation_order);

        for rule in &rules {
            let group = match rule.condition_group(self.max_condition_depth) {
                Ok(group) => group,
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "skipping rule with invalid conditions");
                    report.push_issue(Some(&rule.id), err.to_string());
                    continue;
                }
            };

            if !group.evaluate_with(&payload, self.entities.as_ref()).await {
                continue;
            }

            debug!(rule_id = %rule.id, "rule matched event");
            let claim = match self.rules.claim_trigger(&rule.id, now, rule.debounce()).await {
                Ok(claim) => claim,
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "failed to record rule trigger");
                    report.push_issue(Some(&rule.id), err.to_string());
                    continue;
                }
            };

            match claim {
                TriggerClaim::Missing => {
                    debug!(rule_id = %rule.id, "rule removed during evaluation");
                    continue;
                }
                TriggerClaim::Debounced => {
                    debug!(rule_id = %rule.id, "rule debounced");
                    report.record_skipped(&rule.id);
                }
                TriggerClaim::Claimed => {
                    let notifications = rule.action.render(&payload, rule.display_name());
                    let results =
                        deliver(self.gateway.as_ref(), &notifications, self.dispatch_timeout).await;
                    info!(
                        rule_id = %rule.id,
                        channels = notifications.len(),
                        delivered = results.iter().filter(|result| result.success).count(),
                        "rule fired"
                    );
                    report.record_fired(&rule.id, results);
                }
            }

            if webhook.match_mode == MatchMode::FirstMatch {
                break;
            }
        }

        report.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::NotificationAction;
    use crate::entity::MemoryEntityStore;
    use crate::outcome::EvaluationStatus;
    use crate::store::MemoryRuleStore;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use hookline_dispatch::RecordingGateway;
    use serde_json::{json, Value};

    struct Harness {
        store: MemoryRuleStore,
        gateway: RecordingGateway,
        matcher: RuleMatcher,
    }

    fn harness_with(gateway: RecordingGateway) -> Harness {
        let store = MemoryRuleStore::new();
        let matcher = RuleMatcher::new(
            Arc::new(store.clone()),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(gateway.clone()),
            &EngineConfig::default(),
        );
        Harness {
            store,
            gateway,
            matcher,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingGateway::new())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn rule(id: &str, priority: i32, conditions: Value, debounce_secs: u64) -> Rule {
        Rule {
            id: id.into(),
            webhook_id: "hook".into(),
            name: format!("rule {id}"),
            conditions,
            action: NotificationAction {
                channels: vec![format!("{id}-channel")],
                title_template: Some("{{host}} is {{status}}".into()),
                message_template: "fired by {{_meta.webhookId}}".into(),
                priority: Default::default(),
            },
            priority,
            enabled: true,
            debounce_secs,
            created_at: t0(),
            last_triggered_at: None,
        }
    }

    fn status_is_down() -> Value {
        json!({"logic": "AND", "conditions": [{"field": "status", "operator": "equals", "value": "down"}]})
    }

    fn down_event(at: DateTime<Utc>) -> Event {
        Event::received_at("hook", json!({"host": "db-1", "status": "down"}), at)
    }

    #[tokio::test]
    async fn fires_matching_rule_with_rendered_templates() {
        let h = harness();
        h.store.put_rule(rule("a", 1, status_is_down(), 0));

        let report = h.matcher.evaluate(&Webhook::new("hook", MatchMode::FirstMatch), &down_event(t0())).await;

        assert_eq!(report.status, EvaluationStatus::Success);
        assert_eq!(report.fired_rule_ids, vec!["a"]);
        let sent = h.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "db-1 is down");
        assert_eq!(sent[0].body, "fired by hook");
    }

    #[tokio::test]
    async fn non_matching_event_is_no_match() {
        let h = harness();
        h.store.put_rule(rule("a", 1, status_is_down(), 0));
        let event = Event::received_at("hook", json!({"status": "up"}), t0());

        let report = h.matcher.evaluate(&Webhook::new("hook", MatchMode::AllMatches), &event).await;
        assert_eq!(report.status, EvaluationStatus::NoMatch);
        assert!(!report.notification_sent);
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn debounce_skips_then_refires() {
        let h = harness();
        h.store.put_rule(rule("a", 1, status_is_down(), 300));
        let webhook = Webhook::new("hook", MatchMode::FirstMatch);

        let first = h.matcher.evaluate(&webhook, &down_event(t0())).await;
        assert_eq!(first.status, EvaluationStatus::Success);

        let second = h
            .matcher
            .evaluate(&webhook, &down_event(t0() + ChronoDuration::seconds(120)))
            .await;
        assert_eq!(second.status, EvaluationStatus::Skipped);
        assert_eq!(second.skipped_rule_ids, vec!["a"]);

        let third = h
            .matcher
            .evaluate(&webhook, &down_event(t0() + ChronoDuration::seconds(301)))
            .await;
        assert_eq!(third.status, EvaluationStatus::Success);
        assert_eq!(h.gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn first_match_fires_only_highest_priority() {
        let h = harness();
        h.store.put_rule(rule("low", 10, status_is_down(), 0));
        h.store.put_rule(rule("high", 100, status_is_down(), 0));

        let report = h.matcher.evaluate(&Webhook::new("hook", MatchMode::FirstMatch), &down_event(t0())).await;
        assert_eq!(report.fired_rule_ids, vec!["high"]);
        assert_eq!(h.gateway.sent_to("low-channel").len(), 0);
    }

    #[tokio::test]
    async fn all_matches_fires_every_rule() {
        let h = harness();
        h.store.put_rule(rule("low", 10, status_is_down(), 0));
        h.store.put_rule(rule("high", 100, status_is_down(), 0));

        let report = h.matcher.evaluate(&Webhook::new("hook", MatchMode::AllMatches), &down_event(t0())).await;
        assert_eq!(report.fired_rule_ids, vec!["high", "low"]);
        assert_eq!(h.gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn first_match_stops_at_debounced_rule() {
        let h = harness();
        let mut high = rule("high", 100, status_is_down(), 600);
        high.last_triggered_at = Some(t0());
        h.store.put_rule(high);
        h.store.put_rule(rule("low", 10, status_is_down(), 0));
        let event = down_event(t0() + ChronoDuration::seconds(5));

        let first = h.matcher.evaluate(&Webhook::new("hook", MatchMode::FirstMatch), &event).await;
        assert_eq!(first.status, EvaluationStatus::Skipped);
        assert!(first.fired_rule_ids.is_empty());

        let all = h.matcher.evaluate(&Webhook::new("hook", MatchMode::AllMatches), &event).await;
        assert_eq!(all.status, EvaluationStatus::Success);
        assert_eq!(all.skipped_rule_ids, vec!["high"]);
        assert_eq!(all.fired_rule_ids, vec!["low"]);
    }

    #[tokio::test]
    async fn corrupt_rule_is_reported_and_skipped() {
        let h = harness();
        h.store.put_rule(rule("broken", 100, json!({"conditions": [{"field": "x", "operator": "bogus"}]}), 0));
        h.store.put_rule(rule("ok", 1, status_is_down(), 0));

        let report = h.matcher.evaluate(&Webhook::new("hook", MatchMode::FirstMatch), &down_event(t0())).await;
        assert_eq!(report.fired_rule_ids, vec!["ok"]);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].rule_id.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn failed_channels_make_the_event_failed() {
        let h = harness_with(RecordingGateway::new().failing_channel("a-channel"));
        h.store.put_rule(rule("a", 1, status_is_down(), 0));

        let report = h.matcher.evaluate(&Webhook::new("hook", MatchMode::FirstMatch), &down_event(t0())).await;
        assert_eq!(report.status, EvaluationStatus::Failed);
        assert_eq!(report.fired_rule_ids, vec!["a"]);
        assert!(!report.dispatches[0].result.success);
    }

    #[tokio::test]
    async fn entity_operators_read_the_entity_store() {
        let store = MemoryRuleStore::new();
        let entities = MemoryEntityStore::new();
        let gateway = RecordingGateway::new();
        let matcher = RuleMatcher::new(
            Arc::new(store.clone()),
            Arc::new(entities.clone()),
            Arc::new(gateway.clone()),
            &EngineConfig::default(),
        );
        store.put_rule(rule(
            "backup-down",
            1,
            json!({"conditions": [{"field": "backup-1", "operator": "entity_is_offline"}]}),
            0,
        ));
        let webhook = Webhook::new("hook", MatchMode::FirstMatch);

        let report = matcher.evaluate(&webhook, &down_event(t0())).await;
        assert_eq!(report.status, EvaluationStatus::Success, "absent entity counts as offline");

        entities.upsert("backup-1", true, Value::Null).await.unwrap();
        let report = matcher.evaluate(&webhook, &down_event(t0())).await;
        assert_eq!(report.status, EvaluationStatus::NoMatch);
    }

    #[tokio::test]
    async fn slow_channel_counts_as_failed() {
        let store = MemoryRuleStore::new();
        let gateway = RecordingGateway::new().with_latency(std::time::Duration::from_millis(300));
        let config = EngineConfig {
            dispatch_timeout_ms: 20,
            ..EngineConfig::default()
        };
        let matcher = RuleMatcher::new(
            Arc::new(store.clone()),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(gateway),
            &config,
        );
        store.put_rule(rule("a", 1, status_is_down(), 0));

        let report = matcher.evaluate(&Webhook::new("hook", MatchMode::FirstMatch), &down_event(t0())).await;
        assert_eq!(report.status, EvaluationStatus::Failed);
    }
}
