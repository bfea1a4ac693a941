use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::NotificationAction;
use crate::condition::ConditionGroup;
use crate::error::RuleError;

/// How many rules may fire for one event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Stop at the first matching rule.
    #[default]
    FirstMatch,
    /// Fire every matching rule.
    AllMatches,
}

/// Inbound endpoint identity owning rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub match_mode: MatchMode,
}

impl Webhook {
    pub fn new(id: impl Into<String>, match_mode: MatchMode) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            match_mode,
        }
    }
}

/// Condition tree plus notification action evaluated for a webhook's events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: String,
    pub webhook_id: String,
    #[serde(default)]
    pub name: String,
    /// Stored condition tree, parsed on every evaluation.
    #[serde(default)]
    pub conditions: Value,
    pub action: NotificationAction,
    /// Higher values are evaluated first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "Rule::default_enabled")]
    pub enabled: bool,
    /// Minimum number of seconds between two firings.
    #[serde(default)]
    pub debounce_secs: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Rule {
    pub fn default_enabled() -> bool {
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn debounce(&self) -> Duration {
        seconds(self.debounce_secs)
    }

    /// Parses the stored condition tree. A missing tree is an error.
    pub fn condition_group(&self, max_depth: usize) -> Result<ConditionGroup, RuleError> {
        if self.conditions.is_null() {
            return Err(RuleError::invalid_rule(&self.id, "missing condition group"));
        }
        ConditionGroup::parse(&self.conditions, max_depth)
    }

    /// Display name, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Evaluation order: priority descending, then creation order, then id.
    pub fn evaluation_order(a: &Rule, b: &Rule) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    }
}

/// Whether `last` lies within `debounce` of `now`.
pub fn is_debounced(last: Option<DateTime<Utc>>, now: DateTime<Utc>, debounce: Duration) -> bool {
    match last {
        Some(last) if debounce > Duration::zero() => now - last < debounce,
        _ => false,
    }
}

/// Converts stored seconds into a chrono duration, capped at a century.
pub fn seconds(secs: u64) -> Duration {
    const MAX_SECS: u64 = 100 * 365 * 24 * 60 * 60;
    Duration::seconds(secs.min(MAX_SECS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(id: &str, priority: i32, created_offset: i64) -> Rule {
        Rule {
            id: id.into(),
            webhook_id: "hook".into(),
            name: String::new(),
            conditions: json!({"logic": "AND", "conditions": []}),
            action: NotificationAction {
                channels: vec![],
                title_template: None,
                message_template: String::new(),
                priority: Default::default(),
            },
            priority,
            enabled: true,
            debounce_secs: 0,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + created_offset, 0).unwrap(),
            last_triggered_at: None,
        }
    }

    #[test]
    fn orders_by_priority_then_creation() {
        let mut rules = vec![rule("late", 10, 5), rule("low", 1, 0), rule("early", 10, 1), rule("top", 100, 9)];
        rules.sort_by(Rule::evaluation_order);
        let ids: Vec<_> = rules.iter().map(|rule| rule.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "early", "late", "low"]);
    }

    #[test]
    fn debounce_window() {
        let now = Utc::now();
        assert!(!is_debounced(None, now, Duration::seconds(60)));
        assert!(is_debounced(Some(now - Duration::seconds(10)), now, Duration::seconds(60)));
        assert!(!is_debounced(Some(now - Duration::seconds(60)), now, Duration::seconds(60)));
        assert!(!is_debounced(Some(now), now, Duration::zero()));
    }

    #[test]
    fn missing_conditions_are_invalid() {
        let mut broken = rule("broken", 1, 0);
        broken.conditions = Value::Null;
        assert!(broken.condition_group(10).is_err());
        assert_eq!(broken.display_name(), "broken");
    }

    #[test]
    fn deserializes_with_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "r1",
            "webhook_id": "hook",
            "conditions": {"conditions": []},
            "action": {"channels": ["ops"], "message_template": "x"}
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.priority, 0);
        assert!(rule.last_triggered_at.is_none());
    }
}
