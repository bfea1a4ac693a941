use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::RuleError;
use crate::rule::{is_debounced, Rule};

/// Result of an attempt to record a rule firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerClaim {
    /// `last_triggered_at` was updated; the caller owns this firing.
    Claimed,
    /// The rule fired too recently.
    Debounced,
    /// The rule no longer exists.
    Missing,
}

/// Read access to rules plus the single write the matcher performs.
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    /// Enabled rules for a webhook, in any order.
    async fn enabled_rules(&self, webhook_id: &str) -> Result<Vec<Rule>, RuleError>;

    /// Atomically checks the debounce window and records `now` as the last
    /// trigger time when the window has elapsed.
    async fn claim_trigger(
        &self,
        rule_id: &str,
        now: DateTime<Utc>,
        debounce: Duration,
    ) -> Result<TriggerClaim, RuleError>;
}

/// In-memory [`RuleStore`] keyed by rule id.
#[derive(Default, Clone)]
pub struct MemoryRuleStore {
    inner: Arc<RwLock<HashMap<String, Rule>>>,
}

impl MemoryRuleStore {
    /// Creates a new empty rule store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a rule, generating an id when blank.
    pub fn put_rule(&self, mut rule: Rule) -> Rule {
        if rule.id.trim().is_empty() {
            rule.id = format!("rule-{}", Uuid::new_v4());
        }
        self.inner.write().insert(rule.id.clone(), rule.clone());
        rule
    }

    pub fn get_rule(&self, rule_id: &str) -> Option<Rule> {
        self.inner.read().get(rule_id).cloned()
    }

    /// All rules of a webhook, including disabled ones.
    pub fn list_rules(&self, webhook_id: &str) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .inner
            .read()
            .values()
            .filter(|rule| rule.webhook_id == webhook_id)
            .cloned()
            .collect();
        rules.sort_by(Rule::evaluation_order);
        rules
    }

    pub fn remove_rule(&self, rule_id: &str) -> Option<Rule> {
        self.inner.write().remove(rule_id)
    }

    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<Rule, RuleError> {
        let mut inner = self.inner.write();
        let rule = inner
            .get_mut(rule_id)
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;
        rule.enabled = enabled;
        Ok(rule.clone())
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn enabled_rules(&self, webhook_id: &str) -> Result<Vec<Rule>, RuleError> {
        Ok(self
            .inner
            .read()
            .values()
            .filter(|rule| rule.webhook_id == webhook_id && rule.is_enabled())
            .cloned()
            .collect())
    }

    async fn claim_trigger(
        &self,
        rule_id: &str,
        now: DateTime<Utc>,
        debounce: Duration,
    ) -> Result<TriggerClaim, RuleError> {
        let mut inner = self.inner.write();
        let Some(rule) = inner.get_mut(rule_id) else {
            return Ok(TriggerClaim::Missing);
        };

        if is_debounced(rule.last_triggered_at, now, debounce) {
            return Ok(TriggerClaim::Debounced);
        }

        rule.last_triggered_at = Some(now);
        Ok(TriggerClaim::Claimed)
    }
}
