use hookline_dispatch::DispatchResult;
use serde::Serialize;

/// Webhook-level result of evaluating one event.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// At least one channel accepted a notification.
    Success,
    /// Rules fired but no channel accepted a notification, or rules could
    /// not be read at all.
    Failed,
    /// Matching rules were all debounced.
    Skipped,
    NoMatch,
}

/// A rule that could not be evaluated, or a store failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleIssue {
    pub rule_id: Option<String>,
    pub message: String,
}

/// One channel send performed for a fired rule.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleDispatch {
    pub rule_id: String,
    #[serde(flatten)]
    pub result: DispatchResult,
}

/// Aggregated view of how a webhook's rules handled an event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvaluationReport {
    pub webhook_id: String,
    pub status: EvaluationStatus,
    pub fired_rule_ids: Vec<String>,
    pub skipped_rule_ids: Vec<String>,
    pub notification_sent: bool,
    pub dispatches: Vec<RuleDispatch>,
    pub issues: Vec<RuleIssue>,
    #[serde(skip)]
    store_failed: bool,
}

impl EvaluationReport {
    pub fn new(webhook_id: impl Into<String>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            status: EvaluationStatus::NoMatch,
            fired_rule_ids: Vec::new(),
            skipped_rule_ids: Vec::new(),
            notification_sent: false,
            dispatches: Vec::new(),
            issues: Vec::new(),
            store_failed: false,
        }
    }

    pub fn record_fired(&mut self, rule_id: impl Into<String>, results: Vec<DispatchResult>) {
        let rule_id = rule_id.into();
        self.dispatches
            .extend(results.into_iter().map(|result| RuleDispatch {
                rule_id: rule_id.clone(),
                result,
            }));
        self.fired_rule_ids.push(rule_id);
    }

    pub fn record_skipped(&mut self, rule_id: impl Into<String>) {
        self.skipped_rule_ids.push(rule_id.into());
    }

    pub fn push_issue(&mut self, rule_id: Option<&str>, message: impl Into<String>) {
        self.issues.push(RuleIssue {
            rule_id: rule_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Records that the rule set itself could not be read.
    pub fn store_failure(&mut self, message: impl Into<String>) {
        self.store_failed = true;
        self.push_issue(None, message);
    }

    /// Derives the webhook-level status from the recorded rule outcomes.
    pub fn finish(mut self) -> Self {
        self.notification_sent = self.dispatches.iter().any(|dispatch| dispatch.result.success);
        self.status = if self.notification_sent {
            EvaluationStatus::Success
        } else if !self.fired_rule_ids.is_empty() {
            EvaluationStatus::Failed
        } else if !self.skipped_rule_ids.is_empty() {
            EvaluationStatus::Skipped
        } else if self.store_failed {
            EvaluationStatus::Failed
        } else {
            EvaluationStatus::NoMatch
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_success_wins() {
        let mut report = EvaluationReport::new("hook");
        report.record_fired("a", vec![DispatchResult::failed("x", "down")]);
        report.record_fired("b", vec![DispatchResult::delivered("y")]);
        report.record_skipped("c");
        let report = report.finish();
        assert_eq!(report.status, EvaluationStatus::Success);
        assert!(report.notification_sent);
    }

    #[test]
    fn fired_without_delivery_is_failed() {
        let mut report = EvaluationReport::new("hook");
        report.record_fired("a", vec![]);
        report.record_skipped("b");
        assert_eq!(report.finish().status, EvaluationStatus::Failed);
    }

    #[test]
    fn only_debounced_is_skipped() {
        let mut report = EvaluationReport::new("hook");
        report.record_skipped("a");
        assert_eq!(report.finish().status, EvaluationStatus::Skipped);
        assert_eq!(EvaluationReport::new("hook").finish().status, EvaluationStatus::NoMatch);
    }

    #[test]
    fn store_failure_is_failed() {
        let mut report = EvaluationReport::new("hook");
        report.store_failure("database unavailable");
        let report = report.finish();
        assert_eq!(report.status, EvaluationStatus::Failed);
        assert_eq!(report.issues[0].rule_id, None);
    }
}
