use chrono::{DateTime, Utc};
use hookline_dispatch::DispatchResult;
use hookline_rules::RuleIssue;
use serde::{Deserialize, Serialize};

/// Lifecycle of a correlation state. Only `Waiting` states can change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    #[default]
    Waiting,
    Completed,
    Timeout,
}

/// Which correlation engine produced a dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    CrossEntity,
    Field,
}

/// Why a correlation action was dispatched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationTrigger {
    Completed,
    TimedOut,
}

/// Channel sends performed for one correlation state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CorrelationDispatch {
    pub kind: CorrelationKind,
    pub trigger: CorrelationTrigger,
    pub rule_id: String,
    pub state_id: String,
    pub results: Vec<DispatchResult>,
}

impl CorrelationDispatch {
    pub fn delivered(&self) -> bool {
        self.results.iter().any(|result| result.success)
    }
}

/// What the correlation engines did with one event.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CorrelationReport {
    pub webhook_id: String,
    pub opened_states: Vec<String>,
    pub completed_states: Vec<String>,
    pub timed_out_states: Vec<String>,
    pub debounced_rule_ids: Vec<String>,
    pub dispatches: Vec<CorrelationDispatch>,
    pub issues: Vec<RuleIssue>,
}

impl CorrelationReport {
    pub fn new(webhook_id: impl Into<String>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            opened_states: Vec::new(),
            completed_states: Vec::new(),
            timed_out_states: Vec::new(),
            debounced_rule_ids: Vec::new(),
            dispatches: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn push_issue(&mut self, rule_id: Option<&str>, message: impl Into<String>) {
        self.issues.push(RuleIssue {
            rule_id: rule_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Folds another report for the same event into this one.
    pub fn merge(&mut self, other: CorrelationReport) {
        self.opened_states.extend(other.opened_states);
        self.completed_states.extend(other.completed_states);
        self.timed_out_states.extend(other.timed_out_states);
        self.debounced_rule_ids.extend(other.debounced_rule_ids);
        self.dispatches.extend(other.dispatches);
        self.issues.extend(other.issues);
    }
}

/// Result of one expiry sweep across both engines.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SweepReport {
    pub swept_at: DateTime<Utc>,
    pub timed_out_states: Vec<String>,
    /// Expired states whose rule no longer exists. Nothing is dispatched for them.
    pub orphaned_states: Vec<String>,
    pub dispatches: Vec<CorrelationDispatch>,
    pub issues: Vec<RuleIssue>,
}

impl SweepReport {
    pub fn new(swept_at: DateTime<Utc>) -> Self {
        Self {
            swept_at,
            timed_out_states: Vec::new(),
            orphaned_states: Vec::new(),
            dispatches: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn push_issue(&mut self, rule_id: Option<&str>, message: impl Into<String>) {
        self.issues.push(RuleIssue {
            rule_id: rule_id.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.timed_out_states.extend(other.timed_out_states);
        self.orphaned_states.extend(other.orphaned_states);
        self.dispatches.extend(other.dispatches);
        self.issues.extend(other.issues);
    }

    pub fn is_empty(&self) -> bool {
        self.timed_out_states.is_empty() && self.issues.is_empty()
    }
}
