use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cross_entity::{CorrelationRule, CorrelationState};
use crate::error::CorrelationError;
use crate::field::{FieldCorrelationRule, FieldCorrelationState};

/// Storage contract of the cross-entity engine.
///
/// Every operation that changes a state must be atomic with respect to the
/// others; the engine relies on that for at-most-once dispatch.
#[async_trait]
pub trait CorrelationStore: Send + Sync + 'static {
    /// Rules whose source is `webhook_id`, disabled ones included.
    async fn rules_for_source(&self, webhook_id: &str)
        -> Result<Vec<CorrelationRule>, CorrelationError>;

    /// Rules whose target is `webhook_id`, disabled ones included.
    async fn rules_for_target(&self, webhook_id: &str)
        -> Result<Vec<CorrelationRule>, CorrelationError>;

    async fn rule(&self, rule_id: &str) -> Result<Option<CorrelationRule>, CorrelationError>;

    async fn open_state(&self, state: CorrelationState) -> Result<(), CorrelationError>;

    /// Oldest waiting state of the rule that is still unexpired at `now`.
    async fn oldest_waiting(
        &self,
        rule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CorrelationState>, CorrelationError>;

    /// Moves the oldest unexpired waiting state of the rule to `completed`,
    /// attaching the target payload. Returns the completed state.
    async fn complete_oldest_waiting(
        &self,
        rule_id: &str,
        target_payload: Value,
        now: DateTime<Utc>,
    ) -> Result<Option<CorrelationState>, CorrelationError>;

    /// Moves every waiting state with `expires_at <= now` to `timeout` and
    /// returns them. Stores may drop long-closed states here.
    async fn expire_waiting(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CorrelationState>, CorrelationError>;

    /// Compare-and-swap of `action_triggered`. Only the first caller gets `true`.
    async fn mark_action_triggered(&self, state_id: &str) -> Result<bool, CorrelationError>;
}

/// How a value was folded into a field correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// A new state was opened with this value.
    Opened,
    /// The value joined an existing state that still waits for others.
    Recorded,
    /// The value had already been received by the open state.
    Duplicate,
    /// The value was the last one missing.
    Completed,
    /// No open state exists and the rule is disabled, so none was opened.
    Closed,
    /// The rule completed less than its debounce ago; nothing was recorded.
    Debounced,
}

/// Outcome of [`FieldCorrelationStore::record_value`].
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub status: RecordStatus,
    /// State the value was folded into, absent when `Closed` or `Debounced`.
    pub state: Option<FieldCorrelationState>,
    /// Waiting states of the rule found expired and moved to `timeout`.
    pub expired: Vec<FieldCorrelationState>,
}

/// Storage contract of the field-based engine.
#[async_trait]
pub trait FieldCorrelationStore: Send + Sync + 'static {
    /// Rules owned by `webhook_id`, disabled ones included.
    async fn rules_for_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Vec<FieldCorrelationRule>, CorrelationError>;

    async fn rule(&self, rule_id: &str) -> Result<Option<FieldCorrelationRule>, CorrelationError>;

    /// Joins `value` into the rule's open state, opening one when the rule is
    /// enabled and none is open. Expired waiting states of the rule are timed
    /// out in the same step.
    ///
    /// The debounce check against the rule's last completion and, on
    /// completion, the update of that time happen atomically with the join.
    async fn record_value(
        &self,
        rule: &FieldCorrelationRule,
        value: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, CorrelationError>;

    async fn expire_waiting(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<FieldCorrelationState>, CorrelationError>;

    async fn mark_action_triggered(&self, state_id: &str) -> Result<bool, CorrelationError>;
}
