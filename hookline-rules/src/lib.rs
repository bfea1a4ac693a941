//! Rule evaluation for Hookline webhooks.
//!
//! A webhook owns a set of rules. Each rule carries a condition tree
//! (`AND`/`OR` groups of field comparisons and entity-status checks), a
//! notification action and a debounce window. [`RuleMatcher`] walks the
//! enabled rules of a webhook by priority, honours the webhook's
//! [`MatchMode`] and hands rendered notifications to a dispatch gateway.

mod action;
mod condition;
mod entity;
mod error;
mod event;
mod matcher;
mod outcome;
mod path;
mod rule;
mod store;
pub mod template;

pub use action::NotificationAction;
pub use condition::{Condition, ConditionGroup, ConditionNode, EvaluationContext, Logic, Operator};
pub use entity::{
    observe_entity, record_entity_status, EntityObservation, EntityState, EntityStore,
    MemoryEntityStore,
};
pub use error::RuleError;
pub use event::{Event, META_KEY};
pub use matcher::RuleMatcher;
pub use outcome::{EvaluationReport, EvaluationStatus, RuleDispatch, RuleIssue};
pub use path::{resolve, FieldPath};
pub use rule::{is_debounced, seconds, MatchMode, Rule, Webhook};
pub use store::{MemoryRuleStore, RuleStore, TriggerClaim};
