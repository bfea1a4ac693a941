//! Event correlation for Hookline.
//!
//! Two engines keep state across events:
//!
//! * [`CrossEntityEngine`] pairs an event on a source webhook with a later
//!   event on a target webhook inside a time window.
//! * [`FieldCorrelationEngine`] waits until events of one webhook have carried
//!   every expected value of a payload field.
//!
//! Each state is acted upon at most once: the stores claim `action_triggered`
//! with a compare-and-swap before anything is dispatched, and the
//! [`ExpirySweeper`] uses the same guard as live events.

mod cross_entity;
mod dispatch;
mod engine;
mod error;
mod field;
mod memory;
mod report;
mod store;
mod sweeper;

pub use cross_entity::{CorrelationRule, CorrelationState, CrossEntityEngine};
pub use engine::CorrelationEngine;
pub use error::CorrelationError;
pub use field::{FieldCorrelationEngine, FieldCorrelationRule, FieldCorrelationState};
pub use memory::{MemoryCorrelationStore, MemoryFieldCorrelationStore};
pub use report::{
    CorrelationDispatch, CorrelationKind, CorrelationReport, CorrelationStatus,
    CorrelationTrigger, SweepReport,
};
pub use store::{CorrelationStore, FieldCorrelationStore, RecordOutcome, RecordStatus};
pub use sweeper::ExpirySweeper;
