use chrono::{DateTime, Utc};
use hookline_rules::Event;

use crate::cross_entity::CrossEntityEngine;
use crate::field::FieldCorrelationEngine;
use crate::report::{CorrelationReport, SweepReport};

/// Both correlation engines behind a single entry point.
#[derive(Clone)]
pub struct CorrelationEngine {
    cross_entity: CrossEntityEngine,
    field: FieldCorrelationEngine,
}

impl CorrelationEngine {
    pub fn new(cross_entity: CrossEntityEngine, field: FieldCorrelationEngine) -> Self {
        Self {
            cross_entity,
            field,
        }
    }

    pub fn cross_entity(&self) -> &CrossEntityEngine {
        &self.cross_entity
    }

    pub fn field(&self) -> &FieldCorrelationEngine {
        &self.field
    }

    /// Feeds the event to both engines concurrently.
    pub async fn on_event(&self, event: &Event) -> CorrelationReport {
        let (mut report, field) =
            tokio::join!(self.cross_entity.on_event(event), self.field.on_event(event));
        report.merge(field);
        report
    }

    /// Times out every state expired at `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let (mut report, field) =
            tokio::join!(self.cross_entity.sweep(now), self.field.sweep(now));
        report.merge(field);
        report
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }
}
