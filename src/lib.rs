//! Hookline: rule matching and event correlation for monitoring webhooks.
//!
//! [`HookEngine`] ties the workspace together. An inbound delivery is
//! annotated, may update the status of the entity it describes, runs through
//! the webhook's rules and is handed to both correlation engines in the
//! background:
//!
//! ```text
//! body ──► Event ──► entity update ──► RuleMatcher ──► DispatchGateway
//!                         │
//!                         └──► CorrelationEngine (spawned) ──► DispatchGateway
//! ```
//!
//! Timeouts of correlation windows are driven by [`HookEngine::sweep_expired`]
//! or by the [`ExpirySweeper`] returned from [`HookEngine::start_sweeper`].

pub mod bundle;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

pub use bundle::{load_bundle, parse_bundle, RuleBundle};
pub use hookline_core::{EngineConfig, HooklineError};
pub use hookline_correlation::{
    CorrelationEngine, CorrelationReport, CorrelationRule, CorrelationStore, CrossEntityEngine,
    ExpirySweeper, FieldCorrelationEngine, FieldCorrelationRule, FieldCorrelationStore,
    MemoryCorrelationStore, MemoryFieldCorrelationStore, SweepReport,
};
pub use hookline_dispatch::{DispatchGateway, Notification, RecordingGateway};
pub use hookline_rules::{
    EntityStore, EvaluationReport, EvaluationStatus, Event, MatchMode, MemoryEntityStore,
    MemoryRuleStore, Rule, RuleMatcher, RuleStore, Webhook,
};

/// Store collaborators consumed by the engine.
#[derive(Clone)]
pub struct EngineStores {
    pub rules: Arc<dyn RuleStore>,
    pub entities: Arc<dyn EntityStore>,
    pub correlations: Arc<dyn CorrelationStore>,
    pub field_correlations: Arc<dyn FieldCorrelationStore>,
}

/// In-memory implementations of every store, sharing state with the
/// [`EngineStores`] built from them.
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub rules: MemoryRuleStore,
    pub entities: MemoryEntityStore,
    pub correlations: MemoryCorrelationStore,
    pub field_correlations: MemoryFieldCorrelationStore,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores whose correlation state retention follows `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            correlations: MemoryCorrelationStore::from_config(config),
            field_correlations: MemoryFieldCorrelationStore::from_config(config),
            ..Self::default()
        }
    }

    pub fn engine_stores(&self) -> EngineStores {
        EngineStores {
            rules: Arc::new(self.rules.clone()),
            entities: Arc::new(self.entities.clone()),
            correlations: Arc::new(self.correlations.clone()),
            field_correlations: Arc::new(self.field_correlations.clone()),
        }
    }
}

/// Everything that happened to one inbound delivery.
pub struct HandledEvent {
    pub event: Event,
    pub evaluation: EvaluationReport,
    /// Correlation processing, running independently of the evaluation.
    pub correlations: JoinHandle<CorrelationReport>,
}

#[derive(Clone)]
pub struct HookEngine {
    config: EngineConfig,
    entities: Arc<dyn EntityStore>,
    matcher: RuleMatcher,
    correlations: CorrelationEngine,
}

impl HookEngine {
    pub fn new(
        stores: EngineStores,
        gateway: Arc<dyn DispatchGateway>,
        config: EngineConfig,
    ) -> Self {
        let matcher = RuleMatcher::new(
            stores.rules,
            stores.entities.clone(),
            gateway.clone(),
            &config,
        );
        let correlations = CorrelationEngine::new(
            CrossEntityEngine::new(stores.correlations, gateway.clone(), &config),
            FieldCorrelationEngine::new(
                stores.field_correlations,
                stores.entities.clone(),
                gateway,
                &config,
            ),
        );

        Self {
            config,
            entities: stores.entities,
            matcher,
            correlations,
        }
    }

    /// Builds an engine over in-memory stores.
    pub fn in_memory(
        stores: &MemoryStores,
        gateway: Arc<dyn DispatchGateway>,
        config: EngineConfig,
    ) -> Self {
        Self::new(stores.engine_stores(), gateway, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the event through the webhook's rules and dispatches the actions
    /// of the rules that fire.
    pub async fn evaluate(&self, webhook: &Webhook, event: &Event) -> EvaluationReport {
        self.matcher.evaluate(webhook, event).await
    }

    /// Hands the event to both correlation engines without waiting for them.
    pub fn on_event(&self, event: Event) -> JoinHandle<CorrelationReport> {
        let correlations = self.correlations.clone();
        tokio::spawn(async move { correlations.on_event(&event).await })
    }

    /// Awaitable variant of [`HookEngine::on_event`].
    pub async fn process_correlations(&self, event: &Event) -> CorrelationReport {
        self.correlations.on_event(event).await
    }

    pub async fn sweep_expired(&self) -> SweepReport {
        self.correlations.sweep().await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.correlations.sweep_at(now).await
    }

    /// Starts the background sweep on the configured cadence.
    pub fn start_sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::start(self.correlations.clone(), self.config.sweep_interval())
    }

    /// Full processing of an already-built event: entity update, rule
    /// evaluation and background correlation.
    pub async fn handle(&self, webhook: &Webhook, event: Event) -> HandledEvent {
        if let Some(state) =
            hookline_rules::record_entity_status(self.entities.as_ref(), &event.payload, &self.config)
                .await
        {
            debug!(webhook_id = %webhook.id, entity = %state.name, "event updated entity");
        }

        let correlations = self.on_event(event.clone());
        let evaluation = self.evaluate(webhook, &event).await;
        HandledEvent {
            event,
            evaluation,
            correlations,
        }
    }

    /// Processes a raw request body received by `webhook`. Bodies that are
    /// not JSON are treated as an empty payload.
    pub async fn handle_event(&self, webhook: &Webhook, body: &[u8]) -> HandledEvent {
        self.handle(webhook, Event::from_bytes(&webhook.id, body)).await
    }
}
