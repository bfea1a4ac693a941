use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::engine::CorrelationEngine;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Background task sweeping expired correlation states on a fixed cadence.
pub struct ExpirySweeper {
    notify: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Spawns the sweep loop. The first sweep runs immediately.
    pub fn start(engine: CorrelationEngine, interval: Duration) -> Self {
        let notify = Arc::new(Notify::new());
        let shutting_down = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(sweep_loop(
            engine,
            interval.max(MIN_INTERVAL),
            notify.clone(),
            shutting_down.clone(),
        ));

        Self {
            notify,
            shutting_down,
            worker,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Stops the loop once the sweep in progress, if any, has finished.
    pub async fn shutdown(self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.notify.notify_one();
        if let Err(err) = self.worker.await {
            error!("expiry sweeper crashed: {:?}", err);
        }
    }
}

async fn sweep_loop(
    engine: CorrelationEngine,
    interval: Duration,
    notify: Arc<Notify>,
    shutting_down: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = notify.notified() => {}
        }
        if shutting_down.load(Ordering::Relaxed) {
            break;
        }

        let report = engine.sweep().await;
        if !report.is_empty() {
            info!(
                timed_out = report.timed_out_states.len(),
                orphaned = report.orphaned_states.len(),
                dispatched = report.dispatches.len(),
                issues = report.issues.len(),
                "expired correlations swept"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_entity::{CorrelationRule, CorrelationState, CrossEntityEngine};
    use crate::field::FieldCorrelationEngine;
    use crate::memory::{MemoryCorrelationStore, MemoryFieldCorrelationStore};
    use crate::report::CorrelationStatus;
    use crate::store::CorrelationStore;
    use chrono::{DateTime, Utc};
    use hookline_core::EngineConfig;
    use hookline_dispatch::RecordingGateway;
    use hookline_rules::{MemoryEntityStore, NotificationAction};
    use serde_json::json;

    fn engine(store: &MemoryCorrelationStore, gateway: &RecordingGateway) -> CorrelationEngine {
        let config = EngineConfig::default();
        CorrelationEngine::new(
            CrossEntityEngine::new(Arc::new(store.clone()), Arc::new(gateway.clone()), &config),
            FieldCorrelationEngine::new(
                Arc::new(MemoryFieldCorrelationStore::new()),
                Arc::new(MemoryEntityStore::new()),
                Arc::new(gateway.clone()),
                &config,
            ),
        )
    }

    #[tokio::test]
    async fn sweeps_in_the_background_until_shutdown() {
        let store = MemoryCorrelationStore::new();
        let gateway = RecordingGateway::new();
        let action = NotificationAction {
            channels: vec!["late".into()],
            title_template: None,
            message_template: "{{correlation.missingTarget}}".into(),
            priority: Default::default(),
        };
        let rule = store
            .put_rule(CorrelationRule {
                id: "pair".into(),
                name: "pair".into(),
                source_webhook_id: "src".into(),
                target_webhook_id: "dst".into(),
                time_window_secs: 60,
                success_action: action.clone(),
                timeout_action: Some(action),
                enabled: true,
                created_at: Utc::now(),
            })
            .unwrap();
        let long_ago = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        store
            .open_state(CorrelationState::open(&rule, json!({}), long_ago))
            .await
            .unwrap();

        let sweeper = ExpirySweeper::start(engine(&store, &gateway), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sweeper.is_running());
        sweeper.shutdown().await;

        let sent = gateway.sent_to("late");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "true");
        assert_eq!(store.states()[0].status, CorrelationStatus::Timeout);
    }
}
