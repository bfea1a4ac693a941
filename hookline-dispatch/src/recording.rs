use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::gateway::{DispatchGateway, DispatchResult, GatewayCapabilities, Notification};

/// In-memory gateway that records every notification it accepts.
///
/// Useful for dry runs and tests; channels can be configured to fail and sends
/// can be slowed down to exercise dispatch timeouts.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    sent: Arc<RwLock<Vec<Notification>>>,
    failing: HashSet<String>,
    latency: Option<Duration>,
    unavailable: bool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that reports itself unavailable.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn failing_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.failing.insert(channel_id.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Snapshot of the notifications accepted so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.read().clone()
    }

    /// Notifications accepted for one channel.
    pub fn sent_to(&self, channel_id: &str) -> Vec<Notification> {
        self.sent
            .read()
            .iter()
            .filter(|notification| notification.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.write().clear();
    }
}

#[async_trait]
impl DispatchGateway for RecordingGateway {
    async fn send(&self, notification: &Notification) -> DispatchResult {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.contains(&notification.channel_id) {
            return DispatchResult::failed(&notification.channel_id, "channel rejected notification");
        }

        self.sent.write().push(notification.clone());
        DispatchResult::delivered(&notification.channel_id)
    }

    fn capabilities(&self) -> GatewayCapabilities {
        if self.unavailable {
            GatewayCapabilities::unavailable("recording")
        } else {
            GatewayCapabilities::available("recording")
        }
    }
}
