use std::sync::Arc;

use async_trait::async_trait;
use hookline_dispatch::{DispatchGateway, DispatchResult, GatewayCapabilities, Notification};
use tokio::sync::Mutex;
use tracing::info;

/// Dry-run gateway: every notification is logged and reported as delivered.
#[derive(Clone, Default)]
pub struct LogGateway {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl LogGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl DispatchGateway for LogGateway {
    async fn send(&self, notification: &Notification) -> DispatchResult {
        info!(
            channel = %notification.channel_id,
            priority = %notification.priority,
            title = %notification.title,
            body = %notification.body,
            "notification"
        );
        self.sent.lock().await.push(notification.clone());
        DispatchResult::delivered(&notification.channel_id)
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities::available("log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_dispatch::NotificationPriority;

    #[tokio::test]
    async fn records_and_accepts_everything() {
        let gateway = LogGateway::new();
        let result = gateway
            .send(&Notification {
                channel_id: "ops".into(),
                title: "t".into(),
                body: "b".into(),
                priority: NotificationPriority::Low,
            })
            .await;

        assert!(result.success);
        assert_eq!(gateway.sent().await.len(), 1);
        assert!(gateway.capabilities().available);
    }
}
