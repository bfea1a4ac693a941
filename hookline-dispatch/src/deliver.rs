use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::gateway::{DispatchGateway, DispatchResult, Notification};

/// Sends every notification concurrently, each bounded by `timeout`.
///
/// Results are returned in the order of `notifications`. An unavailable
/// gateway is never called.
pub async fn deliver(
    gateway: &dyn DispatchGateway,
    notifications: &[Notification],
    timeout: Duration,
) -> Vec<DispatchResult> {
    let capabilities = gateway.capabilities();
    if !capabilities.available {
        warn!(gateway = %capabilities.name, "dispatch gateway unavailable, skipping sends");
        return notifications
            .iter()
            .map(|notification| {
                DispatchResult::failed(&notification.channel_id, "gateway unavailable")
            })
            .collect();
    }

    let sends = notifications.iter().map(|notification| async move {
        match tokio::time::timeout(timeout, gateway.send(notification)).await {
            Ok(result) => {
                if result.success {
                    debug!(channel = %notification.channel_id, "notification delivered");
                } else {
                    warn!(channel = %notification.channel_id, error = ?result.error, "notification failed");
                }
                result
            }
            Err(_) => {
                warn!(channel = %notification.channel_id, ?timeout, "notification send timed out");
                DispatchResult::failed(
                    &notification.channel_id,
                    format!("dispatch timed out after {}ms", timeout.as_millis()),
                )
            }
        }
    });

    join_all(sends).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingGateway;

    fn notification(channel: &str) -> Notification {
        Notification {
            channel_id: channel.to_string(),
            title: "title".into(),
            body: "body".into(),
            priority: Default::default(),
        }
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_others() {
        let gateway = RecordingGateway::new().failing_channel("broken");
        let results = deliver(
            &gateway,
            &[notification("ok"), notification("broken")],
            Duration::from_secs(1),
        )
        .await;

        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn hung_channel_becomes_failure() {
        let gateway = RecordingGateway::new().with_latency(Duration::from_millis(500));
        let results = deliver(&gateway, &[notification("slow")], Duration::from_millis(20)).await;

        assert!(!results[0].success);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn unavailable_gateway_fails_every_channel() {
        let gateway = RecordingGateway::unavailable();
        let results = deliver(
            &gateway,
            &[notification("a"), notification("b")],
            Duration::from_secs(1),
        )
        .await;

        assert!(results.iter().all(|result| !result.success));
        assert!(gateway.sent().is_empty());
    }
}
