use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::DispatchError;
use crate::gateway::{
    DispatchGateway, DispatchResult, GatewayCapabilities, Notification, NotificationPriority,
};

/// Connection details for one HTTP channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpChannel {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Gateway that POSTs a JSON document to the channel's URL.
#[derive(Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    channels: HashMap<String, (Url, HashMap<String, String>)>,
}

impl HttpGateway {
    /// Creates a gateway for the provided channel registry, validating every URL.
    pub fn new(channels: HashMap<String, HttpChannel>) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| DispatchError::Client(err.to_string()))?;

        let mut parsed = HashMap::with_capacity(channels.len());
        for (id, channel) in channels {
            let url = Url::parse(&channel.url).map_err(|err| DispatchError::InvalidUrl {
                url: channel.url.clone(),
                source: err,
            })?;
            parsed.insert(id, (url, channel.headers));
        }

        Ok(Self {
            http,
            channels: parsed,
        })
    }

    /// Identifiers of the configured channels.
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}

#[derive(Debug, Serialize)]
struct HttpNotification<'a> {
    channel: &'a str,
    title: &'a str,
    body: &'a str,
    priority: NotificationPriority,
}

#[async_trait]
impl DispatchGateway for HttpGateway {
    async fn send(&self, notification: &Notification) -> DispatchResult {
        let channel_id = notification.channel_id.as_str();
        let Some((url, headers)) = self.channels.get(channel_id) else {
            return DispatchResult::failed(channel_id, "unknown channel");
        };

        let mut request = self.http.post(url.clone()).json(&HttpNotification {
            channel: channel_id,
            title: &notification.title,
            body: &notification.body,
            priority: notification.priority,
        });
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return DispatchResult::failed(channel_id, format!("HTTP request failed: {err}")),
        };

        let status = response.status();
        if !status.is_success() {
            return DispatchResult::failed(channel_id, format!("channel returned unexpected status {status}"));
        }

        debug!(channel = %channel_id, %status, "HTTP channel accepted notification");
        DispatchResult::delivered(channel_id)
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities::available("http")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification(channel: &str) -> Notification {
        Notification {
            channel_id: channel.into(),
            title: "Disk alert".into(),
            body: "db-1 at 97%".into(),
            priority: NotificationPriority::High,
        }
    }

    fn gateway_for(server: &MockServer, route: &str) -> HttpGateway {
        let mut headers = HashMap::new();
        headers.insert("x-token".to_string(), "secret".to_string());
        let mut channels = HashMap::new();
        channels.insert(
            "ops".to_string(),
            HttpChannel {
                url: format!("{}{}", server.uri(), route),
                headers,
            },
        );
        HttpGateway::new(channels).expect("gateway")
    }

    #[tokio::test]
    async fn posts_rendered_notification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/ops"))
            .and(header("x-token", "secret"))
            .and(body_partial_json(serde_json::json!({
                "title": "Disk alert",
                "priority": "high"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, "/hooks/ops");
        let result = gateway.send(&notification("ops")).await;
        assert!(result.success, "{:?}", result.error);
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let gateway = gateway_for(&server, "/hooks/ops");
        let result = gateway.send(&notification("ops")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn unknown_channel_is_a_failure() {
        let gateway = HttpGateway::new(HashMap::new()).expect("gateway");
        let result = gateway.send(&notification("missing")).await;
        assert_eq!(result.error.as_deref(), Some("unknown channel"));
    }

    #[test]
    fn rejects_invalid_urls() {
        let mut channels = HashMap::new();
        channels.insert(
            "bad".to_string(),
            HttpChannel {
                url: "not a url".into(),
                headers: HashMap::new(),
            },
        );
        assert!(matches!(
            HttpGateway::new(channels),
            Err(DispatchError::InvalidUrl { .. })
        ));
    }
}
