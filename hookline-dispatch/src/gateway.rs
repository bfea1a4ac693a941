use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Urgency hint forwarded to the channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for NotificationPriority {
    fn default() -> Self {
        NotificationPriority::Normal
    }
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Critical => "critical",
        }
    }
}

impl fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rendered notification addressed to exactly one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub priority: NotificationPriority,
}

/// Per-channel result of a send attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResult {
    pub channel_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn delivered(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(channel_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// What a gateway can currently do. Injected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayCapabilities {
    pub name: String,
    pub available: bool,
}

impl GatewayCapabilities {
    pub fn available(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
        }
    }

    pub fn unavailable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: false,
        }
    }
}

/// Abstract notification sink used by the rule and correlation engines.
///
/// Implementations must not panic or return errors: every problem is
/// reported through [`DispatchResult::failed`].
#[async_trait]
pub trait DispatchGateway: Send + Sync + 'static {
    async fn send(&self, notification: &Notification) -> DispatchResult;

    fn capabilities(&self) -> GatewayCapabilities;
}
