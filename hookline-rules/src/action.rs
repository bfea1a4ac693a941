use hookline_dispatch::{Notification, NotificationPriority};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::template::render;

/// Notification sent when a rule fires or a correlation completes/times out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationAction {
    /// Target channel identifiers, one notification per channel.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Title template. Falls back to the owning rule's name.
    #[serde(default)]
    pub title_template: Option<String>,
    /// Body template.
    #[serde(default)]
    pub message_template: String,
    #[serde(default)]
    pub priority: NotificationPriority,
}

impl NotificationAction {
    /// Renders the templates against `payload`, producing one notification
    /// per target channel.
    pub fn render(&self, payload: &Value, fallback_title: &str) -> Vec<Notification> {
        let title = match &self.title_template {
            Some(template) if !template.trim().is_empty() => render(template, payload),
            _ => fallback_title.to_string(),
        };
        let body = render(&self.message_template, payload);

        self.channels
            .iter()
            .map(|channel_id| Notification {
                channel_id: channel_id.clone(),
                title: title.clone(),
                body: body.clone(),
                priority: self.priority,
            })
            .collect()
    }
}
