use chrono::{DateTime, Utc};
use hookline_core::serde_utils::{into_object, payload_from_bytes};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Key under which receipt metadata is attached to the payload copy.
pub const META_KEY: &str = "_meta";

/// One inbound webhook delivery.
///
/// `received_at` is the reference time for everything the event triggers:
/// debounce checks, correlation windows and elapsed-time computations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub webhook_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
}

impl Event {
    /// Builds an event received now.
    pub fn new(webhook_id: impl Into<String>, payload: Value) -> Self {
        Self::received_at(webhook_id, payload, Utc::now())
    }

    pub fn received_at(
        webhook_id: impl Into<String>,
        payload: Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            payload,
            received_at,
            source: None,
        }
    }

    /// Builds an event from a raw request body. Malformed bodies become an
    /// empty payload.
    pub fn from_bytes(webhook_id: impl Into<String>, body: &[u8]) -> Self {
        Self::new(webhook_id, payload_from_bytes(body))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns a copy of the payload carrying receipt metadata under `_meta`.
    pub fn annotated_payload(&self) -> Value {
        let mut map = into_object(self.payload.clone(), "_raw");
        map.insert(
            META_KEY.to_string(),
            json!({
                "webhookId": self.webhook_id,
                "receivedAt": self.received_at.to_rfc3339(),
                "source": self.source,
            }),
        );
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_does_not_touch_original() {
        let event = Event::new("hook-1", json!({"status": "down"})).with_source("10.0.0.1");
        let annotated = event.annotated_payload();

        assert_eq!(annotated["status"], "down");
        assert_eq!(annotated["_meta"]["webhookId"], "hook-1");
        assert_eq!(annotated["_meta"]["source"], "10.0.0.1");
        assert!(event.payload.get("_meta").is_none());
    }

    #[test]
    fn malformed_body_is_empty_payload() {
        let event = Event::from_bytes("hook-1", b"<html>");
        assert_eq!(event.payload, json!({}));
        assert!(event.annotated_payload()["_meta"].is_object());
    }
}
