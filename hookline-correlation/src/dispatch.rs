use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_dispatch::{deliver, DispatchGateway, DispatchResult};
use hookline_rules::NotificationAction;
use serde_json::Value;

/// Renders a correlation action against its combined payload and sends it.
pub(crate) async fn fire(
    gateway: &dyn DispatchGateway,
    action: &NotificationAction,
    payload: &Value,
    title: &str,
    timeout: Duration,
) -> Vec<DispatchResult> {
    let notifications = action.render(payload, title);
    deliver(gateway, &notifications, timeout).await
}

pub(crate) fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().max(0)
}
