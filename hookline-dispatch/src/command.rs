use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::gateway::{DispatchGateway, DispatchResult, GatewayCapabilities, Notification};

/// Notifier binary used when none is configured.
pub const DEFAULT_NOTIFIER_BINARY: &str = "apprise";

/// Gateway that shells out to an Apprise-style notifier binary.
///
/// Each channel maps to a notifier target URL. The binary is invoked as
/// `<binary> -t <title> -b <body> <target>`.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    binary: String,
    targets: HashMap<String, String>,
    available: bool,
}

impl CommandGateway {
    /// Builds a gateway with an explicitly injected availability flag.
    pub fn new(binary: impl Into<String>, targets: HashMap<String, String>, available: bool) -> Self {
        Self {
            binary: binary.into(),
            targets,
            available,
        }
    }

    /// Builds a gateway after checking once whether the binary can run.
    pub async fn probe(binary: impl Into<String>, targets: HashMap<String, String>) -> Self {
        let binary = binary.into();
        let available = Command::new(&binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);

        if available {
            info!(%binary, "notifier binary available");
        } else {
            warn!(%binary, "notifier binary not available, command channels disabled");
        }

        Self::new(binary, targets, available)
    }
}

#[async_trait]
impl DispatchGateway for CommandGateway {
    async fn send(&self, notification: &Notification) -> DispatchResult {
        let channel_id = notification.channel_id.as_str();
        let Some(target) = self.targets.get(channel_id) else {
            return DispatchResult::failed(channel_id, "unknown channel");
        };

        let output = Command::new(&self.binary)
            .arg("-t")
            .arg(&notification.title)
            .arg("-b")
            .arg(&notification.body)
            .arg(target)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                debug!(channel = %channel_id, "notifier accepted notification");
                DispatchResult::delivered(channel_id)
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                DispatchResult::failed(
                    channel_id,
                    format!("notifier exited with {}: {}", output.status, stderr.trim()),
                )
            }
            Err(err) => DispatchResult::failed(channel_id, format!("failed to run notifier: {err}")),
        }
    }

    fn capabilities(&self) -> GatewayCapabilities {
        if self.available {
            GatewayCapabilities::available("command")
        } else {
            GatewayCapabilities::unavailable("command")
        }
    }
}
