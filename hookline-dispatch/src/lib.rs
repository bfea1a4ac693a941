//! Notification dispatch for Hookline.
//!
//! The engines only know the [`DispatchGateway`] contract: one call per target
//! channel, failures captured in a [`DispatchResult`] rather than raised.
//! [`deliver`] bounds every send with a timeout so a hung channel becomes a
//! failed outcome instead of stalling rule evaluation.

mod command;
mod deliver;
mod error;
mod gateway;
mod http;
mod recording;

pub use command::{CommandGateway, DEFAULT_NOTIFIER_BINARY};
pub use deliver::deliver;
pub use error::DispatchError;
pub use gateway::{
    DispatchGateway, DispatchResult, GatewayCapabilities, Notification, NotificationPriority,
};
pub use http::{HttpChannel, HttpGateway};
pub use recording::RecordingGateway;
