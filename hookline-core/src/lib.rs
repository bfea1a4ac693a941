//! Core shared library for the Hookline workspace.
//!
//! This crate exposes the primitives every other crate depends on: the
//! canonical error type, engine configuration loading, logging setup and
//! JSON helpers.

pub mod config;
pub mod errors;
pub mod logging;
pub mod serde_utils;

pub use config::EngineConfig;
pub use errors::{ConfigError, HooklineError, Result as CoreResult};
