//! WiFi-over-BLE provisioning protocol engine.
//!
//! Exposes the pure-logic modules for integration testing and for firmware
//! that embeds the engine.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod events;
pub mod fsm;
pub mod link;
pub mod security;

pub use app::service::{ProvisioningMetrics, ProvisioningService};
pub use config::{KeyDerivation, ProvisioningConfig, SecurityLevel};
pub use error::{Error, ErrorCode, Result};
