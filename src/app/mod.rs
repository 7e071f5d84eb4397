//! Application core: the provisioning protocol, no I/O.
//!
//! The service and its per-call orchestrator hold the protocol rules:
//! credential intake, control commands, key agreement, and network
//! outcome handling.  Every interaction with the radio, the WiFi station,
//! or flash goes through the **port traits** in [`ports`], which keeps this
//! layer testable without hardware.

pub mod commands;
pub mod credentials;
pub mod events;
pub mod orchestrator;
pub mod ports;
pub mod service;
