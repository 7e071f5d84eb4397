//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing provisioning events to the `log`
//! facade (UART / USB-CDC through the ESP-IDF logger in production).
//! An application that needs to react to `Provisioned` implements the
//! same trait.

use log::{info, warn};

use crate::app::events::ProvisioningEvent;
use crate::app::ports::EventSink;

/// Install the platform logger.  Call once at boot.
#[cfg(target_os = "espidf")]
pub fn init_logger() {
    if esp_idf_logger::init().is_err() {
        // Already installed.
        return;
    }
    log::set_max_level(log::LevelFilter::Info);
}

/// Host builds leave logger installation to the binary or test harness.
#[cfg(not(target_os = "espidf"))]
pub fn init_logger() {}

/// Adapter that logs every [`ProvisioningEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self { emitted: 0 }
    }

    /// Events written so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ProvisioningEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            ProvisioningEvent::Started(state) => {
                info!("PROV | started in {}", state.name());
            }
            ProvisioningEvent::StateChanged { from, to, event } => {
                info!("PROV | {} -> {} on {}", from.name(), to.name(), event.name());
            }
            ProvisioningEvent::PeerConnected { peer } => {
                info!("PROV | peer {} connected", peer);
            }
            ProvisioningEvent::PeerDisconnected => {
                info!("PROV | peer disconnected");
            }
            ProvisioningEvent::CredentialsAccepted { ssid } => {
                info!("PROV | credentials accepted for '{}'", ssid);
            }
            ProvisioningEvent::CredentialsRejected { reason } => {
                warn!("PROV | credentials rejected: {}", reason);
            }
            ProvisioningEvent::Provisioned {
                ssid,
                address,
                duration_ms,
            } => {
                info!(
                    "PROV | provisioned on '{}' as {} in {} ms",
                    ssid, address, duration_ms
                );
            }
            ProvisioningEvent::Failed { code } => {
                warn!("PROV | failed: {}", code);
            }
            ProvisioningEvent::NetworkLost => {
                warn!("PROV | network lost after provisioning");
            }
        }
    }
}
