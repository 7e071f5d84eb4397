//! Outbound provisioning events.
//!
//! The [`ProvisioningService`](super::service::ProvisioningService) emits
//! these through the [`EventSink`](super::ports::EventSink) port.  Adapters
//! on the other side decide what to do with them: log to serial, update a
//! display, start the application's network stack, etc.

use crate::error::ErrorCode;
use crate::fsm::{SessionEvent, StateId};

/// Structured events emitted by the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    /// The engine has started (carries initial state).
    Started(StateId),

    /// The session moved between states.
    StateChanged {
        from: StateId,
        to: StateId,
        event: SessionEvent,
    },

    /// A peer connected to the transport.
    PeerConnected { peer: heapless::String<32> },

    /// The peer went away.
    PeerDisconnected,

    /// A credential record passed validation and a join was started.
    CredentialsAccepted { ssid: heapless::String<32> },

    /// A credential frame was rejected (decrypt, parse, or validation).
    CredentialsRejected { reason: &'static str },

    /// The device joined the network.
    Provisioned {
        ssid: heapless::String<32>,
        address: heapless::String<40>,
        duration_ms: u64,
    },

    /// The session entered `Error`.
    Failed { code: ErrorCode },

    /// The network dropped after provisioning completed.
    NetworkLost,
}
