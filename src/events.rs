//! Ingress queue: everything that happens outside the control loop.
//!
//! Transport and network adapters run their callbacks on stack-owned
//! threads.  They never touch the engine directly; they post an
//! [`InboundEvent`] through a cloneable [`IngressHandle`] and the control
//! loop drains the queue once per tick.
//!
//! ```text
//! ┌──────────────┐            ┌──────────────┐            ┌──────────────┐
//! │ BLE callback │──try_post─▶│              │            │              │
//! │ WiFi event   │──try_post─▶│   Ingress    │──try_take─▶│ Control loop │
//! │ Test harness │──try_post─▶│  (32 slots)  │            │  (consumer)  │
//! └──────────────┘            └──────────────┘            └──────────────┘
//! ```
//!
//! FIFO order is preserved.  A full queue rejects the post and the adapter
//! decides whether to drop or retry.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::link::channels::ChannelId;

/// Maximum number of pending inbound events.
pub const INGRESS_DEPTH: usize = 32;

/// Events posted by adapters for the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    // ── Transport ─────────────────────────────────────────
    /// A peer connected; carries its printable address.
    PeerConnected { peer: heapless::String<32> },
    /// The peer disconnected (or the link dropped).
    PeerDisconnected,
    /// ATT MTU negotiated.
    MtuChanged(u16),
    /// The peer wrote to an inbound characteristic.
    Write { channel: ChannelId, data: Vec<u8> },
    /// Completion of the in-flight acknowledged operation.
    OperationComplete { success: bool },

    // ── Network ───────────────────────────────────────────
    NetworkConnected { address: heapless::String<40> },
    NetworkFailed { reason: heapless::String<64> },
    /// Link lost after a successful join.
    NetworkDisconnected,

    // ── Application ───────────────────────────────────────
    /// Begin advertising (equivalent to `start_provisioning`).
    StartRequested,
    /// Abort and return to `Idle`.
    ResetRequested,
}

impl InboundEvent {
    /// Build a `PeerConnected`, truncating over-long addresses.
    pub fn peer_connected(peer: &str) -> Self {
        Self::PeerConnected {
            peer: truncated(peer),
        }
    }

    pub fn write(channel: ChannelId, data: &[u8]) -> Self {
        Self::Write {
            channel,
            data: data.to_vec(),
        }
    }

    pub fn network_connected(address: &str) -> Self {
        Self::NetworkConnected {
            address: truncated(address),
        }
    }

    pub fn network_failed(reason: &str) -> Self {
        Self::NetworkFailed {
            reason: truncated(reason),
        }
    }
}

fn truncated<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    crate::fsm::context::copy_truncated(&mut out, s);
    out
}

type IngressChannel = Channel<CriticalSectionRawMutex, InboundEvent, INGRESS_DEPTH>;

// ── Consumer side ─────────────────────────────────────────────

/// The receiving end, owned by the service.
pub struct Ingress {
    channel: Arc<IngressChannel>,
}

impl Ingress {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel::new()),
        }
    }

    /// A producer handle for an adapter.
    pub fn handle(&self) -> IngressHandle {
        IngressHandle {
            channel: Arc::clone(&self.channel),
        }
    }

    /// Pop the next event.  Never blocks.
    pub fn try_take(&self) -> Option<InboundEvent> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Drop everything pending.
    pub fn clear(&self) {
        self.channel.clear();
    }
}

impl Default for Ingress {
    fn default() -> Self {
        Self::new()
    }
}

// ── Producer side ─────────────────────────────────────────────

/// Cloneable, thread-safe producer for [`InboundEvent`]s.
#[derive(Clone)]
pub struct IngressHandle {
    channel: Arc<IngressChannel>,
}

impl IngressHandle {
    /// Post an event.  Returns `false` if the queue is full (event dropped).
    pub fn try_post(&self, event: InboundEvent) -> bool {
        self.channel.try_send(event).is_ok()
    }
}
