//! Shared mutable context threaded through every FSM hook.
//!
//! `SessionContext` is the blackboard the state table reads from and
//! writes to: who is connected, which SSID is being tried, the last error,
//! and the side effects the hooks want applied.  Hooks never call ports;
//! the service drains [`SessionActions`] after each event.

use super::{SessionEvent, StateId};
use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// Requested side effects (written by hooks; consumed by the service)
// ---------------------------------------------------------------------------

/// Side effects requested by state hooks and transition actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionActions {
    /// `Some(true)` start advertising, `Some(false)` stop it.
    pub advertising: Option<bool>,
    /// Drop every in-progress chunk transfer.
    pub discard_transfers: bool,
    /// Drop queued operations from older connections.
    pub purge_stale_operations: bool,
    /// Tear down the security session (new key pair per PFS policy).
    pub renew_keys: bool,
    /// Save the accepted credentials to the store.
    pub persist_credentials: bool,
    /// One-byte summary for the transport's broadcast payload.
    pub status_marker: Option<u8>,
}

impl SessionActions {
    /// Take the pending requests, leaving nothing behind.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A transition recorded by the observer for later `EventSink` emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: StateId,
    pub to: StateId,
    pub event: SessionEvent,
}

const PENDING_TRANSITIONS: usize = 8;

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// The shared context passed to every hook, guard, and action.
pub struct SessionContext {
    // -- Timing --
    /// Monotonic time of the event being processed (ms).  Set by the service.
    pub now_ms: u64,
    /// When the current state was entered (ms).
    pub state_entered_at_ms: u64,

    // -- Session data --
    /// Transport-level peer identifier (e.g. BLE address).
    pub peer: heapless::String<32>,
    /// SSID candidate from the last accepted credential record.
    pub ssid: heapless::String<32>,
    /// Address reported by the network provider.
    pub ip_address: heapless::String<40>,
    pub last_error: ErrorCode,
    pub last_error_message: heapless::String<64>,
    /// Failed network joins in this session.
    pub retry_count: u8,

    // -- Security --
    /// Mirrors `SecurityLayer::is_secure` at the time of the event.
    pub secure: bool,
    /// False only at `SecurityLevel::None`.
    pub encryption_required: bool,

    // -- Outputs --
    pub actions: SessionActions,
    /// Filled by the transition observer, drained by the service.
    pub transitions: heapless::Deque<TransitionRecord, PENDING_TRANSITIONS>,
}

impl SessionContext {
    pub fn new(encryption_required: bool) -> Self {
        Self {
            now_ms: 0,
            state_entered_at_ms: 0,
            peer: heapless::String::new(),
            ssid: heapless::String::new(),
            ip_address: heapless::String::new(),
            last_error: ErrorCode::None,
            last_error_message: heapless::String::new(),
            retry_count: 0,
            secure: false,
            encryption_required,
            actions: SessionActions::default(),
            transitions: heapless::Deque::new(),
        }
    }

    /// Forget everything learnt during the session.  Timing, policy, and
    /// pending outputs survive.
    pub fn clear(&mut self) {
        self.peer.clear();
        self.ssid.clear();
        self.ip_address.clear();
        self.last_error = ErrorCode::None;
        self.last_error_message.clear();
        self.retry_count = 0;
        self.secure = false;
    }

    /// Record an error code and a (truncated) human-readable message.
    pub fn record_error(&mut self, code: ErrorCode, message: &str) {
        self.last_error = code;
        copy_truncated(&mut self.last_error_message, message);
    }

    pub fn set_peer(&mut self, peer: &str) {
        copy_truncated(&mut self.peer, peer);
    }

    pub fn set_ip_address(&mut self, address: &str) {
        copy_truncated(&mut self.ip_address, address);
    }

    /// Milliseconds spent in the current state.
    pub fn ms_in_state(&self) -> u64 {
        self.now_ms.saturating_sub(self.state_entered_at_ms)
    }

    /// Append a transition for the service to report; the oldest entry is
    /// dropped when full.
    pub fn push_transition(&mut self, record: TransitionRecord) {
        if self.transitions.is_full() {
            self.transitions.pop_front();
        }
        let _ = self.transitions.push_back(record);
    }
}

/// Copy `src` into `dst`, stopping at the last whole character that fits.
pub fn copy_truncated<const N: usize>(dst: &mut heapless::String<N>, src: &str) {
    dst.clear();
    for ch in src.chars() {
        if dst.push(ch).is_err() {
            break;
        }
    }
}
