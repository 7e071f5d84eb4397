//! Port traits: the hexagonal boundary between the protocol engine and the
//! radio, network, and storage stacks.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ProvisioningService (domain)
//! ```
//!
//! Driven adapters implement these traits.  The
//! [`ProvisioningService`](super::service::ProvisioningService) consumes
//! them via generics at call sites, so the engine never touches a radio or
//! flash partition directly.  Results that take time (link events,
//! network join outcome) come back through the ingress queue in
//! [`crate::events`], never as return values.
//!
//! ## Security notes
//!
//! - **CredentialStore** implementations SHOULD use an encrypted partition.
//! - **NetworkPort** receives the passphrase by reference only; it must
//!   not retain it beyond the join attempt.
//! - All port errors are typed; callers handle every variant explicitly.

use serde::{Deserialize, Serialize};

use super::events::ProvisioningEvent;
use crate::link::queue::GattOperation;

// ───────────────────────────────────────────────────────────────
// Transport port (driven adapter: engine → radio stack)
// ───────────────────────────────────────────────────────────────

/// Short-range radio link (BLE GATT server).
pub trait TransportPort {
    /// Advertise the provisioning service under `device_name`.
    fn start_advertising(&mut self, device_name: &str) -> Result<(), TransportError>;

    fn stop_advertising(&mut self) -> Result<(), TransportError>;

    /// Hand one attribute operation to the stack.  Must not block; the
    /// adapter reports acknowledged completions later through
    /// [`InboundEvent::OperationComplete`](crate::events::InboundEvent).
    fn issue(&mut self, op: &GattOperation) -> Result<(), TransportError>;

    /// Publish the one-byte state summary (advertising payload or a
    /// readable attribute).  Optional.
    fn set_status_marker(&mut self, _marker: u8) {}
}

// ───────────────────────────────────────────────────────────────
// Network port (driven adapter: engine → WiFi station)
// ───────────────────────────────────────────────────────────────

/// One network join request.
#[derive(Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub ssid: &'a str,
    pub passphrase: &'a str,
    /// Security-type tag as sent by the companion app (e.g. `"wpa2"`).
    pub security: Option<&'a str>,
    pub hidden: bool,
    pub timeout_ms: u32,
}

impl core::fmt::Debug for ConnectRequest<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("security", &self.security)
            .field("hidden", &self.hidden)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Network-connection provider.  `connect` returns as soon as the attempt
/// has started; the outcome arrives as
/// [`InboundEvent::NetworkConnected`](crate::events::InboundEvent) or
/// `NetworkFailed`.
pub trait NetworkPort {
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<(), NetworkError>;
}

// ───────────────────────────────────────────────────────────────
// Credential store (driven adapter: engine ↔ persistent storage)
// ───────────────────────────────────────────────────────────────

/// Network credentials as persisted after a successful join.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub ssid: heapless::String<32>,
    pub passphrase: heapless::String<64>,
    pub security: Option<heapless::String<16>>,
    pub hidden: bool,
}

impl core::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("security", &self.security)
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// Last-write-wins credential persistence.
pub trait CredentialStore {
    fn save(&mut self, credentials: &StoredCredentials) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing has been stored.
    fn load(&self) -> Result<Option<StoredCredentials>, StorageError>;

    fn clear(&mut self) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: credential store ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage backing the credential store.
///
/// # Security
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic.  The ESP-IDF NVS API guarantees this
///   natively; in-memory simulation achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: engine → logging / application)
// ───────────────────────────────────────────────────────────────

/// The engine emits structured [`ProvisioningEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &ProvisioningEvent);
}

// ───────────────────────────────────────────────────────────────
// Combined device port
// ───────────────────────────────────────────────────────────────

/// Everything the service drives on each tick.  A single `&mut` satisfies
/// all three ports without a double mutable borrow.
pub trait DevicePorts: TransportPort + NetworkPort + CredentialStore {}

impl<T: TransportPort + NetworkPort + CredentialStore> DevicePorts for T {}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`TransportPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// No peer is connected.
    NotConnected,
    /// The stack has no room for another operation right now.
    Busy,
    /// The channel has no attribute handle.
    InvalidChannel,
    /// Generic stack error.
    Io,
}

/// Errors from [`NetworkPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// Station interface not initialised.
    NotReady,
    /// The driver refused the configuration.
    Rejected,
    Io,
}

/// Errors from [`StoragePort`] and [`CredentialStore`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored blob failed deserialization.
    Corrupted,
    /// Encryption or decryption failed (wrong key, corrupted blob).
    EncryptionError,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no peer connected"),
            Self::Busy => write!(f, "stack busy"),
            Self::InvalidChannel => write!(f, "invalid channel"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotReady => write!(f, "station not ready"),
            Self::Rejected => write!(f, "configuration rejected"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored data corrupted"),
            Self::EncryptionError => write!(f, "encryption error"),
        }
    }
}
