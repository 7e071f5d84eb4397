//! Unified error types for the provisioning engine.
//!
//! Each subsystem has its own small `Copy` enum; the top-level [`Error`]
//! wraps them so the service and its callers can use a single `Result`.
//! Port-level errors (transport, network, storage) live next to their
//! traits in [`crate::app::ports`] and convert into [`Error`] here.

use core::fmt;

use crate::app::ports::{NetworkError, StorageError, TransportError};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible engine operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Key exchange, key derivation, or cipher failure.
    Security(SecurityError),
    /// Operation queue or chunk reassembly failure.
    Link(LinkError),
    /// A credential record failed parsing or field validation.
    Validation(ValidationError),
    /// The transport adapter rejected a request.
    Transport(TransportError),
    /// The network-connection provider rejected a request.
    Network(NetworkError),
    /// The credential store failed.
    Storage(StorageError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Security(e) => write!(f, "security: {e}"),
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Validation(e) => write!(f, "validation: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Network(e) => write!(f, "network: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Self::Network(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Security errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// The key-pair primitive failed.
    KeyGenerationFailed,
    /// No local key pair exists yet.
    NoKeyPair,
    /// Peer public key was empty or failed SEC1 point decoding.
    InvalidPeerKey,
    /// `derive_session_key` called before a shared secret was computed.
    NoSharedSecret,
    /// The key-derivation function rejected its output length.
    KeyDerivationFailed,
    /// Encrypt/decrypt requested without an established session key.
    NoSessionKey,
    /// The session key's validity window has elapsed.
    SessionExpired,
    /// Frame too short or ciphertext not a whole number of blocks.
    MalformedMessage,
    /// Padding check failed after decryption.
    DecryptionFailed,
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyGenerationFailed => write!(f, "key generation failed"),
            Self::NoKeyPair => write!(f, "no local key pair"),
            Self::InvalidPeerKey => write!(f, "invalid peer public key"),
            Self::NoSharedSecret => write!(f, "no shared secret"),
            Self::KeyDerivationFailed => write!(f, "key derivation failed"),
            Self::NoSessionKey => write!(f, "no session key"),
            Self::SessionExpired => write!(f, "session key expired"),
            Self::MalformedMessage => write!(f, "malformed encrypted message"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
        }
    }
}

impl core::error::Error for SecurityError {}

impl From<SecurityError> for Error {
    fn from(e: SecurityError) -> Self {
        Self::Security(e)
    }
}

// ---------------------------------------------------------------------------
// Link errors (operation queue + reassembly)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// The bounded operation queue is full; the operation was not enqueued.
    QueueFull,
    /// A write carried no fragment header.
    EmptyFragment,
    /// The fragment header byte is not one of SINGLE/START/CONT.
    UnknownFragmentKind(u8),
    /// A START fragment is missing its size field.
    TruncatedHeader,
    /// Continuation fragment arrived with no transfer in progress.
    NoTransferInProgress,
    /// Declared frame size is zero or above the configured maximum.
    FrameTooLarge,
    /// More bytes arrived than the START fragment declared.
    Overflow,
    /// A write arrived on a channel that does not accept inbound data.
    NotInbound,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "operation queue full"),
            Self::EmptyFragment => write!(f, "empty fragment"),
            Self::UnknownFragmentKind(k) => write!(f, "unknown fragment kind 0x{k:02x}"),
            Self::TruncatedHeader => write!(f, "truncated fragment header"),
            Self::NoTransferInProgress => write!(f, "no transfer in progress"),
            Self::FrameTooLarge => write!(f, "declared frame size out of range"),
            Self::Overflow => write!(f, "transfer overflow"),
            Self::NotInbound => write!(f, "channel is not inbound"),
        }
    }
}

impl core::error::Error for LinkError {}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

// ---------------------------------------------------------------------------
// Credential validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Bytes are not a JSON object with the required fields.
    MalformedRecord,
    /// `ssid` is empty.
    SsidEmpty,
    /// `ssid` exceeds 32 bytes.
    SsidTooLong,
    /// `pass` exceeds 64 bytes.
    PassphraseTooLong,
}

impl ValidationError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRecord => "malformed credential record",
            Self::SsidEmpty => "SSID is empty",
            Self::SsidTooLong => "SSID longer than 32 bytes",
            Self::PassphraseTooLong => "passphrase longer than 64 bytes",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for ValidationError {}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Session error code
// ---------------------------------------------------------------------------

/// Coarse error classification recorded in the session context as
/// `last_error` and reported through [`crate::app::events::ProvisioningEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    None = 0,
    TransportInitFailed = 1,
    TransportConnectionLost = 2,
    NetworkInitFailed = 3,
    NetworkConnectionFailed = 4,
    CredentialsInvalid = 5,
    AuthenticationFailed = 6,
    EncryptionFailed = 7,
    StorageFailed = 8,
    Timeout = 9,
    Unknown = 10,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::TransportInitFailed => "TRANSPORT_INIT_FAILED",
            Self::TransportConnectionLost => "TRANSPORT_CONNECTION_LOST",
            Self::NetworkInitFailed => "NETWORK_INIT_FAILED",
            Self::NetworkConnectionFailed => "NETWORK_CONNECTION_FAILED",
            Self::CredentialsInvalid => "CREDENTIALS_INVALID",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::EncryptionFailed => "ENCRYPTION_FAILED",
            Self::StorageFailed => "STORAGE_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Security(SecurityError::MalformedMessage | SecurityError::DecryptionFailed) => {
                Self::EncryptionFailed
            }
            Error::Security(_) => Self::AuthenticationFailed,
            Error::Validation(_) => Self::CredentialsInvalid,
            Error::Transport(_) | Error::Link(_) => Self::TransportConnectionLost,
            Error::Network(_) => Self::NetworkConnectionFailed,
            Error::Storage(_) => Self::StorageFailed,
            Error::Config(_) => Self::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Engine-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
