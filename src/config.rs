//! Provisioning engine configuration.
//!
//! All tunable parameters for a provisioning session.  Values can be
//! overridden at construction time or loaded from NVS as JSON/postcard.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How strongly the credential frame must be protected in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Plaintext credential frames are accepted (development only).
    None,
    /// Link-layer pairing only; the engine still requires an encrypted session.
    Basic,
    /// ECDH + AES-256-CBC session encryption.
    #[default]
    Secure,
    /// Same engine requirements as `Secure`; certificate policy lives in the app.
    Enterprise,
}

impl SecurityLevel {
    /// Whether credential frames must arrive over an established session key.
    pub const fn requires_encryption(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// How the symmetric session key is derived from the ECDH shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyDerivation {
    /// `SHA-256(shared_secret)`; wire-compatible with existing companion apps.
    #[default]
    Sha256,
    /// RFC 5869 HKDF-SHA256 with an empty salt and a fixed context label.
    HkdfSha256,
}

/// Core provisioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    // --- Identity ---
    /// Advertised device name.
    pub device_name: heapless::String<24>,

    // --- Security ---
    pub security_level: SecurityLevel,
    pub key_derivation: KeyDerivation,
    /// Session key validity window (milliseconds).
    pub session_key_lifetime_ms: u32,
    /// Regenerate the ephemeral key pair whenever the session resets.
    pub perfect_forward_secrecy: bool,

    // --- Link ---
    /// Re-issues allowed after the first failed attempt of an operation.
    pub operation_max_retries: u8,
    /// In-flight operation without a completion signal counts as failed after this.
    pub operation_timeout_ms: u32,
    /// A chunked transfer with no fragment for this long is discarded.
    pub chunk_inactivity_ms: u32,
    /// Upper bound on a reassembled inbound frame (bytes).
    pub max_frame_len: u16,

    // --- Session timeouts (0 = no limit) ---
    pub connected_timeout_ms: u32,
    pub auth_timeout_ms: u32,
    pub credentials_timeout_ms: u32,
    pub connecting_timeout_ms: u32,
    /// Passed to the network provider with every connect request.
    pub wifi_connect_timeout_ms: u32,

    // --- Behaviour ---
    /// Save credentials to the store once the network join succeeds.
    pub persist_credentials: bool,
    /// Credential frames accepted per second (token refill rate).
    pub credential_attempts_per_sec: u32,
    /// Credential frames accepted in a burst.
    pub credential_burst: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        device_name.push_str("wifiprov").ok();

        Self {
            device_name,

            // Security
            security_level: SecurityLevel::Secure,
            key_derivation: KeyDerivation::Sha256,
            session_key_lifetime_ms: 300_000, // 5 min
            perfect_forward_secrecy: true,

            // Link
            operation_max_retries: 3,
            operation_timeout_ms: 5_000,
            chunk_inactivity_ms: 5_000,
            max_frame_len: 4096,

            // Session timeouts
            connected_timeout_ms: 30_000,
            auth_timeout_ms: 30_000,
            credentials_timeout_ms: 120_000,
            connecting_timeout_ms: 30_000,
            wifi_connect_timeout_ms: 20_000,

            // Behaviour
            persist_credentials: true,
            credential_attempts_per_sec: 2,
            credential_burst: 5,
        }
    }
}

impl ProvisioningConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(Error::Config("device_name must not be empty"));
        }
        if self.session_key_lifetime_ms == 0 {
            return Err(Error::Config("session_key_lifetime_ms must be > 0"));
        }
        if self.operation_timeout_ms == 0 {
            return Err(Error::Config("operation_timeout_ms must be > 0"));
        }
        if self.chunk_inactivity_ms == 0 {
            return Err(Error::Config("chunk_inactivity_ms must be > 0"));
        }
        if self.max_frame_len < 64 {
            return Err(Error::Config("max_frame_len must be >= 64"));
        }
        if self.credential_burst == 0 || self.credential_attempts_per_sec == 0 {
            return Err(Error::Config("credential rate limit must allow at least one attempt"));
        }
        if self.connecting_timeout_ms != 0 && self.connecting_timeout_ms < self.wifi_connect_timeout_ms {
            return Err(Error::Config(
                "connecting_timeout_ms must not undercut wifi_connect_timeout_ms",
            ));
        }
        Ok(())
    }
}
