//! Credential record and status response wire formats.
//!
//! ```text
//! credentials (after decryption):  {"ssid":"Home","pass":"secret","security":"wpa2","hidden":false}
//! status notification:             {"status":"SUCCESS","msg":"Connected to Home"}
//! ```

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::ports::StoredCredentials;
use crate::error::ValidationError;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSPHRASE_LEN: usize = 64;
const MAX_SECURITY_TAG_LEN: usize = 16;

// ── Credential record ────────────────────────────────────────

#[derive(Deserialize)]
struct RawRecord {
    ssid: String,
    pass: String,
    #[serde(default)]
    security: Option<String>,
    #[serde(default)]
    hidden: Option<bool>,
}

/// A validated credential record.  The passphrase is wiped on drop.
pub struct CredentialRecord {
    pub ssid: String,
    pub passphrase: Zeroizing<String>,
    pub security: Option<String>,
    pub hidden: bool,
}

impl CredentialRecord {
    /// Parse and validate a plaintext JSON record.
    pub fn parse(bytes: &[u8]) -> Result<Self, ValidationError> {
        let raw: RawRecord =
            serde_json::from_slice(bytes).map_err(|_| ValidationError::MalformedRecord)?;
        let record = Self {
            ssid: raw.ssid,
            passphrase: Zeroizing::new(raw.pass),
            security: raw.security,
            hidden: raw.hidden.unwrap_or(false),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ssid.is_empty() {
            return Err(ValidationError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ValidationError::SsidTooLong);
        }
        if self.passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(ValidationError::PassphraseTooLong);
        }
        Ok(())
    }

    /// Convert into the persisted form.  Lengths were checked by
    /// [`validate`](Self::validate); an over-long security tag is dropped.
    pub fn to_stored(&self) -> Result<StoredCredentials, ValidationError> {
        let ssid = heapless::String::try_from(self.ssid.as_str())
            .map_err(|_| ValidationError::SsidTooLong)?;
        let passphrase = heapless::String::try_from(self.passphrase.as_str())
            .map_err(|_| ValidationError::PassphraseTooLong)?;
        let security = self
            .security
            .as_deref()
            .filter(|tag| tag.len() <= MAX_SECURITY_TAG_LEN)
            .and_then(|tag| heapless::String::try_from(tag).ok());
        Ok(StoredCredentials {
            ssid,
            passphrase,
            security,
            hidden: self.hidden,
        })
    }
}

impl core::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .field("security", &self.security)
            .field("hidden", &self.hidden)
            .finish()
    }
}

// ── Status response ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

/// Body of every status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: StatusKind,
    pub msg: String,
}

impl StatusResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Success,
            msg: msg.into(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Error,
            msg: msg.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusKind::Success
    }

    pub fn to_json(&self) -> Vec<u8> {
        // Serialising a two-field struct of strings cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}
