//! Session security: ECDH key agreement and AES-256-CBC framing.
//!
//! ```text
//!  device                                   companion app
//!  ──────                                   ─────────────
//!  generate_key_pair()      ◀── KEY_EXCHANGE(peer SEC1 key) ──
//!  compute_shared_secret(peer)
//!  derive_session_key()   → SHA-256 or HKDF over the shared secret,
//!                           shared secret zeroed immediately
//!  ── public_key() on the Data channel ──▶
//!
//!  credential frame:  IV(16) ‖ AES-256-CBC(PKCS#7(plaintext))
//! ```
//!
//! # Security
//!
//! - Peer keys are parsed with full SEC1 decoding; points off the P-256
//!   curve (and the identity) are rejected before use.
//! - The shared secret and session key live in `Zeroizing` buffers.
//! - A fresh random IV is drawn for every message.
//! - Nothing here retries: every failure is returned to the orchestrator.

pub mod primitives;

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use log::{info, warn};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::config::{KeyDerivation, ProvisioningConfig};
use crate::error::SecurityError;
use primitives::{BLOCK_LEN, IV_LEN, KEY_LEN, SESSION_ID_LEN};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// HKDF `info` label binding derived keys to this protocol.
const HKDF_INFO: &[u8] = b"wifiprov session key v1";

/// Length of an uncompressed SEC1 P-256 public key.
pub const PUBLIC_KEY_LEN: usize = 65;

// ───────────────────────────────────────────────────────────────
// Session key
// ───────────────────────────────────────────────────────────────

/// Symmetric key derived from one handshake.
pub struct SessionKey {
    key: Zeroizing<[u8; KEY_LEN]>,
    created_at_ms: u64,
    expires_at_ms: u64,
    session_id: [u8; SESSION_ID_LEN],
}

impl SessionKey {
    pub fn is_valid(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn session_id(&self) -> &[u8; SESSION_ID_LEN] {
        &self.session_id
    }
}

impl core::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionKey")
            .field("created_at_ms", &self.created_at_ms)
            .field("expires_at_ms", &self.expires_at_ms)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

// ───────────────────────────────────────────────────────────────
// Encrypted message
// ───────────────────────────────────────────────────────────────

/// One encrypted frame: `iv ‖ ciphertext` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub timestamp_ms: Option<u64>,
}

impl EncryptedMessage {
    /// Split a wire frame into IV and ciphertext.  The ciphertext must be a
    /// non-empty whole number of blocks.
    pub fn from_frame(frame: &[u8]) -> Result<Self, SecurityError> {
        if frame.len() <= IV_LEN {
            return Err(SecurityError::MalformedMessage);
        }
        let (iv_bytes, ciphertext) = frame.split_at(IV_LEN);
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(SecurityError::MalformedMessage);
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(iv_bytes);
        Ok(Self {
            iv,
            ciphertext: ciphertext.to_vec(),
            timestamp_ms: None,
        })
    }

    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(IV_LEN + self.ciphertext.len());
        frame.extend_from_slice(&self.iv);
        frame.extend_from_slice(&self.ciphertext);
        frame
    }
}

// ───────────────────────────────────────────────────────────────
// Security layer
// ───────────────────────────────────────────────────────────────

/// Key-exchange material plus the active session key.
pub struct SecurityLayer {
    key_derivation: KeyDerivation,
    key_lifetime_ms: u64,
    perfect_forward_secrecy: bool,
    secret: Option<SecretKey>,
    public_key: Vec<u8>,
    peer_public: Option<PublicKey>,
    shared_secret: Option<Zeroizing<[u8; KEY_LEN]>>,
    session: Option<SessionKey>,
}

impl SecurityLayer {
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self {
            key_derivation: config.key_derivation,
            key_lifetime_ms: u64::from(config.session_key_lifetime_ms),
            perfect_forward_secrecy: config.perfect_forward_secrecy,
            secret: None,
            public_key: Vec::new(),
            peer_public: None,
            shared_secret: None,
            session: None,
        }
    }

    // ── Handshake ─────────────────────────────────────────────

    /// Generate a fresh ephemeral P-256 key pair, replacing any prior one.
    pub fn generate_key_pair(&mut self) -> Result<(), SecurityError> {
        let secret = SecretKey::random(&mut rand::rngs::OsRng);
        let encoded = secret.public_key().to_encoded_point(false);
        if encoded.len() != PUBLIC_KEY_LEN {
            return Err(SecurityError::KeyGenerationFailed);
        }
        self.public_key = encoded.as_bytes().to_vec();
        self.secret = Some(secret);
        self.shared_secret = None;
        info!("Security: new ephemeral key pair");
        Ok(())
    }

    /// Local public key (SEC1 uncompressed), if a key pair exists.
    pub fn public_key(&self) -> Option<&[u8]> {
        self.secret.as_ref().map(|_| self.public_key.as_slice())
    }

    /// Import the peer's SEC1 public key and compute the ECDH shared secret.
    ///
    /// Leaves any existing session key untouched on failure.
    pub fn compute_shared_secret(&mut self, peer_public_key: &[u8]) -> Result<(), SecurityError> {
        if peer_public_key.is_empty() {
            return Err(SecurityError::InvalidPeerKey);
        }
        let secret = self.secret.as_ref().ok_or(SecurityError::NoKeyPair)?;
        let peer = PublicKey::from_sec1_bytes(peer_public_key).map_err(|_| {
            warn!("Security: peer key rejected ({} bytes)", peer_public_key.len());
            SecurityError::InvalidPeerKey
        })?;

        let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());

        self.peer_public = Some(peer);
        self.shared_secret = Some(bytes);
        Ok(())
    }

    /// Derive the session key from the pending shared secret, then wipe it.
    pub fn derive_session_key(&mut self, now_ms: u64) -> Result<(), SecurityError> {
        let shared = self
            .shared_secret
            .take()
            .ok_or(SecurityError::NoSharedSecret)?;

        let key = match self.key_derivation {
            KeyDerivation::Sha256 => Zeroizing::new(primitives::hash(&shared[..])),
            KeyDerivation::HkdfSha256 => primitives::hkdf_sha256(&shared[..], &[], HKDF_INFO)?,
        };
        drop(shared);

        let mut session_id = [0u8; SESSION_ID_LEN];
        primitives::fill_random(&mut session_id);

        self.session = Some(SessionKey {
            key,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(self.key_lifetime_ms),
            session_id,
        });
        info!(
            "Security: session key established (id={:02x?}, lifetime={} ms)",
            &session_id[..4],
            self.key_lifetime_ms
        );
        Ok(())
    }

    /// Import the peer key and derive a session key in one step.
    pub fn complete_handshake(
        &mut self,
        peer_public_key: &[u8],
        now_ms: u64,
    ) -> Result<(), SecurityError> {
        if self.secret.is_none() {
            self.generate_key_pair()?;
        }
        self.compute_shared_secret(peer_public_key)?;
        self.derive_session_key(now_ms)
    }

    // ── Session state ─────────────────────────────────────────

    /// A session key exists and has not expired.
    pub fn is_secure(&self, now_ms: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_valid(now_ms))
    }

    pub fn session(&self) -> Option<&SessionKey> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<[u8; SESSION_ID_LEN]> {
        self.session.as_ref().map(|s| s.session_id)
    }

    /// Drop the session, the peer key, and any pending shared secret.
    /// With forward secrecy enabled a new key pair is generated as well.
    pub fn reset(&mut self) -> Result<(), SecurityError> {
        self.session = None;
        self.shared_secret = None;
        self.peer_public = None;
        if self.perfect_forward_secrecy || self.secret.is_none() {
            self.generate_key_pair()?;
        }
        Ok(())
    }

    // ── Cipher ────────────────────────────────────────────────

    /// PKCS#7-pad and encrypt under the session key with a fresh IV.
    pub fn encrypt(&self, plaintext: &[u8], now_ms: u64) -> Result<EncryptedMessage, SecurityError> {
        let key = self.active_key(now_ms)?;
        let iv = primitives::random_iv();
        let ciphertext =
            Aes256CbcEnc::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        Ok(EncryptedMessage {
            iv,
            ciphertext,
            timestamp_ms: Some(now_ms),
        })
    }

    /// Decrypt and strip padding.  Bad length or bad padding is an error,
    /// never a partial plaintext.
    pub fn decrypt(
        &self,
        message: &EncryptedMessage,
        now_ms: u64,
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        let key = self.active_key(now_ms)?;
        if message.ciphertext.is_empty() || message.ciphertext.len() % BLOCK_LEN != 0 {
            return Err(SecurityError::MalformedMessage);
        }
        Aes256CbcDec::new(key.into(), &message.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&message.ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| SecurityError::DecryptionFailed)
    }

    /// Convenience: parse an `iv ‖ ciphertext` frame and decrypt it.
    pub fn decrypt_frame(
        &self,
        frame: &[u8],
        now_ms: u64,
    ) -> Result<Zeroizing<Vec<u8>>, SecurityError> {
        // Key check first so an unkeyed session reports NoSessionKey.
        self.active_key(now_ms)?;
        let message = EncryptedMessage::from_frame(frame)?;
        self.decrypt(&message, now_ms)
    }

    fn active_key(&self, now_ms: u64) -> Result<&[u8; KEY_LEN], SecurityError> {
        let session = self.session.as_ref().ok_or(SecurityError::NoSessionKey)?;
        if !session.is_valid(now_ms) {
            return Err(SecurityError::SessionExpired);
        }
        Ok(&session.key)
    }
}

// ── Tests ────────────────────────────────────────────────────
