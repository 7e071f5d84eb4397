//! Hashing, key derivation, and entropy.
//!
//! Thin wrappers so the rest of the crate never names a crypto crate
//! directly.  SHA-256 comes from `hmac-sha256`, HKDF from the
//! RustCrypto `hkdf` crate; randomness from
//! the OS / hardware RNG through `rand::rngs::OsRng` (ESP-IDF backs it
//! with `esp_fill_random`).

use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::SecurityError;

/// AES block length and IV length (bytes).
pub const BLOCK_LEN: usize = 16;
pub const IV_LEN: usize = BLOCK_LEN;
/// AES-256 key length (bytes).
pub const KEY_LEN: usize = 32;
pub const SESSION_ID_LEN: usize = 16;
/// SHA-256 output length (bytes).
pub const DIGEST_LEN: usize = 32;

/// SHA-256 of `data`.
pub fn hash(data: &[u8]) -> [u8; DIGEST_LEN] {
    hmac_sha256::Hash::hash(data)
}

/// RFC 5869 HKDF-SHA256 producing one 32-byte block.
///
/// An empty `salt` means the zero-filled default salt.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>, SecurityError> {
    let salt = (!salt.is_empty()).then_some(salt);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, &mut okm[..])
        .map_err(|_| SecurityError::KeyDerivationFailed)?;
    Ok(okm)
}

/// Fill `buf` from the system RNG.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// `n` fresh random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    fill_random(&mut out);
    out
}

/// A fresh random initialisation vector.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    fill_random(&mut iv);
    iv
}
