//! Handshake and session-key behaviour across the device/companion pair.

use wifiprov::app::credentials::StatusResponse;
use wifiprov::config::{KeyDerivation, ProvisioningConfig};
use wifiprov::error::SecurityError;
use wifiprov::fsm::StateId;
use wifiprov::link::channels::ChannelId;
use wifiprov::security::{PUBLIC_KEY_LEN, SecurityLayer};

use crate::mock_device::Harness;

#[test]
fn hkdf_derivation_end_to_end() {
    let config = ProvisioningConfig {
        key_derivation: KeyDerivation::HkdfSha256,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Office","pass":"hkdf-rules"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
}

#[test]
fn mismatched_kdf_cannot_decrypt() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.connect_peer();

    // Companion derives with HKDF while the device uses plain SHA-256.
    let hkdf = ProvisioningConfig {
        key_derivation: KeyDerivation::HkdfSha256,
        ..Default::default()
    };
    let mut companion = crate::mock_device::Companion::new(&hkdf);
    h.write(ChannelId::Control, &companion.key_exchange_frame());
    h.settle();
    let device_key = h.dev.device_public_key().expect("device key");
    companion.finish(&device_key, h.now);

    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    h.settle();
    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert!(h.dev.connects.is_empty());
    assert_eq!(h.svc.metrics().credentials_rejected, 1);
}

#[test]
fn expired_session_refuses_credentials() {
    let config = ProvisioningConfig {
        session_key_lifetime_ms: 1_000,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    let companion = h.authenticate();
    let sealed = companion.seal(br#"{"ssid":"Home","pass":"secret123"}"#, h.now);

    h.advance(2_000);
    assert!(!h.svc.is_secure(h.now));
    h.write(ChannelId::Credentials, &sealed);
    h.settle();

    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert!(h.dev.connects.is_empty());
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::error("Secure session required"))
    );
}

#[test]
fn device_key_is_uncompressed_sec1() {
    let mut h = Harness::new(ProvisioningConfig::default());
    h.authenticate();
    let key = h.dev.device_public_key().expect("device key");
    assert_eq!(key.len(), PUBLIC_KEY_LEN);
    assert_eq!(key[0], 0x04);
    assert_eq!(Some(key.as_slice()), h.svc.security().public_key());
}

#[test]
fn off_curve_point_rejected() {
    let config = ProvisioningConfig::default();
    let mut device = SecurityLayer::new(&config);
    device.generate_key_pair().unwrap();

    // x = 1, y = 1 is not on P-256.
    let mut point = [0u8; PUBLIC_KEY_LEN];
    point[0] = 0x04;
    point[32] = 0x01;
    point[64] = 0x01;
    assert_eq!(
        device.complete_handshake(&point, 0),
        Err(SecurityError::InvalidPeerKey)
    );
    assert!(!device.is_secure(0));
}
