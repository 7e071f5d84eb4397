//! End-to-end provisioning flows against the mock device.
//!
//! Covers the happy path (advertise, key exchange, encrypted credentials,
//! network join), validation failures, mid-transfer disconnects, network
//! failure and recovery, and the control channel.

use wifiprov::app::credentials::{StatusKind, StatusResponse};
use wifiprov::app::events::ProvisioningEvent;
use wifiprov::config::{ProvisioningConfig, SecurityLevel};
use wifiprov::error::ErrorCode;
use wifiprov::events::InboundEvent;
use wifiprov::fsm::StateId;
use wifiprov::fsm::states::{MARKER_CONNECTING, MARKER_ERROR, MARKER_PROVISIONED};
use wifiprov::link::channels::ChannelId;
use wifiprov::link::chunked::{FRAG_CONT, split_frame};

use crate::mock_device::Harness;

fn harness() -> Harness {
    Harness::new(ProvisioningConfig::default())
}

// ── Happy path ────────────────────────────────────────────────

#[test]
fn encrypted_credentials_provision_the_device() -> anyhow::Result<()> {
    let mut h = harness();
    assert_eq!(h.state(), StateId::Idle);

    let companion = h.authenticate();
    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert!(h.svc.is_secure(h.now));
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::success("Key exchange complete"))
    );

    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
    assert_eq!(h.dev.connects.len(), 1);
    assert_eq!(h.dev.connects[0].ssid, "Home");
    assert_eq!(h.dev.connects[0].passphrase, "secret123");
    assert_eq!(h.dev.connects[0].timeout_ms, h.config.wifi_connect_timeout_ms);
    assert_eq!(h.dev.last_marker(), Some(MARKER_CONNECTING));

    h.post(InboundEvent::network_connected("192.168.1.42"));
    assert_eq!(h.state(), StateId::Provisioned);
    h.settle();

    let last = h.dev.last_status().expect("status notified");
    assert_eq!(last.status, StatusKind::Success);
    assert_eq!(last.msg, "Connected to Home");
    assert_eq!(
        h.dev.frames(ChannelId::Status).last().map(Vec::as_slice),
        Some(&br#"{"status":"SUCCESS","msg":"Connected to Home"}"#[..])
    );

    assert!(!h.dev.advertising);
    assert_eq!(h.dev.last_marker(), Some(MARKER_PROVISIONED));

    let stored = h.svc.stored_credentials(&h.dev)?.expect("credentials persisted");
    assert_eq!(stored.ssid.as_str(), "Home");
    assert_eq!(stored.passphrase.as_str(), "secret123");

    let metrics = h.svc.metrics();
    assert_eq!(metrics.attempts, 1);
    assert_eq!(metrics.successful, 1);
    assert_eq!(metrics.failed, 0);
    Ok(())
}

#[test]
fn provisioning_emits_structured_events() {
    let mut h = harness();
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    h.advance(250);
    h.post(InboundEvent::network_connected("10.0.0.7"));

    let events = &h.sink.events;
    assert_eq!(events[0], ProvisioningEvent::Started(StateId::Idle));
    assert!(events.iter().any(|e| matches!(e, ProvisioningEvent::PeerConnected { .. })));
    assert!(events.iter().any(
        |e| matches!(e, ProvisioningEvent::CredentialsAccepted { ssid } if ssid.as_str() == "Home")
    ));
    let provisioned = events
        .iter()
        .find_map(|e| match e {
            ProvisioningEvent::Provisioned {
                ssid,
                address,
                duration_ms,
            } => Some((ssid.clone(), address.clone(), *duration_ms)),
            _ => None,
        })
        .expect("Provisioned event");
    assert_eq!(provisioned.0.as_str(), "Home");
    assert_eq!(provisioned.1.as_str(), "10.0.0.7");
    assert!(provisioned.2 >= 250);

    let path: Vec<StateId> = events
        .iter()
        .filter_map(|e| match e {
            ProvisioningEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(
        path,
        vec![
            StateId::Advertising,
            StateId::Connected,
            StateId::Authenticating,
            StateId::ReceivingCredentials,
            StateId::ConnectingWifi,
            StateId::Provisioned,
        ]
    );
}

#[test]
fn plaintext_accepted_only_at_security_level_none() {
    let config = ProvisioningConfig {
        security_level: SecurityLevel::None,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    h.connect_peer();

    // Empty key exchange authenticates immediately.
    h.write(ChannelId::Control, &[0x01]);
    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert!(!h.svc.is_secure(h.now));

    h.write(ChannelId::Credentials, br#"{"ssid":"Lab","pass":"open-sesame"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
    assert_eq!(h.dev.connects[0].ssid, "Lab");
}

#[test]
fn empty_key_exchange_rejected_when_encryption_required() {
    let mut h = harness();
    h.connect_peer();
    h.write(ChannelId::Control, &[0x01]);
    h.settle();
    assert_eq!(h.state(), StateId::Connected);
    assert_eq!(h.dev.last_status().map(|s| s.status), Some(StatusKind::Error));
}

#[test]
fn persistence_can_be_disabled() -> anyhow::Result<()> {
    let config = ProvisioningConfig {
        persist_credentials: false,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    h.post(InboundEvent::network_connected("192.168.1.42"));
    assert_eq!(h.state(), StateId::Provisioned);
    assert!(h.svc.stored_credentials(&h.dev)?.is_none());
    Ok(())
}

// ── Validation failure ────────────────────────────────────────

#[test]
fn oversized_ssid_is_rejected_without_network_call() {
    let mut h = harness();
    let companion = h.authenticate();

    let record = format!(r#"{{"ssid":"{}","pass":"secret123"}}"#, "s".repeat(33));
    h.submit_credentials(&companion, record.as_bytes());
    h.settle();

    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert!(h.dev.connects.is_empty());
    let last = h.dev.last_status().expect("error status");
    assert_eq!(last.status, StatusKind::Error);
    assert_eq!(h.svc.context().last_error, ErrorCode::CredentialsInvalid);
    assert_eq!(h.svc.metrics().credentials_rejected, 1);
    assert_eq!(
        h.sink.count(|e| matches!(e, ProvisioningEvent::CredentialsRejected { .. })),
        1
    );
}

#[test]
fn malformed_json_gets_one_error_status() {
    let mut h = harness();
    let companion = h.authenticate();
    let before = h.dev.statuses().len();

    h.submit_credentials(&companion, b"{not json");
    h.settle();

    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert_eq!(h.dev.statuses().len(), before + 1);
    assert_eq!(h.dev.last_status().map(|s| s.status), Some(StatusKind::Error));
}

#[test]
fn tampered_ciphertext_is_a_hard_failure() {
    let mut h = harness();
    let companion = h.authenticate();

    let mut sealed = companion.seal(br#"{"ssid":"Home","pass":"secret123"}"#, h.now);
    // Flipping the previous block's last byte turns the 0x0e pad byte into
    // 0xf1, which no PKCS#7 unpad accepts.
    let n = sealed.len();
    sealed[n - 17] ^= 0xff;
    h.write(ChannelId::Credentials, &sealed);
    h.settle();

    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert!(h.dev.connects.is_empty());
    assert_eq!(h.svc.metrics().decrypt_failures, 1);
    assert_eq!(h.dev.last_status(), Some(StatusResponse::error("Decryption failed")));
}

#[test]
fn frame_shorter_than_iv_rejected() {
    let mut h = harness();
    h.authenticate();
    h.write(ChannelId::Credentials, &[0u8; 10]);
    h.settle();
    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert_eq!(h.svc.metrics().decrypt_failures, 1);
}

#[test]
fn credentials_before_authentication_rejected() {
    let mut h = harness();
    h.connect_peer();
    h.write(ChannelId::Credentials, br#"{"ssid":"Home","pass":"x"}"#);
    h.settle();
    assert_eq!(h.state(), StateId::Connected);
    assert!(h.dev.connects.is_empty());
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::error("Not ready for credentials"))
    );
}

#[test]
fn credential_flood_is_rate_limited() {
    let config = ProvisioningConfig {
        credential_burst: 3,
        credential_attempts_per_sec: 1,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    let companion = h.authenticate();

    for _ in 0..4 {
        h.submit_credentials(&companion, b"{}");
    }
    h.settle();

    let statuses = h.dev.statuses();
    assert_eq!(
        statuses.last(),
        Some(&StatusResponse::error("Too many attempts"))
    );
    assert_eq!(h.svc.metrics().credentials_rejected, 4);
}

#[test]
fn credential_limiter_refills_on_tick_time() {
    let config = ProvisioningConfig {
        credential_burst: 1,
        credential_attempts_per_sec: 1,
        ..Default::default()
    };
    let mut h = Harness::new(config);
    let companion = h.authenticate();

    h.submit_credentials(&companion, b"{}");
    h.submit_credentials(&companion, b"{}");
    h.settle();
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::error("Too many attempts"))
    );

    // Only simulated time passes; the bucket must still refill.
    h.advance(1_000);
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
    assert_eq!(h.dev.connects.len(), 1);
}

// ── Dwell limits ──────────────────────────────────────────────

#[test]
fn connecting_timeout_reports_error_status() {
    let mut h = harness();
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);

    h.advance(u64::from(h.config.connecting_timeout_ms) + 1_000);
    h.settle();

    assert_eq!(h.state(), StateId::Error);
    assert_eq!(h.svc.context().last_error, ErrorCode::Timeout);
    assert_eq!(h.dev.last_status(), Some(StatusResponse::error("Timed out")));
    assert_eq!(h.dev.last_marker(), Some(MARKER_ERROR));
    assert_eq!(
        h.sink.count(|e| matches!(e, ProvisioningEvent::Failed { code: ErrorCode::Timeout })),
        1
    );

    // A join result arriving after the deadline changes nothing.
    h.post(InboundEvent::network_connected("192.168.1.42"));
    assert_eq!(h.state(), StateId::Error);
    assert!(h.svc.stored_credentials(&h.dev).unwrap().is_none());
}

#[test]
fn credential_wait_timeout_reports_error_status() {
    let mut h = harness();
    h.authenticate();
    assert_eq!(h.state(), StateId::ReceivingCredentials);

    h.advance(u64::from(h.config.credentials_timeout_ms) + 1_000);
    h.settle();

    assert_eq!(h.state(), StateId::Error);
    assert_eq!(h.dev.last_status(), Some(StatusResponse::error("Timed out")));
}

// ── Mid-flight disconnect ─────────────────────────────────────

#[test]
fn disconnect_discards_partial_transfer() {
    let mut h = harness();
    let companion = h.authenticate();

    let sealed = companion.seal(
        br#"{"ssid":"HomeNetwork-5G","pass":"correct horse battery staple"}"#,
        h.now,
    );
    let fragments = split_frame(&sealed, h.mtu - 3);
    assert!(fragments.len() >= 4);

    // Deliver ~60% of the transfer.
    let cut = fragments.len() * 6 / 10;
    for fragment in &fragments[..cut] {
        h.post(InboundEvent::write(ChannelId::Credentials, fragment));
    }
    assert!(h.svc.link().reassembler.transfer(ChannelId::Credentials).is_in_progress());

    h.post(InboundEvent::PeerDisconnected);
    assert_eq!(h.state(), StateId::Advertising);
    assert!(h.svc.link().reassembler.is_idle());
    assert!(!h.svc.is_secure(h.now));

    // The rest of the old transfer is rejected fragment by fragment.
    for fragment in &fragments[cut..] {
        assert_eq!(fragment[0], FRAG_CONT);
        h.post(InboundEvent::write(ChannelId::Credentials, fragment));
    }
    assert!(h.dev.connects.is_empty());
    assert_eq!(h.state(), StateId::Advertising);
    assert_eq!(h.svc.metrics().peer_disconnections, 1);
}

#[test]
fn reconnect_after_disconnect_uses_a_fresh_key_pair() {
    let mut h = harness();
    h.authenticate();
    let first = h.dev.device_public_key().expect("first key");

    h.post(InboundEvent::PeerDisconnected);
    h.settle();
    let companion = h.authenticate();
    let second = h.dev.device_public_key().expect("second key");
    assert_ne!(first, second);

    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
}

// ── Network outcome ───────────────────────────────────────────

#[test]
fn network_failure_enters_error_then_recovers() {
    let mut h = harness();
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"wrong"}"#);

    h.post(InboundEvent::network_failed("auth timeout"));
    assert_eq!(h.state(), StateId::Error);
    assert_eq!(h.dev.last_marker(), Some(MARKER_ERROR));
    assert_eq!(h.svc.context().last_error, ErrorCode::NetworkConnectionFailed);
    assert!(h.sink.events.contains(&ProvisioningEvent::Failed {
        code: ErrorCode::NetworkConnectionFailed
    }));
    h.settle();
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::error("Connection failed: auth timeout"))
    );

    h.write(ChannelId::Control, &[0x04]);
    assert_eq!(h.state(), StateId::Idle);
    h.settle();
    assert_eq!(h.dev.last_status(), Some(StatusResponse::success("Recovered")));
    assert!(h.svc.stored_credentials(&h.dev).unwrap().is_none());
}

#[test]
fn synchronous_connect_failure_reports_error() {
    let mut h = harness();
    let companion = h.authenticate();
    h.dev.fail_connect = true;
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);

    assert_eq!(h.state(), StateId::Error);
    assert_eq!(h.svc.context().last_error, ErrorCode::NetworkInitFailed);
}

#[test]
fn network_loss_after_provisioning_is_counted() {
    let mut h = harness();
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    h.post(InboundEvent::network_connected("192.168.1.42"));

    h.post(InboundEvent::NetworkDisconnected);
    assert_eq!(h.state(), StateId::Provisioned);
    assert_eq!(h.svc.metrics().network_disconnections, 1);
    assert!(h.sink.events.contains(&ProvisioningEvent::NetworkLost));
}

#[test]
fn late_network_result_is_ignored() {
    let mut h = harness();
    h.connect_peer();
    h.post(InboundEvent::network_connected("192.168.1.42"));
    assert_eq!(h.state(), StateId::Connected);
}

// ── Control channel ───────────────────────────────────────────

#[test]
fn get_status_reports_state_name() {
    let mut h = harness();
    h.connect_peer();
    h.write(ChannelId::Control, &[0x03]);
    h.settle();
    assert_eq!(h.dev.last_status(), Some(StatusResponse::success("CONNECTED")));
}

#[test]
fn reset_command_returns_to_idle() {
    let mut h = harness();
    h.authenticate();
    h.write(ChannelId::Control, &[0x02]);
    assert_eq!(h.state(), StateId::Idle);
    assert!(!h.dev.advertising);
    assert!(h.svc.context().peer.is_empty());
    h.settle();
    assert_eq!(h.dev.last_status(), Some(StatusResponse::success("Reset")));
}

#[test]
fn clear_credentials_erases_store() -> anyhow::Result<()> {
    let mut h = harness();
    let companion = h.authenticate();
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    h.post(InboundEvent::network_connected("192.168.1.42"));
    assert!(h.svc.stored_credentials(&h.dev)?.is_some());

    h.write(ChannelId::Control, &[0x05]);
    assert!(h.svc.stored_credentials(&h.dev)?.is_none());
    h.settle();
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::success("Credentials cleared"))
    );
    Ok(())
}

#[test]
fn unknown_opcode_gets_no_response() {
    let mut h = harness();
    h.connect_peer();
    h.settle();
    let before = h.dev.issued.len();
    h.write(ChannelId::Control, &[0x7e, 1, 2, 3]);
    h.settle();
    assert_eq!(h.dev.issued.len(), before);
    assert_eq!(h.state(), StateId::Connected);
}

#[test]
fn rekey_in_receiving_credentials() {
    let mut h = harness();
    h.authenticate();
    let first_session = h.svc.security().session_id();

    let mut companion = crate::mock_device::Companion::new(&h.config);
    h.write(ChannelId::Control, &companion.key_exchange_frame());
    h.settle();
    assert_eq!(h.state(), StateId::ReceivingCredentials);
    assert_ne!(h.svc.security().session_id(), first_session);

    let device_key = h.dev.device_public_key().expect("device key");
    companion.finish(&device_key, h.now);
    h.submit_credentials(&companion, br#"{"ssid":"Home","pass":"secret123"}"#);
    assert_eq!(h.state(), StateId::ConnectingWifi);
}

#[test]
fn invalid_peer_key_stays_authenticating() {
    let mut h = harness();
    h.connect_peer();
    let mut bogus = vec![0x01, 0x04];
    bogus.extend_from_slice(&[0xab; 64]);
    h.write(ChannelId::Control, &bogus);
    h.settle();

    assert_eq!(h.state(), StateId::Authenticating);
    assert!(!h.svc.is_secure(h.now));
    assert_eq!(h.svc.context().last_error, ErrorCode::AuthenticationFailed);
    assert_eq!(
        h.dev.last_status(),
        Some(StatusResponse::error("Key exchange failed"))
    );
}

// ── Ingress ───────────────────────────────────────────────────

#[test]
fn events_posted_through_ingress_are_drained_on_tick() {
    let mut h = harness();
    let handle = h.svc.ingress_handle();
    assert!(handle.try_post(InboundEvent::StartRequested));
    assert!(handle.try_post(InboundEvent::peer_connected("aa:bb:cc:dd:ee:ff")));
    assert_eq!(h.state(), StateId::Idle);

    h.tick();
    assert_eq!(h.state(), StateId::Connected);
    assert_eq!(h.svc.context().peer.as_str(), "aa:bb:cc:dd:ee:ff");
}

#[test]
fn advertises_under_configured_device_name() {
    let mut config = ProvisioningConfig::default();
    config.device_name.clear();
    config.device_name.push_str("garden-sensor").unwrap();
    let mut h = Harness::new(config);

    assert!(h.start_provisioning());
    assert!(h.dev.advertising);
    assert_eq!(h.dev.advertised_name.as_deref(), Some("garden-sensor"));
}

#[test]
fn peer_rejected_outside_advertising_is_not_recorded() {
    let mut h = harness();
    h.post(InboundEvent::peer_connected("aa:bb:cc:dd:ee:ff"));
    assert_eq!(h.state(), StateId::Idle);
    assert!(h.svc.context().peer.is_empty());

    h.connect_peer();
    assert_eq!(h.state(), StateId::Connected);
    assert_eq!(h.svc.context().peer.as_str(), "c0:ff:ee:00:00:01");
}

#[test]
fn advertising_failure_escalates_to_error() {
    let mut h = harness();
    h.dev.fail_advertising = true;
    h.start_provisioning();
    assert_eq!(h.state(), StateId::Error);
    assert_eq!(h.svc.context().last_error, ErrorCode::TransportInitFailed);
}
