//! Mock device and companion app for integration tests.
//!
//! `MockDevice` records every transport, network, and storage call so
//! tests can assert on the full history without a radio.  `Companion`
//! plays the phone side of the handshake with its own `SecurityLayer`.

use wifiprov::ProvisioningService;
use wifiprov::adapters::nvs::{NvsCredentialStore, NvsStorage};
use wifiprov::app::commands::OP_KEY_EXCHANGE;
use wifiprov::app::credentials::StatusResponse;
use wifiprov::app::events::ProvisioningEvent;
use wifiprov::app::ports::{
    ConnectRequest, CredentialStore, EventSink, NetworkError, NetworkPort, StorageError,
    StoredCredentials, TransportError, TransportPort,
};
use wifiprov::config::ProvisioningConfig;
use wifiprov::events::InboundEvent;
use wifiprov::fsm::StateId;
use wifiprov::link::DEFAULT_MTU;
use wifiprov::link::channels::ChannelId;
use wifiprov::link::chunked::{Reassembler, split_frame};
use wifiprov::link::queue::{GattOperation, OperationKind};
use wifiprov::security::SecurityLayer;

// ── Call records ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedOp {
    pub kind: OperationKind,
    pub channel: ChannelId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCall {
    pub ssid: String,
    pub passphrase: String,
    pub security: Option<String>,
    pub hidden: bool,
    pub timeout_ms: u32,
}

// ── MockDevice ────────────────────────────────────────────────

pub struct MockDevice {
    pub advertising: bool,
    pub advertising_starts: u32,
    pub advertised_name: Option<String>,
    pub markers: Vec<u8>,
    pub issued: Vec<IssuedOp>,
    pub connects: Vec<ConnectCall>,
    pub fail_issue: bool,
    pub fail_connect: bool,
    pub fail_advertising: bool,
    pub store: NvsCredentialStore<NvsStorage>,
}

#[allow(dead_code)]
impl MockDevice {
    pub fn new() -> Self {
        Self {
            advertising: false,
            advertising_starts: 0,
            advertised_name: None,
            markers: Vec::new(),
            issued: Vec::new(),
            connects: Vec::new(),
            fail_issue: false,
            fail_connect: false,
            fail_advertising: false,
            store: NvsCredentialStore::new(NvsStorage::new().expect("host storage")),
        }
    }

    /// Reassemble every frame notified on `channel`, in order.
    pub fn frames(&self, channel: ChannelId) -> Vec<Vec<u8>> {
        // Status is outbound-only; decode it through an inbound slot.
        let mut reassembler = Reassembler::new(4096, u64::MAX);
        self.issued
            .iter()
            .filter(|op| op.channel == channel)
            .filter_map(|op| {
                reassembler
                    .feed(ChannelId::Data, &op.payload, 0)
                    .expect("well-formed fragment")
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<StatusResponse> {
        self.frames(ChannelId::Status)
            .iter()
            .map(|f| serde_json::from_slice(f).expect("status JSON"))
            .collect()
    }

    pub fn last_status(&self) -> Option<StatusResponse> {
        self.statuses().pop()
    }

    /// Latest device public key notified on the data channel.
    pub fn device_public_key(&self) -> Option<Vec<u8>> {
        self.frames(ChannelId::Data).pop()
    }

    pub fn last_marker(&self) -> Option<u8> {
        self.markers.last().copied()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportPort for MockDevice {
    fn start_advertising(&mut self, device_name: &str) -> Result<(), TransportError> {
        if self.fail_advertising {
            return Err(TransportError::Io);
        }
        self.advertising = true;
        self.advertised_name = Some(device_name.to_owned());
        self.advertising_starts += 1;
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), TransportError> {
        self.advertising = false;
        Ok(())
    }

    fn issue(&mut self, op: &GattOperation) -> Result<(), TransportError> {
        if self.fail_issue {
            return Err(TransportError::Busy);
        }
        self.issued.push(IssuedOp {
            kind: op.kind,
            channel: op.channel,
            payload: op.payload.clone(),
        });
        Ok(())
    }

    fn set_status_marker(&mut self, marker: u8) {
        self.markers.push(marker);
    }
}

impl NetworkPort for MockDevice {
    fn connect(&mut self, request: &ConnectRequest<'_>) -> Result<(), NetworkError> {
        if self.fail_connect {
            return Err(NetworkError::NotReady);
        }
        self.connects.push(ConnectCall {
            ssid: request.ssid.to_owned(),
            passphrase: request.passphrase.to_owned(),
            security: request.security.map(str::to_owned),
            hidden: request.hidden,
            timeout_ms: request.timeout_ms,
        });
        Ok(())
    }
}

impl CredentialStore for MockDevice {
    fn save(&mut self, credentials: &StoredCredentials) -> Result<(), StorageError> {
        self.store.save(credentials)
    }

    fn load(&self) -> Result<Option<StoredCredentials>, StorageError> {
        self.store.load()
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.store.clear()
    }
}

// ── Event recording ───────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ProvisioningEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&ProvisioningEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ProvisioningEvent) {
        self.events.push(event.clone());
    }
}

// ── Companion app ─────────────────────────────────────────────

pub struct Companion {
    pub security: SecurityLayer,
}

#[allow(dead_code)]
impl Companion {
    pub fn new(config: &ProvisioningConfig) -> Self {
        let mut security = SecurityLayer::new(config);
        security.generate_key_pair().expect("companion key pair");
        Self { security }
    }

    /// `[KEY_EXCHANGE][SEC1 public key]`
    pub fn key_exchange_frame(&self) -> Vec<u8> {
        let mut frame = vec![OP_KEY_EXCHANGE];
        frame.extend_from_slice(self.security.public_key().expect("key pair"));
        frame
    }

    pub fn finish(&mut self, device_public_key: &[u8], now_ms: u64) {
        self.security
            .complete_handshake(device_public_key, now_ms)
            .expect("companion handshake");
    }

    /// `iv || ciphertext` for the credentials channel.
    pub fn seal(&self, plaintext: &[u8], now_ms: u64) -> Vec<u8> {
        self.security
            .encrypt(plaintext, now_ms)
            .expect("companion session key")
            .to_frame()
    }
}

// ── Harness ───────────────────────────────────────────────────

/// Service plus mocks plus a simulated clock.
pub struct Harness {
    pub svc: ProvisioningService,
    pub dev: MockDevice,
    pub sink: RecordingSink,
    pub config: ProvisioningConfig,
    pub now: u64,
    pub mtu: usize,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: ProvisioningConfig) -> Self {
        let mut svc = ProvisioningService::new(config.clone()).expect("valid config");
        let mut dev = MockDevice::new();
        let mut sink = RecordingSink::default();
        svc.start(0, &mut dev, &mut sink);
        Self {
            svc,
            dev,
            sink,
            config,
            now: 0,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn state(&self) -> StateId {
        self.svc.state()
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    pub fn tick(&mut self) {
        self.now += 10;
        self.svc.tick(self.now, &mut self.dev, &mut self.sink);
    }

    /// Enough ticks to run deferred work and flush the operation queue.
    pub fn settle(&mut self) {
        for _ in 0..3 {
            self.tick();
        }
    }

    pub fn post(&mut self, event: InboundEvent) {
        self.svc
            .handle_event(event, self.now, &mut self.dev, &mut self.sink);
    }

    /// Fragment `frame` at the current MTU and deliver every fragment.
    pub fn write(&mut self, channel: ChannelId, frame: &[u8]) {
        for fragment in split_frame(frame, self.mtu - 3) {
            self.post(InboundEvent::write(channel, &fragment));
        }
    }

    pub fn start_provisioning(&mut self) -> bool {
        self.svc
            .start_provisioning(self.now, &mut self.dev, &mut self.sink)
    }

    pub fn connect_peer(&mut self) {
        self.start_provisioning();
        self.post(InboundEvent::peer_connected("c0:ff:ee:00:00:01"));
    }

    /// Drive the handshake to `ReceivingCredentials` and return the
    /// companion holding the matching session key.
    pub fn authenticate(&mut self) -> Companion {
        self.connect_peer();
        let mut companion = Companion::new(&self.config);
        self.write(ChannelId::Control, &companion.key_exchange_frame());
        self.settle();
        let device_key = self.dev.device_public_key().expect("device public key");
        companion.finish(&device_key, self.now);
        companion
    }

    pub fn submit_credentials(&mut self, companion: &Companion, json: &[u8]) {
        let sealed = companion.seal(json, self.now);
        self.write(ChannelId::Credentials, &sealed);
    }
}
