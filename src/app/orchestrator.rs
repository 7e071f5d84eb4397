//! Provisioning orchestrator: routes frames and link events through the
//! session FSM and applies whatever the state hooks asked for.
//!
//! ```text
//!  InboundEvent ──▶ ┌──────────────────────────────┐ ──▶ TransportPort (ops, markers)
//!                   │         Orchestrator          │ ──▶ NetworkPort   (join)
//!   frame bytes ──▶ │ reassemble · decrypt · parse  │ ──▶ CredentialStore
//!                   │  dispatch · apply · report    │ ──▶ EventSink
//!                   └──────────────────────────────┘
//! ```
//!
//! The orchestrator owns nothing.  [`ProvisioningService`](super::service::ProvisioningService)
//! builds one per call from disjoint borrows of its own fields, so there is
//! exactly one owner for the FSM, context, security layer and link.

use log::{debug, info, warn};
use zeroize::Zeroizing;

use burster::Limiter;

use super::commands::ControlCommand;
use super::credentials::{CredentialRecord, StatusResponse};
use super::events::ProvisioningEvent;
use super::ports::{ConnectRequest, DevicePorts, EventSink, StoredCredentials};
use super::service::{CredentialLimiter, ProvisioningMetrics, new_limiter};
use crate::adapters::time::TickClock;
use crate::config::ProvisioningConfig;
use crate::error::ErrorCode;
use crate::events::InboundEvent;
use crate::fsm::context::{SessionContext, TransitionRecord, copy_truncated};
use crate::fsm::{SessionEvent, SessionFsm, StateId};
use crate::link::channels::ChannelId;
use crate::link::queue::OperationKind;
use crate::link::{DEFAULT_MTU, Link};
use crate::security::SecurityLayer;

/// Follow-up events (raised while applying hook actions) handled per dispatch.
const MAX_FOLLOW_UPS: usize = 4;

// ───────────────────────────────────────────────────────────────
// Orchestrator-owned session data
// ───────────────────────────────────────────────────────────────

/// Work deferred to the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWork {
    /// Key agreement with the carried peer public key.
    KeyExchange(Vec<u8>),
}

/// Session data that belongs to neither the FSM nor the security layer.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    pending: Option<PendingWork>,
    /// Credentials handed to the network provider, saved on `Provisioned`.
    accepted: Option<StoredCredentials>,
    /// Set when a peer connects; consumed when the session provisions.
    attempt_started_at_ms: Option<u64>,
    /// Last advertising state the transport confirmed.
    advertising: bool,
}

impl OrchestratorState {
    pub fn pending(&self) -> Option<&PendingWork> {
        self.pending.as_ref()
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }
}

// ───────────────────────────────────────────────────────────────
// Orchestrator
// ───────────────────────────────────────────────────────────────

/// Per-call view over the service's components.
pub struct Orchestrator<'a, D: DevicePorts, E: EventSink> {
    pub(super) config: &'a ProvisioningConfig,
    pub(super) fsm: &'a mut SessionFsm,
    pub(super) ctx: &'a mut SessionContext,
    pub(super) security: &'a mut SecurityLayer,
    pub(super) link: &'a mut Link,
    pub(super) metrics: &'a mut ProvisioningMetrics,
    pub(super) limiter: &'a mut CredentialLimiter,
    pub(super) clock: &'a TickClock,
    pub(super) state: &'a mut OrchestratorState,
    pub(super) dev: &'a mut D,
    pub(super) sink: &'a mut E,
    pub(super) now_ms: u64,
}

impl<D: DevicePorts, E: EventSink> Orchestrator<'_, D, E> {
    // ── FSM plumbing ──────────────────────────────────────────

    /// Feed one event to the FSM and settle its side effects.
    /// Returns `true` when a transition executed.
    pub fn dispatch(&mut self, event: SessionEvent) -> bool {
        self.ctx.now_ms = self.now_ms;
        self.ctx.secure = self.security.is_secure(self.now_ms);
        let moved = self.fsm.handle_event(event, self.ctx);
        self.settle();
        moved
    }

    /// Apply pending hook actions and report queued transitions.  Actions
    /// that fail may raise a follow-up event, which is dispatched in turn.
    pub fn settle(&mut self) {
        let mut budget = MAX_FOLLOW_UPS;
        loop {
            let follow_up = self.apply_actions();
            self.drain_transitions();

            let Some(event) = follow_up else {
                return;
            };
            if budget == 0 {
                warn!("PROV: dropping follow-up {} (limit reached)", event.name());
                return;
            }
            budget -= 1;
            self.ctx.secure = self.security.is_secure(self.now_ms);
            self.fsm.handle_event(event, self.ctx);
        }
    }

    /// Settle a dwell-limit expiry in `dwelling_in`.  A session that lands
    /// in `Error` tells the connected peer why.
    pub fn on_timeout(&mut self, dwelling_in: StateId) {
        if dwelling_in == StateId::ConnectingWifi {
            self.state.accepted = None;
        }
        self.settle();
        if self.fsm.current_state() == StateId::Error
            && dwelling_in != StateId::Error
            && !self.ctx.peer.is_empty()
        {
            self.send_status(StatusResponse::error("Timed out"));
        }
    }

    fn apply_actions(&mut self) -> Option<SessionEvent> {
        let actions = self.ctx.actions.take();
        if actions.is_empty() {
            return None;
        }
        let mut follow_up = None;

        if actions.discard_transfers {
            self.link.reassembler.discard_all();
        }
        if actions.purge_stale_operations {
            self.link.queue.purge_stale();
        }
        if actions.renew_keys {
            self.state.pending = None;
            if let Err(e) = self.security.reset() {
                warn!("PROV: key renewal failed: {e}");
                self.ctx
                    .record_error(ErrorCode::EncryptionFailed, "key generation failed");
                follow_up = self.escalate();
            }
        }
        if let Some(on) = actions.advertising {
            if on != self.state.advertising {
                let result = if on {
                    self.dev.start_advertising(self.config.device_name.as_str())
                } else {
                    self.dev.stop_advertising()
                };
                match result {
                    Ok(()) => self.state.advertising = on,
                    Err(e) if on => {
                        warn!("PROV: advertising failed to start: {e}");
                        self.ctx
                            .record_error(ErrorCode::TransportInitFailed, "advertising failed");
                        follow_up = follow_up.or_else(|| self.escalate());
                    }
                    Err(e) => warn!("PROV: advertising failed to stop: {e}"),
                }
            }
        }
        if actions.persist_credentials {
            self.persist_accepted();
        }
        if let Some(marker) = actions.status_marker {
            self.dev.set_status_marker(marker);
        }
        follow_up
    }

    /// `ErrorOccurred` unless the session already sits in `Error`.
    fn escalate(&self) -> Option<SessionEvent> {
        (self.fsm.current_state() != StateId::Error).then_some(SessionEvent::ErrorOccurred)
    }

    fn persist_accepted(&mut self) {
        let Some(credentials) = self.state.accepted.take() else {
            return;
        };
        if !self.config.persist_credentials {
            debug!("PROV: credential persistence disabled");
            return;
        }
        match self.dev.save(&credentials) {
            Ok(()) => info!("PROV: credentials for '{}' saved", credentials.ssid),
            Err(e) => {
                warn!("PROV: failed to save credentials: {e}");
                self.ctx
                    .record_error(ErrorCode::StorageFailed, "credential save failed");
            }
        }
    }

    fn drain_transitions(&mut self) {
        while let Some(TransitionRecord { from, to, event }) = self.ctx.transitions.pop_front() {
            self.sink
                .emit(&ProvisioningEvent::StateChanged { from, to, event });

            match to {
                StateId::Connected if from == StateId::Advertising => {
                    self.state.attempt_started_at_ms = Some(self.now_ms);
                }
                StateId::Provisioned => {
                    let duration_ms = self
                        .state
                        .attempt_started_at_ms
                        .take()
                        .map_or(0, |t| self.now_ms.saturating_sub(t));
                    self.metrics.successful += 1;
                    self.metrics.total_provisioning_ms += duration_ms;
                    self.sink.emit(&ProvisioningEvent::Provisioned {
                        ssid: self.ctx.ssid.clone(),
                        address: self.ctx.ip_address.clone(),
                        duration_ms,
                    });
                }
                StateId::Error => {
                    self.metrics.failed += 1;
                    self.sink.emit(&ProvisioningEvent::Failed {
                        code: self.ctx.last_error,
                    });
                }
                StateId::Idle | StateId::Advertising => {
                    self.state.attempt_started_at_ms = None;
                    self.state.accepted = None;
                }
                _ => {}
            }
        }
    }

    // ── Inbound events ────────────────────────────────────────

    /// Handle one event drained from the ingress queue.
    pub fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::PeerConnected { peer } => {
                self.link.set_mtu(DEFAULT_MTU);
                *self.limiter = new_limiter(self.config, self.clock);
                if self.dispatch(SessionEvent::ClientConnected) {
                    self.ctx.set_peer(&peer);
                    info!("PROV: peer {peer} attached");
                } else {
                    debug!(
                        "PROV: peer {} connected in {}",
                        peer,
                        self.fsm.current_state().name()
                    );
                }
                self.sink.emit(&ProvisioningEvent::PeerConnected { peer });
            }
            InboundEvent::PeerDisconnected => {
                self.metrics.peer_disconnections += 1;
                self.link.queue.begin_epoch();
                self.link.reassembler.discard_all();
                self.link.set_mtu(DEFAULT_MTU);
                self.state.pending = None;
                self.dispatch(SessionEvent::ClientDisconnected);
                self.sink.emit(&ProvisioningEvent::PeerDisconnected);
            }
            InboundEvent::MtuChanged(mtu) => self.link.set_mtu(usize::from(mtu)),
            InboundEvent::Write { channel, data } => {
                match self.link.reassembler.feed(channel, &data, self.now_ms) {
                    Ok(Some(frame)) => self.handle_frame(channel, &frame),
                    Ok(None) => {}
                    Err(e) => warn!("PROV: fragment on {channel} dropped: {e}"),
                }
            }
            InboundEvent::OperationComplete { success } => self.link.queue.complete(success),
            InboundEvent::NetworkConnected { address } => self.on_network_connected(&address),
            InboundEvent::NetworkFailed { reason } => self.on_network_failed(&reason),
            InboundEvent::NetworkDisconnected => {
                if self.fsm.current_state() == StateId::Provisioned {
                    self.metrics.network_disconnections += 1;
                    self.dispatch(SessionEvent::WifiDisconnected);
                    self.sink.emit(&ProvisioningEvent::NetworkLost);
                } else {
                    debug!("PROV: network down while {}", self.fsm.current_state().name());
                }
            }
            InboundEvent::StartRequested => {
                self.dispatch(SessionEvent::StartAdvertising);
            }
            InboundEvent::ResetRequested => {
                self.dispatch(SessionEvent::ResetRequested);
            }
        }
    }

    /// A complete frame arrived on `channel`.
    pub fn handle_frame(&mut self, channel: ChannelId, frame: &[u8]) {
        match channel {
            ChannelId::Credentials => self.on_credentials(frame),
            ChannelId::Control => self.on_control(frame),
            ChannelId::Data => debug!("PROV: {} byte(s) on data channel ignored", frame.len()),
            ChannelId::Status => {}
        }
    }

    // ── Credential intake ─────────────────────────────────────

    fn on_credentials(&mut self, frame: &[u8]) {
        self.dispatch(SessionEvent::CredsReceivedAttempt);

        if self.fsm.current_state() != StateId::ReceivingCredentials {
            self.reject_credentials("Not ready for credentials");
            return;
        }
        if self.limiter.try_consume(1).is_err() {
            self.reject_credentials("Too many attempts");
            return;
        }

        let Some(plaintext) = self.open_credential_frame(frame) else {
            return;
        };
        if plaintext.is_empty() {
            self.reject_credentials("Empty credential frame");
            return;
        }

        let parsed = CredentialRecord::parse(&plaintext)
            .and_then(|record| record.to_stored().map(|stored| (record, stored)));
        let (record, stored) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
                warn!("PROV: credential record rejected: {e}");
                self.ctx.record_error(ErrorCode::CredentialsInvalid, e.as_str());
                self.dispatch(SessionEvent::CredentialsInvalid);
                self.reject_credentials(e.as_str());
                return;
            }
        };

        copy_truncated(&mut self.ctx.ssid, &record.ssid);
        if !self.dispatch(SessionEvent::CredsReceived) {
            self.reject_credentials("Credentials not accepted");
            return;
        }

        self.metrics.attempts += 1;
        self.state.accepted = Some(stored);
        self.sink.emit(&ProvisioningEvent::CredentialsAccepted {
            ssid: self.ctx.ssid.clone(),
        });

        let request = ConnectRequest {
            ssid: &record.ssid,
            passphrase: record.passphrase.as_str(),
            security: record.security.as_deref(),
            hidden: record.hidden,
            timeout_ms: self.config.wifi_connect_timeout_ms,
        };
        if let Err(e) = self.dev.connect(&request) {
            warn!("PROV: network join for '{}' not started: {e}", record.ssid);
            self.state.accepted = None;
            self.ctx
                .record_error(ErrorCode::NetworkInitFailed, "network connect request failed");
            self.dispatch(SessionEvent::WifiConnectFailed);
            self.send_status(StatusResponse::error(format!("Connection failed: {e}")));
        }
    }

    /// Decrypt (or pass through, at `SecurityLevel::None`) a credential
    /// frame.  Rejects and returns `None` on failure.
    fn open_credential_frame(&mut self, frame: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        if self.security.is_secure(self.now_ms) {
            return match self.security.decrypt_frame(frame, self.now_ms) {
                Ok(plaintext) => Some(plaintext),
                Err(e) => {
                    warn!("PROV: credential frame ({} bytes): {e}", frame.len());
                    self.metrics.decrypt_failures += 1;
                    self.ctx
                        .record_error(ErrorCode::EncryptionFailed, "credential decryption failed");
                    self.reject_credentials("Decryption failed");
                    None
                }
            };
        }
        if self.config.security_level.requires_encryption() {
            self.reject_credentials("Secure session required");
            return None;
        }
        Some(Zeroizing::new(frame.to_vec()))
    }

    fn reject_credentials(&mut self, reason: &'static str) {
        self.metrics.credentials_rejected += 1;
        self.sink
            .emit(&ProvisioningEvent::CredentialsRejected { reason });
        self.send_status(StatusResponse::error(reason));
    }

    // ── Control channel ───────────────────────────────────────

    fn on_control(&mut self, frame: &[u8]) {
        let Some(command) = ControlCommand::parse(frame) else {
            self.send_status(StatusResponse::error("Empty command"));
            return;
        };

        match command {
            ControlCommand::KeyExchange(peer_key) => self.on_key_exchange(peer_key),
            ControlCommand::Reset => {
                self.dispatch(SessionEvent::ResetRequested);
                self.send_status(StatusResponse::success("Reset"));
            }
            ControlCommand::GetStatus => {
                let name = self.fsm.current_state().name();
                self.send_status(StatusResponse::success(name));
            }
            ControlCommand::Recover => {
                if self.dispatch(SessionEvent::ErrorRecovered) {
                    self.send_status(StatusResponse::success("Recovered"));
                } else {
                    self.send_status(StatusResponse::error("Nothing to recover"));
                }
            }
            ControlCommand::ClearCredentials => match self.dev.clear() {
                Ok(()) => self.send_status(StatusResponse::success("Credentials cleared")),
                Err(e) => {
                    warn!("PROV: clearing credentials failed: {e}");
                    self.send_status(StatusResponse::error("Failed to clear credentials"));
                }
            },
            ControlCommand::Unknown(op) => warn!("PROV: unknown control opcode 0x{op:02x}"),
        }
    }

    fn on_key_exchange(&mut self, peer_key: &[u8]) {
        let state = self.fsm.current_state();

        if peer_key.is_empty() {
            if !self.config.security_level.requires_encryption() && state == StateId::Connected {
                self.dispatch(SessionEvent::AuthStarted);
                self.dispatch(SessionEvent::AuthSuccess);
                self.send_status(StatusResponse::success("Authenticated"));
            } else {
                self.send_status(StatusResponse::error("Missing public key"));
            }
            return;
        }

        match state {
            StateId::Connected => {
                self.dispatch(SessionEvent::AuthStarted);
            }
            StateId::Authenticating | StateId::ReceivingCredentials => {
                debug!("PROV: re-key requested in {}", state.name());
            }
            _ => {
                self.send_status(StatusResponse::error(format!(
                    "Key exchange not allowed in {}",
                    state.name()
                )));
                return;
            }
        }
        self.state.pending = Some(PendingWork::KeyExchange(peer_key.to_vec()));
    }

    // ── Deferred work ─────────────────────────────────────────

    /// Run work queued by an earlier frame.
    pub fn run_pending(&mut self) {
        let Some(work) = self.state.pending.take() else {
            return;
        };
        match work {
            PendingWork::KeyExchange(peer_key) => self.complete_key_exchange(&peer_key),
        }
    }

    fn complete_key_exchange(&mut self, peer_key: &[u8]) {
        match self.security.complete_handshake(peer_key, self.now_ms) {
            Ok(()) => {
                if self.fsm.current_state() == StateId::Authenticating {
                    self.dispatch(SessionEvent::AuthSuccess);
                }
                let public_key = self.security.public_key().map(<[u8]>::to_vec);
                if let Some(public_key) = public_key {
                    if let Err(e) =
                        self.link
                            .send(OperationKind::Notify, ChannelId::Data, &public_key, self.now_ms)
                    {
                        warn!("PROV: device public key not queued: {e}");
                    }
                }
                self.send_status(StatusResponse::success("Key exchange complete"));
            }
            Err(e) => {
                warn!("PROV: key exchange failed: {e}");
                self.ctx
                    .record_error(ErrorCode::AuthenticationFailed, "key exchange failed");
                self.dispatch(SessionEvent::AuthFailed);
                self.send_status(StatusResponse::error("Key exchange failed"));
            }
        }
    }

    // ── Network outcome ───────────────────────────────────────

    fn on_network_connected(&mut self, address: &str) {
        if self.fsm.current_state() != StateId::ConnectingWifi {
            debug!("PROV: network up while {}", self.fsm.current_state().name());
            return;
        }
        self.ctx.set_ip_address(address);
        if self.dispatch(SessionEvent::WifiConnected) {
            let msg = format!("Connected to {}", self.ctx.ssid);
            self.send_status(StatusResponse::success(msg));
        }
    }

    fn on_network_failed(&mut self, reason: &str) {
        if self.fsm.current_state() != StateId::ConnectingWifi {
            debug!("PROV: stale network failure ignored: {reason}");
            return;
        }
        self.state.accepted = None;
        self.ctx
            .record_error(ErrorCode::NetworkConnectionFailed, reason);
        self.dispatch(SessionEvent::WifiConnectFailed);
        self.send_status(StatusResponse::error(format!("Connection failed: {reason}")));
    }

    // ── Outbound ──────────────────────────────────────────────

    /// Queue a status notification, fragmented to the current MTU.
    fn send_status(&mut self, response: StatusResponse) {
        let body = response.to_json();
        if let Err(e) = self
            .link
            .send(OperationKind::Notify, ChannelId::Status, &body, self.now_ms)
        {
            warn!("PROV: status '{}' not queued: {e}", response.msg);
        }
    }
}
