//! State hooks, transition table, and timeout policy.
//!
//! ```text
//!  IDLE ──[StartAdvertising]──▶ ADVERTISING ──[ClientConnected]──▶ CONNECTED
//!    ▲                              ▲  ▲                              │
//!    │                              │  └────[ClientDisconnected]──────┤
//!    │                              │                         [AuthStarted]
//!    │                              │                                 ▼
//!    │                              ├──[ClientDisconnected]──── AUTHENTICATING
//!    │                              │                                 │
//!    │                              │                         [AuthSuccess]
//!    │                              │                                 ▼
//!    │                              └──[ClientDisconnected]── RECEIVING_CREDENTIALS
//!    │                                                                │
//!    │                                                        [CredsReceived]
//!    │                                                                ▼
//!    │                     PROVISIONED ◀──[WifiConnected]──── CONNECTING_WIFI
//!    │                                                                │
//!    └──[ErrorRecovered]── ERROR ◀──────────[WifiConnectFailed]───────┘
//!
//!  Any state ──[ResetRequested]──▶ IDLE      Any state ──[ErrorOccurred]──▶ ERROR
//! ```

use log::{info, warn};

use super::context::{SessionContext, TransitionRecord};
use super::{SessionEvent, StateDescriptor, StateId, Transition, TransitionTable};
use crate::config::ProvisioningConfig;
use crate::error::ErrorCode;

/// One-byte state summaries pushed to the transport's broadcast payload.
pub const MARKER_IDLE: u8 = 0x00;
pub const MARKER_CONNECTING: u8 = 0x01;
pub const MARKER_PROVISIONED: u8 = 0x02;
pub const MARKER_ERROR: u8 = 0x03;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builders
// ═══════════════════════════════════════════════════════════════════════════

/// Build the state table.  Called once per session.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::Advertising,
            name: "Advertising",
            on_enter: Some(advertising_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::Connected,
            name: "Connected",
            on_enter: Some(connected_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::Authenticating,
            name: "Authenticating",
            on_enter: Some(authenticating_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::ReceivingCredentials,
            name: "ReceivingCredentials",
            on_enter: Some(receiving_enter),
            on_exit: Some(receiving_exit),
        },
        StateDescriptor {
            id: StateId::ConnectingWifi,
            name: "ConnectingWifi",
            on_enter: Some(connecting_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::ValidatingConnection,
            name: "ValidatingConnection",
            on_enter: None,
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::Provisioned,
            name: "Provisioned",
            on_enter: Some(provisioned_enter),
            on_exit: None,
        },
        StateDescriptor {
            id: StateId::Error,
            name: "Error",
            on_enter: Some(error_enter),
            on_exit: None,
        },
    ]
}

/// Build the provisioning transition table.
pub fn build_transition_table() -> TransitionTable {
    use SessionEvent as E;
    use StateId as S;

    let rows = [
        Transition::new(S::Idle, E::StartAdvertising, S::Advertising),
        Transition::new(S::Advertising, E::ClientConnected, S::Connected),
        Transition::new(S::Connected, E::AuthStarted, S::Authenticating),
        Transition::new(S::Authenticating, E::AuthSuccess, S::ReceivingCredentials)
            .with_guard(auth_established),
        Transition::new(S::ReceivingCredentials, E::CredsReceived, S::ConnectingWifi)
            .with_guard(has_ssid_candidate),
        Transition::new(S::ConnectingWifi, E::WifiConnected, S::Provisioned)
            .with_action(clear_retries),
        Transition::new(S::ConnectingWifi, E::WifiConnectFailed, S::Error)
            .with_action(record_network_failure),
        Transition::new(S::Connected, E::ClientDisconnected, S::Advertising).with_action(drop_peer),
        Transition::new(S::Authenticating, E::ClientDisconnected, S::Advertising)
            .with_action(drop_peer),
        Transition::new(S::ReceivingCredentials, E::ClientDisconnected, S::Advertising)
            .with_action(drop_peer),
        Transition::new(S::Error, E::ErrorRecovered, S::Idle).with_action(reset_context),
        Transition::global(E::ResetRequested, S::Idle).with_action(reset_context),
        Transition::global(E::ErrorOccurred, S::Error),
    ];

    rows.into_iter().collect()
}

/// The event synthesised when `state` outlives its dwell limit.
pub fn timeout_event(state: StateId) -> SessionEvent {
    match state {
        StateId::Connected | StateId::Authenticating => SessionEvent::ConnectionTimeout,
        _ => SessionEvent::ProvisioningTimeout,
    }
}

/// Per-state dwell limits derived from configuration.  `0` means unlimited.
pub fn build_timeout_table(config: &ProvisioningConfig) -> [Option<u64>; StateId::COUNT] {
    let limit = |ms: u32| (ms > 0).then_some(u64::from(ms));

    let mut table = [None; StateId::COUNT];
    table[StateId::Connected as usize] = limit(config.connected_timeout_ms);
    table[StateId::Authenticating as usize] = limit(config.auth_timeout_ms);
    table[StateId::ReceivingCredentials as usize] = limit(config.credentials_timeout_ms);
    table[StateId::ConnectingWifi as usize] = limit(config.connecting_timeout_ms);
    table[StateId::ValidatingConnection as usize] = limit(config.connecting_timeout_ms);
    table
}

/// Observer that queues every transition for `EventSink` reporting.
pub fn record_transition(
    from: StateId,
    to: StateId,
    event: SessionEvent,
    ctx: &mut SessionContext,
) {
    ctx.push_transition(TransitionRecord { from, to, event });
}

// ═══════════════════════════════════════════════════════════════════════════
//  Guards and actions
// ═══════════════════════════════════════════════════════════════════════════

fn auth_established(ctx: &SessionContext) -> bool {
    ctx.secure || !ctx.encryption_required
}

fn has_ssid_candidate(ctx: &SessionContext) -> bool {
    !ctx.ssid.is_empty()
}

fn drop_peer(ctx: &mut SessionContext) {
    ctx.peer.clear();
    ctx.secure = false;
}

fn reset_context(ctx: &mut SessionContext) {
    ctx.clear();
}

fn clear_retries(ctx: &mut SessionContext) {
    ctx.retry_count = 0;
    ctx.last_error = ErrorCode::None;
    ctx.last_error_message.clear();
}

fn record_network_failure(ctx: &mut SessionContext) {
    ctx.retry_count = ctx.retry_count.saturating_add(1);
    if ctx.last_error == ErrorCode::None {
        ctx.record_error(ErrorCode::NetworkConnectionFailed, "network join failed");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  State hooks
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut SessionContext) {
    ctx.actions.advertising = Some(false);
    ctx.actions.discard_transfers = true;
    ctx.actions.purge_stale_operations = true;
    ctx.actions.renew_keys = true;
    ctx.actions.status_marker = Some(MARKER_IDLE);
    info!("IDLE: provisioning inactive");
}

fn advertising_enter(ctx: &mut SessionContext) {
    // Every new connection starts from a fresh security session.
    ctx.actions.advertising = Some(true);
    ctx.actions.discard_transfers = true;
    ctx.actions.purge_stale_operations = true;
    ctx.actions.renew_keys = true;
    info!("ADVERTISING: waiting for a companion app");
}

fn connected_enter(_ctx: &mut SessionContext) {
    info!("CONNECTED: waiting for key exchange");
}

fn authenticating_enter(_ctx: &mut SessionContext) {
    info!("AUTHENTICATING: key exchange in progress");
}

fn receiving_enter(_ctx: &mut SessionContext) {
    info!("RECEIVING_CREDENTIALS: secure channel ready");
}

fn receiving_exit(ctx: &mut SessionContext) {
    ctx.actions.discard_transfers = true;
}

fn connecting_enter(ctx: &mut SessionContext) {
    ctx.actions.status_marker = Some(MARKER_CONNECTING);
    info!("CONNECTING_WIFI: joining '{}'", ctx.ssid);
}

fn provisioned_enter(ctx: &mut SessionContext) {
    ctx.actions.persist_credentials = true;
    ctx.actions.advertising = Some(false);
    ctx.actions.status_marker = Some(MARKER_PROVISIONED);
    info!("PROVISIONED: '{}' at {}", ctx.ssid, ctx.ip_address);
}

fn error_enter(ctx: &mut SessionContext) {
    ctx.actions.status_marker = Some(MARKER_ERROR);
    warn!(
        "ERROR: {} ({})",
        ctx.last_error, ctx.last_error_message
    );
}
