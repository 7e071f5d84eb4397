//! Table-driven provisioning session state machine.
//!
//! Same embedded function-pointer pattern as a classic C FSM, keyed on
//! `(state, event)` instead of polled update handlers:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Transition table                                             │
//! │  ┌──────────────┬──────────────────┬──────────┬───────┬──────┐ │
//! │  │ from         │ event            │ to       │ guard │ act  │ │
//! │  ├──────────────┼──────────────────┼──────────┼───────┼──────┤ │
//! │  │ Idle         │ StartAdvertising │ Advert.  │   -   │  -   │ │
//! │  │ Authentic.   │ AuthSuccess      │ RecvCred │ fn    │  -   │ │
//! │  │ *            │ ResetRequested   │ Idle     │   -   │ fn   │ │
//! │  └──────────────┴──────────────────┴──────────┴───────┴──────┘ │
//! │  State table: on_enter / on_exit per StateId                  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`SessionFsm::handle_event`] looks up the row for the current state
//! (falling back to wildcard rows), runs the guard, and then executes
//! `on_exit → action → observer → switch → history → on_enter`.
//! Every callback receives `&mut SessionContext`; hooks never touch I/O
//! directly, they leave requests in [`SessionContext::actions`] for the
//! service to apply.

pub mod context;
pub mod states;

use context::SessionContext;
use log::{debug, info, warn};

use crate::error::ErrorCode;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Every provisioning session state.
/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Idle = 0,
    Advertising = 1,
    Connected = 2,
    Authenticating = 3,
    ReceivingCredentials = 4,
    ConnectingWifi = 5,
    ValidatingConnection = 6,
    Provisioned = 7,
    Error = 8,
}

impl StateId {
    /// Total number of states; sizes the table arrays.
    pub const COUNT: usize = 9;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Idle,
        Self::Advertising,
        Self::Connected,
        Self::Authenticating,
        Self::ReceivingCredentials,
        Self::ConnectingWifi,
        Self::ValidatingConnection,
        Self::Provisioned,
        Self::Error,
    ];

    /// Convert an index back to `StateId`.  Out-of-range maps to `Error`.
    pub fn from_index(idx: usize) -> Self {
        Self::ALL.get(idx).copied().unwrap_or_else(|| {
            debug_assert!(false, "invalid state index: {idx}");
            Self::Error
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Advertising => "ADVERTISING",
            Self::Connected => "CONNECTED",
            Self::Authenticating => "AUTHENTICATING",
            Self::ReceivingCredentials => "RECEIVING_CREDENTIALS",
            Self::ConnectingWifi => "CONNECTING_WIFI",
            Self::ValidatingConnection => "VALIDATING_CONNECTION",
            Self::Provisioned => "PROVISIONED",
            Self::Error => "ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionEvent {
    StartAdvertising = 0,
    ClientConnected = 1,
    ClientDisconnected = 2,
    AuthStarted = 3,
    AuthSuccess = 4,
    AuthFailed = 5,
    CredsReceivedAttempt = 6,
    CredsReceived = 7,
    CredentialsInvalid = 8,
    WifiConnected = 9,
    WifiConnectFailed = 10,
    WifiDisconnected = 11,
    ErrorOccurred = 12,
    ErrorRecovered = 13,
    ResetRequested = 14,
    ConnectionTimeout = 15,
    ProvisioningTimeout = 16,
}

impl SessionEvent {
    pub const COUNT: usize = 17;

    pub const ALL: [Self; Self::COUNT] = [
        Self::StartAdvertising,
        Self::ClientConnected,
        Self::ClientDisconnected,
        Self::AuthStarted,
        Self::AuthSuccess,
        Self::AuthFailed,
        Self::CredsReceivedAttempt,
        Self::CredsReceived,
        Self::CredentialsInvalid,
        Self::WifiConnected,
        Self::WifiConnectFailed,
        Self::WifiDisconnected,
        Self::ErrorOccurred,
        Self::ErrorRecovered,
        Self::ResetRequested,
        Self::ConnectionTimeout,
        Self::ProvisioningTimeout,
    ];

    /// Events that apply from every state when no specific row matched.
    pub const fn is_global(self) -> bool {
        matches!(self, Self::ResetRequested | Self::ErrorOccurred)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::StartAdvertising => "START_ADVERTISING",
            Self::ClientConnected => "CLIENT_CONNECTED",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
            Self::AuthStarted => "AUTH_STARTED",
            Self::AuthSuccess => "AUTH_SUCCESS",
            Self::AuthFailed => "AUTH_FAILED",
            Self::CredsReceivedAttempt => "CREDS_RECEIVED_ATTEMPT",
            Self::CredsReceived => "CREDS_RECEIVED",
            Self::CredentialsInvalid => "CREDENTIALS_INVALID",
            Self::WifiConnected => "WIFI_CONNECTED",
            Self::WifiConnectFailed => "WIFI_CONNECT_FAILED",
            Self::WifiDisconnected => "WIFI_DISCONNECTED",
            Self::ErrorOccurred => "ERROR_OCCURRED",
            Self::ErrorRecovered => "ERROR_RECOVERED",
            Self::ResetRequested => "RESET_REQUESTED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ProvisioningTimeout => "PROVISIONING_TIMEOUT",
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` hooks.
pub type StateActionFn = fn(&mut SessionContext);

/// Pure transition guard.  Must not mutate anything.
pub type GuardFn = fn(&SessionContext) -> bool;

/// Side-effecting transition action, run between exit and enter.
pub type TransitionActionFn = fn(&mut SessionContext);

/// Called for every executed transition with `(from, to, event)`.
pub type TransitionObserverFn = fn(StateId, StateId, SessionEvent, &mut SessionContext);

// ---------------------------------------------------------------------------
// Table rows
// ---------------------------------------------------------------------------

/// Static descriptor for a single state.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
}

/// One row of the transition table.  `from: None` matches every state.
#[derive(Clone, Copy)]
pub struct Transition {
    pub from: Option<StateId>,
    pub event: SessionEvent,
    pub to: StateId,
    pub guard: Option<GuardFn>,
    pub action: Option<TransitionActionFn>,
}

impl Transition {
    pub const fn new(from: StateId, event: SessionEvent, to: StateId) -> Self {
        Self {
            from: Some(from),
            event,
            to,
            guard: None,
            action: None,
        }
    }

    /// A wildcard row applying from any state.
    pub const fn global(event: SessionEvent, to: StateId) -> Self {
        Self {
            from: None,
            event,
            to,
            guard: None,
            action: None,
        }
    }

    pub const fn with_guard(mut self, guard: GuardFn) -> Self {
        self.guard = Some(guard);
        self
    }

    pub const fn with_action(mut self, action: TransitionActionFn) -> Self {
        self.action = Some(action);
        self
    }
}

impl core::fmt::Debug for Transition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("event", &self.event)
            .field("to", &self.to)
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

/// Maximum rows the transition table can hold (including runtime additions).
pub const MAX_TRANSITIONS: usize = 32;

/// Number of past states retained by [`SessionFsm::history`].
pub const HISTORY_DEPTH: usize = 10;

pub type TransitionTable = heapless::Vec<Transition, MAX_TRANSITIONS>;

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The session state machine.
///
/// Owns the state and transition tables, the per-state dwell limits, and
/// the bounded history.  The [`SessionContext`] is owned by the caller and
/// threaded through every call.
pub struct SessionFsm {
    states: [StateDescriptor; StateId::COUNT],
    transitions: TransitionTable,
    /// Maximum dwell per state in milliseconds, indexed by `StateId as usize`.
    timeouts: [Option<u64>; StateId::COUNT],
    current: StateId,
    previous: StateId,
    history: heapless::Deque<StateId, HISTORY_DEPTH>,
    entered_at_ms: u64,
    observer: Option<TransitionObserverFn>,
}

impl SessionFsm {
    /// Construct an FSM from its tables, starting in `initial`.
    pub fn new(
        states: [StateDescriptor; StateId::COUNT],
        transitions: TransitionTable,
        initial: StateId,
    ) -> Self {
        Self {
            states,
            transitions,
            timeouts: [None; StateId::COUNT],
            current: initial,
            previous: initial,
            history: heapless::Deque::new(),
            entered_at_ms: 0,
            observer: None,
        }
    }

    /// The standard provisioning FSM built from [`states`].
    pub fn provisioning() -> Self {
        Self::new(
            states::build_state_table(),
            states::build_transition_table(),
            StateId::Idle,
        )
    }

    /// Replace the whole dwell-limit table.
    pub fn set_timeouts(&mut self, timeouts: [Option<u64>; StateId::COUNT]) {
        self.timeouts = timeouts;
    }

    /// Set or clear the dwell limit for one state.
    pub fn set_timeout(&mut self, state: StateId, limit_ms: Option<u64>) {
        self.timeouts[state as usize] = limit_ms;
    }

    /// Register the transition observer (one per session).
    pub fn set_observer(&mut self, observer: TransitionObserverFn) {
        self.observer = Some(observer);
    }

    /// Run the initial `on_enter` for the starting state.
    /// Call once after construction, before the first event.
    pub fn start(&mut self, ctx: &mut SessionContext) {
        info!("FSM starting in state: {}", self.descriptor(self.current).name);
        self.entered_at_ms = ctx.now_ms;
        ctx.state_entered_at_ms = ctx.now_ms;
        self.push_history(self.current);
        if let Some(enter) = self.descriptor(self.current).on_enter {
            enter(ctx);
        }
    }

    /// Feed one event.  Returns `true` when a transition executed.
    pub fn handle_event(&mut self, event: SessionEvent, ctx: &mut SessionContext) -> bool {
        let Some(row) = self.lookup(self.current, event) else {
            debug!(
                "FSM: {} ignored in {}",
                event.name(),
                self.descriptor(self.current).name
            );
            return false;
        };

        if row.guard.is_some_and(|guard| !guard(ctx)) {
            debug!(
                "FSM: guard rejected {} in {}",
                event.name(),
                self.descriptor(self.current).name
            );
            return false;
        }

        self.execute(row, event, ctx);
        true
    }

    /// Compare dwell time against the current state's limit and, on expiry,
    /// synthesise the matching timeout event.  A timeout with no table row
    /// escalates to `ErrorOccurred`.  Returns `true` if a timeout fired.
    pub fn check_timeouts(&mut self, ctx: &mut SessionContext) -> bool {
        let Some(limit) = self.timeouts[self.current as usize] else {
            return false;
        };
        if self.time_in_state(ctx.now_ms) < limit {
            return false;
        }

        let state = self.current;
        let event = states::timeout_event(state);
        warn!("FSM: {} timed out after {} ms", state.name(), limit);

        if !self.handle_event(event, ctx) {
            ctx.record_error(ErrorCode::Timeout, state.name());
            self.handle_event(SessionEvent::ErrorOccurred, ctx);
        }
        true
    }

    /// Jump straight to `next`, running exit/enter hooks but bypassing the
    /// table (diagnostics and recovery tooling).
    pub fn force_state(&mut self, next: StateId, ctx: &mut SessionContext) {
        if next != self.current {
            warn!("FSM forced: {} -> {}", self.current.name(), next.name());
            self.run_exit(self.current, ctx);
            self.switch_to(next, ctx);
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn current_state(&self) -> StateId {
        self.current
    }

    pub fn previous_state(&self) -> StateId {
        self.previous
    }

    /// Milliseconds since the current state was entered.
    pub fn time_in_state(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_at_ms)
    }

    /// Up to `max` most recent states, oldest first.
    pub fn history(&self, max: usize) -> heapless::Vec<StateId, HISTORY_DEPTH> {
        let skip = self.history.len().saturating_sub(max);
        self.history.iter().skip(skip).copied().collect()
    }

    /// Events that have a row from the current state.
    pub fn valid_events(&self) -> heapless::Vec<SessionEvent, { SessionEvent::COUNT }> {
        SessionEvent::ALL
            .iter()
            .copied()
            .filter(|e| self.is_event_valid(*e))
            .collect()
    }

    pub fn is_event_valid(&self, event: SessionEvent) -> bool {
        self.lookup(self.current, event).is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.current == StateId::Provisioned
    }

    pub fn is_error(&self) -> bool {
        self.current == StateId::Error
    }

    // ── Runtime table editing ─────────────────────────────────

    /// Add a row, replacing any existing row for the same `(from, event)`.
    /// Returns `false` when the table is full.
    pub fn add_transition(&mut self, row: Transition) -> bool {
        if let Some(existing) = self
            .transitions
            .iter_mut()
            .find(|t| t.from == row.from && t.event == row.event)
        {
            *existing = row;
            return true;
        }
        self.transitions.push(row).is_ok()
    }

    /// Remove the row for `(from, event)`.  Returns whether one existed.
    pub fn remove_transition(&mut self, from: Option<StateId>, event: SessionEvent) -> bool {
        match self
            .transitions
            .iter()
            .position(|t| t.from == from && t.event == event)
        {
            Some(idx) => {
                self.transitions.remove(idx);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn descriptor(&self, id: StateId) -> &StateDescriptor {
        &self.states[id as usize]
    }

    /// Specific rows win; wildcard rows are consulted only when none matched.
    fn lookup(&self, from: StateId, event: SessionEvent) -> Option<Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == Some(from) && t.event == event)
            .or_else(|| {
                self.transitions
                    .iter()
                    .find(|t| t.from.is_none() && t.event == event)
            })
            .copied()
    }

    fn execute(&mut self, row: Transition, event: SessionEvent, ctx: &mut SessionContext) {
        let from = self.current;
        info!(
            "FSM transition: {} -> {} ({})",
            self.descriptor(from).name,
            self.descriptor(row.to).name,
            event.name()
        );

        self.run_exit(from, ctx);
        if let Some(action) = row.action {
            action(ctx);
        }
        if let Some(observer) = self.observer {
            observer(from, row.to, event, ctx);
        }
        self.switch_to(row.to, ctx);
    }

    fn run_exit(&self, from: StateId, ctx: &mut SessionContext) {
        if let Some(exit) = self.descriptor(from).on_exit {
            exit(ctx);
        }
    }

    fn switch_to(&mut self, next: StateId, ctx: &mut SessionContext) {
        self.previous = self.current;
        self.current = next;
        self.push_history(next);
        self.entered_at_ms = ctx.now_ms;
        ctx.state_entered_at_ms = ctx.now_ms;

        if let Some(enter) = self.descriptor(next).on_enter {
            enter(ctx);
        }
    }

    fn push_history(&mut self, state: StateId) {
        if self.history.is_full() {
            self.history.pop_front();
        }
        // Cannot fail: a slot was just freed if needed.
        let _ = self.history.push_back(state);
    }
}
