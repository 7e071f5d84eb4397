//! Provisioning service: the hexagonal core.
//!
//! [`ProvisioningService`] exclusively owns the session FSM, its context,
//! the security layer, the link layer, and the session metrics.  All I/O
//! flows through port traits passed in at call sites, so the whole engine
//! runs against mock adapters on the host.
//!
//! ```text
//!  IngressHandle ──▶ ┌────────────────────────────┐ ──▶ EventSink
//!                    │     ProvisioningService     │
//!  DevicePorts  ◀──  │ FSM · Security · Link · Orc │
//!                    └────────────────────────────┘
//! ```
//!
//! One [`tick`](ProvisioningService::tick) does, in order:
//!
//! 1. dwell-limit check and stale chunk expiry,
//! 2. `process_queue` on the outbound operation queue,
//! 3. deferred orchestrator work (key agreement),
//! 4. drain the ingress queue.

use log::{info, warn};

use crate::adapters::time::{TickClock, TimeProvider};
use crate::config::ProvisioningConfig;
use crate::error::Result;
use crate::events::{InboundEvent, Ingress, IngressHandle};
use crate::fsm::context::SessionContext;
use crate::fsm::states::{build_timeout_table, record_transition};
use crate::fsm::{HISTORY_DEPTH, SessionEvent, SessionFsm, StateId};
use crate::link::Link;
use crate::security::SecurityLayer;

use super::events::ProvisioningEvent;
use super::orchestrator::{Orchestrator, OrchestratorState};
use super::ports::{CredentialStore, DevicePorts, EventSink, StoredCredentials};

/// Token bucket gating credential submissions, refilled on tick time.
pub type CredentialLimiter = burster::TokenBucket<TimeProvider>;

/// A fresh, full limiter sized from `config`.
pub(crate) fn new_limiter(config: &ProvisioningConfig, clock: &TickClock) -> CredentialLimiter {
    burster::TokenBucket::new_with_time_provider(
        u64::from(config.credential_attempts_per_sec),
        u64::from(config.credential_burst),
        clock.time_provider(),
    )
}

// ───────────────────────────────────────────────────────────────
// Metrics
// ───────────────────────────────────────────────────────────────

/// Session counters.  Cleared by [`ProvisioningService::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisioningMetrics {
    /// Credential records accepted and handed to the network provider.
    pub attempts: u32,
    pub successful: u32,
    /// Entries into `Error`.
    pub failed: u32,
    pub credentials_rejected: u32,
    pub decrypt_failures: u32,
    pub peer_disconnections: u32,
    /// Network drops after `Provisioned`.
    pub network_disconnections: u32,
    /// Outbound operations dropped after exhausting their retry budget.
    pub dropped_operations: u32,
    pub total_provisioning_ms: u64,
}

impl ProvisioningMetrics {
    /// Mean connect-to-provisioned time over successful sessions.
    pub fn average_provisioning_ms(&self) -> u64 {
        match self.successful {
            0 => 0,
            n => self.total_provisioning_ms / u64::from(n),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ProvisioningService
// ───────────────────────────────────────────────────────────────

pub struct ProvisioningService {
    config: ProvisioningConfig,
    fsm: SessionFsm,
    ctx: SessionContext,
    security: SecurityLayer,
    link: Link,
    ingress: Ingress,
    metrics: ProvisioningMetrics,
    limiter: CredentialLimiter,
    clock: TickClock,
    orchestration: OrchestratorState,
    started: bool,
}

impl ProvisioningService {
    /// Validate `config` and build every component.
    ///
    /// Does **not** start the FSM; call [`start`](Self::start) next.
    pub fn new(config: ProvisioningConfig) -> Result<Self> {
        config.validate()?;

        let mut fsm = SessionFsm::provisioning();
        fsm.set_timeouts(build_timeout_table(&config));
        fsm.set_observer(record_transition);

        let clock = TickClock::new();
        Ok(Self {
            ctx: SessionContext::new(config.security_level.requires_encryption()),
            security: SecurityLayer::new(&config),
            link: Link::new(&config),
            ingress: Ingress::new(),
            metrics: ProvisioningMetrics::default(),
            limiter: new_limiter(&config, &clock),
            clock,
            orchestration: OrchestratorState::default(),
            started: false,
            fsm,
            config,
        })
    }

    /// Producer handle for transport and network adapters.
    pub fn ingress_handle(&self) -> IngressHandle {
        self.ingress.handle()
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter `Idle` and generate the first key pair.
    pub fn start(&mut self, now_ms: u64, dev: &mut impl DevicePorts, sink: &mut impl EventSink) {
        if self.started {
            warn!("ProvisioningService already started");
            return;
        }
        self.started = true;
        self.ctx.now_ms = now_ms;
        self.fsm.start(&mut self.ctx);
        self.orchestrator(now_ms, dev, &mut *sink).settle();
        sink.emit(&ProvisioningEvent::Started(self.fsm.current_state()));
        info!("ProvisioningService started in {}", self.fsm.current_state().name());
    }

    /// Run one control cycle.  Nothing here blocks.
    pub fn tick(&mut self, now_ms: u64, dev: &mut impl DevicePorts, sink: &mut impl EventSink) {
        if !self.started {
            return;
        }

        // 1. Dwell limits and abandoned transfers
        self.link.reassembler.expire_stale(now_ms);
        self.ctx.now_ms = now_ms;
        self.ctx.secure = self.security.is_secure(now_ms);
        let dwelling_in = self.fsm.current_state();
        if self.fsm.check_timeouts(&mut self.ctx) {
            self.orchestrator(now_ms, &mut *dev, &mut *sink)
                .on_timeout(dwelling_in);
        }

        // 2. Outbound operations
        self.link.queue.process_queue(now_ms, &mut *dev);

        // 3. Deferred work from earlier frames
        self.orchestrator(now_ms, &mut *dev, &mut *sink).run_pending();

        // 4. Everything the adapters posted since the last tick
        while let Some(event) = self.ingress.try_take() {
            self.orchestrator(now_ms, &mut *dev, &mut *sink)
                .handle_inbound(event);
        }
    }

    /// Handle one inbound event immediately, bypassing the ingress queue.
    pub fn handle_event(
        &mut self,
        event: InboundEvent,
        now_ms: u64,
        dev: &mut impl DevicePorts,
        sink: &mut impl EventSink,
    ) {
        if !self.started {
            warn!("ProvisioningService: event before start dropped");
            return;
        }
        self.orchestrator(now_ms, dev, sink).handle_inbound(event);
    }

    /// `Idle → Advertising`.  Returns `false` from any other state.
    pub fn start_provisioning(
        &mut self,
        now_ms: u64,
        dev: &mut impl DevicePorts,
        sink: &mut impl EventSink,
    ) -> bool {
        self.started && self.orchestrator(now_ms, dev, sink).dispatch(SessionEvent::StartAdvertising)
    }

    /// Abort the session from any state, drop everything queued, and clear
    /// the metrics.
    pub fn reset(&mut self, now_ms: u64, dev: &mut impl DevicePorts, sink: &mut impl EventSink) {
        self.ingress.clear();
        self.link.reset();
        if self.started {
            self.orchestrator(now_ms, dev, sink)
                .dispatch(SessionEvent::ResetRequested);
        }
        self.metrics = ProvisioningMetrics::default();
        self.link.queue.reset_stats();
        info!("ProvisioningService reset");
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    pub fn previous_state(&self) -> StateId {
        self.fsm.previous_state()
    }

    /// Up to `max` most recent states, oldest first.
    pub fn history(&self, max: usize) -> heapless::Vec<StateId, HISTORY_DEPTH> {
        self.fsm.history(max)
    }

    pub fn is_secure(&self, now_ms: u64) -> bool {
        self.security.is_secure(now_ms)
    }

    pub fn metrics(&self) -> ProvisioningMetrics {
        ProvisioningMetrics {
            dropped_operations: self.link.queue.dropped_count(),
            ..self.metrics
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn security(&self) -> &SecurityLayer {
        &self.security
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Runtime access to the FSM tables (extra rows, custom dwell limits).
    pub fn fsm_mut(&mut self) -> &mut SessionFsm {
        &mut self.fsm
    }

    /// Credentials saved by an earlier session, so the application can skip
    /// provisioning on boot.
    pub fn stored_credentials(
        &self,
        store: &impl CredentialStore,
    ) -> Result<Option<StoredCredentials>> {
        Ok(store.load()?)
    }

    // ── Internal ──────────────────────────────────────────────

    fn orchestrator<'a, D: DevicePorts, E: EventSink>(
        &'a mut self,
        now_ms: u64,
        dev: &'a mut D,
        sink: &'a mut E,
    ) -> Orchestrator<'a, D, E> {
        self.clock.set(now_ms);
        Orchestrator {
            config: &self.config,
            fsm: &mut self.fsm,
            ctx: &mut self.ctx,
            security: &mut self.security,
            link: &mut self.link,
            metrics: &mut self.metrics,
            limiter: &mut self.limiter,
            clock: &self.clock,
            state: &mut self.orchestration,
            dev,
            sink,
            now_ms,
        }
    }
}
