//! Serialised GATT operation queue.
//!
//! The radio stack accepts one attribute operation at a time.  Callers
//! enqueue; `process_queue` is called from every tick and walks the
//! in-flight operation through issue → completion → retry/drop.
//!
//! ```text
//!  enqueue ──▶ [ pending FIFO (16) ] ──pop──▶ current ──issue──▶ transport
//!                                               ▲   │
//!                     retry (retry_count+1) ────┘   ├─ notify / write-no-rsp: done on issue
//!                                                   └─ read / write / indicate: wait for
//!                                                      complete() or operation timeout
//! ```
//!
//! Every operation is tagged with the connection epoch it was enqueued in.
//! [`OperationQueue::begin_epoch`] cancels everything from older epochs so
//! a reconnecting peer never receives a previous session's notifications.

use log::{debug, warn};

use super::channels::ChannelId;
use crate::app::ports::TransportPort;
use crate::error::LinkError;

/// Bound on queued (not yet issued) operations.
pub const QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_MAX_RETRIES: u8 = 3;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
    WriteNoResponse,
    Notify,
    Indicate,
}

impl OperationKind {
    /// Unacknowledged kinds finish as soon as the transport accepts them.
    pub const fn completes_on_issue(self) -> bool {
        matches!(self, Self::Notify | Self::WriteNoResponse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    /// Retry budget exhausted.
    Failed,
    /// Dropped because the connection it belonged to ended.
    Cancelled,
}

/// Continuation invoked exactly once with the operation's outcome.
pub type Completion = Box<dyn FnOnce(OperationOutcome) + Send>;

// ── Operation ────────────────────────────────────────────────

pub struct GattOperation {
    pub kind: OperationKind,
    pub channel: ChannelId,
    pub payload: Vec<u8>,
    pub retry_count: u8,
    /// `None` takes the queue's configured budget at enqueue time.
    pub max_retries: Option<u8>,
    pub enqueued_at_ms: u64,
    pub epoch: u32,
    issued_at_ms: Option<u64>,
    completion: Option<Completion>,
}

impl GattOperation {
    pub fn new(kind: OperationKind, channel: ChannelId, payload: Vec<u8>) -> Self {
        Self {
            kind,
            channel,
            payload,
            retry_count: 0,
            max_retries: None,
            enqueued_at_ms: 0,
            epoch: 0,
            issued_at_ms: None,
            completion: None,
        }
    }

    pub fn notify(channel: ChannelId, payload: Vec<u8>) -> Self {
        Self::new(OperationKind::Notify, channel, payload)
    }

    pub fn indicate(channel: ChannelId, payload: Vec<u8>) -> Self {
        Self::new(OperationKind::Indicate, channel, payload)
    }

    pub fn write(channel: ChannelId, payload: Vec<u8>) -> Self {
        Self::new(OperationKind::Write, channel, payload)
    }

    pub fn read(channel: ChannelId) -> Self {
        Self::new(OperationKind::Read, channel, Vec::new())
    }

    pub fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_completion(mut self, f: impl FnOnce(OperationOutcome) + Send + 'static) -> Self {
        self.completion = Some(Box::new(f));
        self
    }

    fn finish(mut self, outcome: OperationOutcome) {
        if let Some(f) = self.completion.take() {
            f(outcome);
        }
    }
}

impl core::fmt::Debug for GattOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GattOperation")
            .field("kind", &self.kind)
            .field("channel", &self.channel)
            .field("len", &self.payload.len())
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("epoch", &self.epoch)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

// ── Queue ────────────────────────────────────────────────────

/// Queue counters, folded into the service metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub issued: u32,
    pub retried: u32,
    pub dropped: u32,
    pub cancelled: u32,
    pub rejected: u32,
}

pub struct OperationQueue {
    pending: heapless::Deque<GattOperation, QUEUE_CAPACITY>,
    current: Option<GattOperation>,
    /// Completion reported by the adapter for the current operation.
    reported: Option<bool>,
    epoch: u32,
    max_retries: u8,
    timeout_ms: u64,
    stats: QueueStats,
}

impl OperationQueue {
    pub fn new(max_retries: u8, timeout_ms: u64) -> Self {
        Self {
            pending: heapless::Deque::new(),
            current: None,
            reported: None,
            epoch: 0,
            max_retries,
            timeout_ms,
            stats: QueueStats::default(),
        }
    }

    /// Append an operation.  Fails without side effects when the queue is
    /// full; the operation's continuation is not called.
    pub fn enqueue(&mut self, mut op: GattOperation, now_ms: u64) -> Result<(), LinkError> {
        op.epoch = self.epoch;
        op.enqueued_at_ms = now_ms;
        op.max_retries = Some(op.max_retries.unwrap_or(self.max_retries));
        op.issued_at_ms = None;
        self.pending.push_back(op).map_err(|_| {
            self.stats.rejected += 1;
            warn!("Link: operation queue full");
            LinkError::QueueFull
        })
    }

    /// Advance the queue.  Call once per tick.
    pub fn process_queue(&mut self, now_ms: u64, transport: &mut impl TransportPort) {
        // 1. Resolve the in-flight operation.
        if self.current.as_ref().is_some_and(|op| op.issued_at_ms.is_some()) {
            match self.resolve(now_ms) {
                None => return,
                Some(true) => {
                    if let Some(op) = self.current.take() {
                        op.finish(OperationOutcome::Success);
                    }
                }
                Some(false) => self.fail_attempt(),
            }
        }

        // 2. Issue.  Unacknowledged operations finish immediately, so keep
        //    going until one must wait or an attempt fails.
        loop {
            if self.current.is_none() {
                self.current = self.pending.pop_front();
            }
            let Some(op) = self.current.as_mut() else {
                return;
            };

            self.reported = None;
            op.issued_at_ms = Some(now_ms);
            self.stats.issued += 1;

            match transport.issue(op) {
                Ok(()) if op.kind.completes_on_issue() => {
                    if let Some(op) = self.current.take() {
                        op.finish(OperationOutcome::Success);
                    }
                }
                Ok(()) => return,
                Err(e) => {
                    debug!("Link: issue {:?} on {} failed: {e}", op.kind, op.channel);
                    self.fail_attempt();
                    return;
                }
            }
        }
    }

    /// Completion reported by the transport for the in-flight operation.
    pub fn complete(&mut self, success: bool) {
        match &self.current {
            Some(op) if op.issued_at_ms.is_some() && !op.kind.completes_on_issue() => {
                self.reported = Some(success);
            }
            _ => debug!("Link: completion with nothing awaiting it"),
        }
    }

    /// Start a new connection epoch and cancel everything from older ones.
    pub fn begin_epoch(&mut self) -> usize {
        self.epoch = self.epoch.wrapping_add(1);
        self.purge_stale()
    }

    /// Cancel queued and in-flight operations not tagged with the current
    /// epoch.  Returns the number cancelled.
    pub fn purge_stale(&mut self) -> usize {
        let epoch = self.epoch;
        let mut cancelled = 0;

        if self.current.as_ref().is_some_and(|op| op.epoch != epoch) {
            if let Some(op) = self.current.take() {
                op.finish(OperationOutcome::Cancelled);
                cancelled += 1;
            }
            self.reported = None;
        }

        for _ in 0..self.pending.len() {
            let Some(op) = self.pending.pop_front() else {
                break;
            };
            if op.epoch == epoch {
                // Re-queue in order; there is room since we just popped.
                let _ = self.pending.push_back(op);
            } else {
                op.finish(OperationOutcome::Cancelled);
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            debug!("Link: cancelled {cancelled} stale operation(s)");
        }
        self.stats.cancelled += cancelled as u32;
        cancelled
    }

    /// Cancel everything regardless of epoch.
    pub fn clear(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.purge_stale();
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free_slots(&self) -> usize {
        QUEUE_CAPACITY - self.pending.len()
    }

    pub fn in_flight(&self) -> Option<&GattOperation> {
        self.current.as_ref().filter(|op| op.issued_at_ms.is_some())
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn dropped_count(&self) -> u32 {
        self.stats.dropped
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = QueueStats::default();
    }

    // ── internals ────────────────────────────────────────────

    /// `Some(success)` once the current operation has an outcome.
    fn resolve(&mut self, now_ms: u64) -> Option<bool> {
        if let Some(success) = self.reported.take() {
            return Some(success);
        }
        let op = self.current.as_ref()?;
        let issued = op.issued_at_ms?;
        if now_ms.saturating_sub(issued) >= self.timeout_ms {
            warn!(
                "Link: {:?} on {} timed out after {} ms",
                op.kind, op.channel, self.timeout_ms
            );
            return Some(false);
        }
        None
    }

    /// Count a failed attempt: keep the operation for re-issue while budget
    /// remains, otherwise drop it.
    fn fail_attempt(&mut self) {
        let Some(op) = self.current.as_mut() else {
            return;
        };
        let budget = op.max_retries.unwrap_or(self.max_retries);
        if op.retry_count < budget {
            op.retry_count += 1;
            op.issued_at_ms = None;
            self.stats.retried += 1;
            return;
        }
        if let Some(op) = self.current.take() {
            warn!(
                "Link: dropping {:?} on {} after {} retries",
                op.kind, op.channel, op.retry_count
            );
            self.stats.dropped += 1;
            op.finish(OperationOutcome::Failed);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
