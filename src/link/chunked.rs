//! Fragmentation and reassembly of frames larger than one attribute write.
//!
//! Every write on an inbound channel starts with a one-byte header:
//!
//! ```text
//! 0x00 SINGLE  [0x00][whole frame ...]
//! 0x01 START   [0x01][expected: u16 LE][first bytes ...]
//! 0x02 CONT    [0x02][more bytes ...]
//! ```
//!
//! The receiver keeps at most one transfer per channel and delivers the
//! frame only when `received == expected`.  A partial frame is never
//! handed upward: overflow, inactivity, or a new START discards it.

use log::{debug, warn};

use super::channels::ChannelId;
use crate::error::LinkError;

pub const FRAG_SINGLE: u8 = 0x00;
pub const FRAG_START: u8 = 0x01;
pub const FRAG_CONT: u8 = 0x02;

/// Header bytes on a START fragment (kind + u16 size).
pub const START_HEADER_LEN: usize = 3;
/// Header bytes on SINGLE and CONT fragments.
pub const FRAG_HEADER_LEN: usize = 1;

// ── Transfer accumulator ─────────────────────────────────────

/// One in-progress inbound transfer.
#[derive(Debug, Default)]
pub struct ChunkedTransfer {
    buffer: Vec<u8>,
    expected: usize,
    started_at_ms: u64,
    last_fragment_ms: u64,
    in_progress: bool,
}

impl ChunkedTransfer {
    fn begin(&mut self, expected: usize, now_ms: u64) {
        self.buffer.clear();
        self.buffer.reserve(expected);
        self.expected = expected;
        self.started_at_ms = now_ms;
        self.last_fragment_ms = now_ms;
        self.in_progress = true;
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.expected = 0;
        self.in_progress = false;
    }

    /// Append bytes; `Ok(true)` when the frame is complete.
    fn append(&mut self, data: &[u8], now_ms: u64) -> Result<bool, LinkError> {
        if self.buffer.len() + data.len() > self.expected {
            self.reset();
            return Err(LinkError::Overflow);
        }
        self.buffer.extend_from_slice(data);
        self.last_fragment_ms = now_ms;
        Ok(self.buffer.len() == self.expected)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    fn is_stale(&self, now_ms: u64, inactivity_ms: u64) -> bool {
        self.in_progress && now_ms.saturating_sub(self.last_fragment_ms) > inactivity_ms
    }
}

// ── Reassembler ──────────────────────────────────────────────

/// Per-channel reassembly state.
pub struct Reassembler {
    transfers: [ChunkedTransfer; ChannelId::COUNT],
    max_frame_len: usize,
    inactivity_ms: u64,
}

impl Reassembler {
    pub fn new(max_frame_len: usize, inactivity_ms: u64) -> Self {
        Self {
            transfers: Default::default(),
            max_frame_len,
            inactivity_ms,
        }
    }

    /// Feed one write.  Returns the complete frame once the last byte of a
    /// transfer (or a SINGLE) arrives.
    pub fn feed(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        if !channel.is_inbound() {
            return Err(LinkError::NotInbound);
        }
        let (&kind, rest) = data.split_first().ok_or(LinkError::EmptyFragment)?;
        let max_frame_len = self.max_frame_len;
        let transfer = &mut self.transfers[channel as usize];

        match kind {
            FRAG_SINGLE => {
                if rest.len() > max_frame_len {
                    transfer.reset();
                    return Err(LinkError::FrameTooLarge);
                }
                if transfer.is_in_progress() {
                    debug!("Link: SINGLE on {channel} discards partial transfer");
                    transfer.reset();
                }
                Ok(Some(rest.to_vec()))
            }
            FRAG_START => {
                if rest.len() < 2 {
                    return Err(LinkError::TruncatedHeader);
                }
                let expected = usize::from(u16::from_le_bytes([rest[0], rest[1]]));
                if expected == 0 || expected > max_frame_len {
                    transfer.reset();
                    return Err(LinkError::FrameTooLarge);
                }
                if transfer.is_in_progress() {
                    warn!(
                        "Link: new START on {channel} discards {}/{} bytes",
                        transfer.received(),
                        transfer.expected()
                    );
                }
                transfer.begin(expected, now_ms);
                Self::finish(transfer, &rest[2..], now_ms)
            }
            FRAG_CONT => {
                if !transfer.is_in_progress() {
                    return Err(LinkError::NoTransferInProgress);
                }
                Self::finish(transfer, rest, now_ms)
            }
            other => Err(LinkError::UnknownFragmentKind(other)),
        }
    }

    fn finish(
        transfer: &mut ChunkedTransfer,
        data: &[u8],
        now_ms: u64,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        if transfer.append(data, now_ms)? {
            let frame = core::mem::take(&mut transfer.buffer);
            transfer.reset();
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }

    /// Discard transfers idle longer than the inactivity limit.  Returns the
    /// number discarded.
    pub fn expire_stale(&mut self, now_ms: u64) -> usize {
        let mut expired = 0;
        for (i, transfer) in self.transfers.iter_mut().enumerate() {
            if transfer.is_stale(now_ms, self.inactivity_ms) {
                warn!(
                    "Link: transfer on channel {i} idle, discarding {}/{} bytes",
                    transfer.received(),
                    transfer.expected()
                );
                transfer.reset();
                expired += 1;
            }
        }
        expired
    }

    pub fn discard(&mut self, channel: ChannelId) {
        self.transfers[channel as usize].reset();
    }

    pub fn discard_all(&mut self) {
        self.transfers.iter_mut().for_each(ChunkedTransfer::reset);
    }

    pub fn transfer(&self, channel: ChannelId) -> &ChunkedTransfer {
        &self.transfers[channel as usize]
    }

    pub fn is_idle(&self) -> bool {
        self.transfers.iter().all(|t| !t.is_in_progress())
    }
}

// ── Sender side ──────────────────────────────────────────────

/// Split `payload` into fragments no larger than `max_payload` bytes each
/// (headers included).  Returns an empty vector when `max_payload` cannot
/// carry any data or the payload exceeds the u16 size field.
pub fn split_frame(payload: &[u8], max_payload: usize) -> Vec<Vec<u8>> {
    if max_payload <= START_HEADER_LEN || payload.len() > usize::from(u16::MAX) {
        return Vec::new();
    }

    if payload.len() + FRAG_HEADER_LEN <= max_payload {
        let mut frag = Vec::with_capacity(payload.len() + FRAG_HEADER_LEN);
        frag.push(FRAG_SINGLE);
        frag.extend_from_slice(payload);
        return vec![frag];
    }

    let first_len = max_payload - START_HEADER_LEN;
    let (first, rest) = payload.split_at(first_len);
    let size = (payload.len() as u16).to_le_bytes();

    let mut frags = Vec::with_capacity(1 + rest.len().div_ceil(max_payload - FRAG_HEADER_LEN));
    let mut start = Vec::with_capacity(max_payload);
    start.push(FRAG_START);
    start.extend_from_slice(&size);
    start.extend_from_slice(first);
    frags.push(start);

    for chunk in rest.chunks(max_payload - FRAG_HEADER_LEN) {
        let mut cont = Vec::with_capacity(chunk.len() + FRAG_HEADER_LEN);
        cont.push(FRAG_CONT);
        cont.extend_from_slice(chunk);
        frags.push(cont);
    }
    frags
}

// ── Tests ────────────────────────────────────────────────────
