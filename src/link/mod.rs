//! Link layer: everything between raw attribute writes and whole frames.
//!
//! ```text
//!  inbound:   GATT write ──▶ Reassembler (per channel) ──▶ complete frame
//!  outbound:  frame ──▶ split_frame(mtu - 3) ──▶ OperationQueue ──▶ TransportPort
//! ```

pub mod channels;
pub mod chunked;
pub mod queue;

use log::debug;

use crate::config::ProvisioningConfig;
use crate::error::LinkError;
use channels::ChannelId;
use chunked::{Reassembler, split_frame};
use queue::{GattOperation, OperationKind, OperationQueue};

/// Minimum ATT MTU.
pub const DEFAULT_MTU: usize = 23;
/// Largest ATT MTU a peer may negotiate.
pub const MAX_MTU: usize = 517;
/// ATT opcode + handle overhead on every notification.
const ATT_OVERHEAD: usize = 3;

pub struct Link {
    pub queue: OperationQueue,
    pub reassembler: Reassembler,
    mtu: usize,
}

impl Link {
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self {
            queue: OperationQueue::new(
                config.operation_max_retries,
                u64::from(config.operation_timeout_ms),
            ),
            reassembler: Reassembler::new(
                usize::from(config.max_frame_len),
                u64::from(config.chunk_inactivity_ms),
            ),
            mtu: DEFAULT_MTU,
        }
    }

    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu.clamp(DEFAULT_MTU, MAX_MTU);
        debug!("Link: MTU {} (payload {})", self.mtu, self.max_payload_size());
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn max_payload_size(&self) -> usize {
        self.mtu - ATT_OVERHEAD
    }

    /// Fragment `payload` to the current MTU and enqueue every fragment.
    /// Either all fragments are queued or none are.
    pub fn send(
        &mut self,
        kind: OperationKind,
        channel: ChannelId,
        payload: &[u8],
        now_ms: u64,
    ) -> Result<usize, LinkError> {
        let frags = split_frame(payload, self.max_payload_size());
        if frags.is_empty() {
            return Err(LinkError::FrameTooLarge);
        }
        if frags.len() > self.queue.free_slots() {
            return Err(LinkError::QueueFull);
        }
        let count = frags.len();
        for frag in frags {
            self.queue
                .enqueue(GattOperation::new(kind, channel, frag), now_ms)?;
        }
        Ok(count)
    }

    /// Drop all partial transfers and pending operations.
    pub fn reset(&mut self) {
        self.reassembler.discard_all();
        self.queue.clear();
        self.mtu = DEFAULT_MTU;
    }
}
