//! Fuzz target: `Reassembler::feed`
//!
//! Splits the input into writes (the first byte of each chunk is its
//! length) and drives them into one reassembler across two channels.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - A completed frame never exceeds the configured maximum
//! - `discard_all` always leaves the reassembler idle
//!
//! cargo fuzz run fuzz_reassembler

#![no_main]

use libfuzzer_sys::fuzz_target;
use wifiprov::link::channels::ChannelId;
use wifiprov::link::chunked::Reassembler;

const MAX_FRAME: usize = 1024;

fuzz_target!(|data: &[u8]| {
    let mut reassembler = Reassembler::new(MAX_FRAME, 500);
    let mut rest = data;
    let mut now = 0u64;

    while let Some((&len, tail)) = rest.split_first() {
        let take = usize::from(len & 0x7f).min(tail.len());
        let (write, next) = tail.split_at(take);
        let channel = if len & 0x80 == 0 {
            ChannelId::Credentials
        } else {
            ChannelId::Control
        };

        if let Ok(Some(frame)) = reassembler.feed(channel, write, now) {
            assert!(frame.len() <= MAX_FRAME, "frame exceeds limit");
        }
        now += u64::from(len);
        reassembler.expire_stale(now);
        rest = next;
    }

    reassembler.discard_all();
    assert!(reassembler.is_idle());
});
