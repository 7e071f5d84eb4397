//! Fuzz target: `CredentialRecord::parse`
//!
//! Arbitrary bytes stand in for a decrypted credential frame.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - An accepted record always fits the persisted form
//!
//! cargo fuzz run fuzz_credential_record

#![no_main]

use libfuzzer_sys::fuzz_target;
use wifiprov::app::credentials::CredentialRecord;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = CredentialRecord::parse(data) {
        assert!(!record.ssid.is_empty());
        assert!(record.to_stored().is_ok(), "validated record must persist");
    }
});
