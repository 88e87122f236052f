// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for WAL entry decoding

#![no_main]

use keystone_wal::entry::LogEntry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must be rejected, never panic.
    if let Ok(entry) = LogEntry::decode(data) {
        // Anything accepted survives a re-encode.
        let encoded = entry.encode();
        let again = LogEntry::decode(&encoded[4..]).expect("re-encoded entry decodes");
        assert_eq!(again.sequence, entry.sequence);
        assert_eq!(again.payload, entry.payload);
    }
});
