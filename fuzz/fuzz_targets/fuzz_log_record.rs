// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for procedure log record decoding

#![no_main]

use keystone_procedure::LogRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = LogRecord::decode(data);
});
