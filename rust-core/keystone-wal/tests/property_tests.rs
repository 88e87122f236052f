// SPDX-License-Identifier: PMPL-1.0-or-later
//! Property-based tests for the write-ahead log

use keystone_wal::{LogEntry, WalConfig, WalResult, WalWriter};
use proptest::prelude::*;
use tempfile::TempDir;

/// Generate arbitrary payloads of varying size.
fn arb_payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..60)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_read_back_is_gapless_across_rotations(
        payloads in arb_payloads(),
        segment_size in 64u64..1024,
        batch in 1usize..16
    ) {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open(
            dir.path(),
            WalConfig { segment_size, read_batch_size: batch, ..Default::default() },
        )
        .unwrap();

        for payload in &payloads {
            writer.write(payload).unwrap();
        }

        let entries: Vec<LogEntry> = writer
            .reader()
            .replay_all()
            .collect::<WalResult<_>>()
            .unwrap();

        prop_assert_eq!(entries.len(), payloads.len());
        for (index, (entry, payload)) in entries.iter().zip(&payloads).enumerate() {
            prop_assert_eq!(entry.sequence, index as u64 + 1);
            prop_assert_eq!(&entry.payload, payload);
        }
    }

    #[test]
    fn test_reopen_continues_sequence(
        first in arb_payloads(),
        second in arb_payloads(),
        segment_size in 64u64..512
    ) {
        let dir = TempDir::new().unwrap();
        let config = WalConfig { segment_size, ..Default::default() };

        {
            let writer = WalWriter::open(dir.path(), config.clone()).unwrap();
            for payload in &first {
                writer.write(payload).unwrap();
            }
        }

        let writer = WalWriter::open(dir.path(), config).unwrap();
        for (offset, payload) in second.iter().enumerate() {
            let seq = writer.write(payload).unwrap();
            prop_assert_eq!(seq, (first.len() + offset + 1) as u64);
        }

        let count = writer.reader().replay_all().count();
        prop_assert_eq!(count, first.len() + second.len());
    }

    #[test]
    fn test_read_from_skips_exactly_the_prefix(
        payloads in arb_payloads(),
        start_fraction in 0.0f64..1.0
    ) {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open(
            dir.path(),
            WalConfig { segment_size: 256, read_batch_size: 5, ..Default::default() },
        )
        .unwrap();
        for payload in &payloads {
            writer.write(payload).unwrap();
        }

        let from = 1 + (start_fraction * payloads.len() as f64) as u64;
        let sequences: Vec<u64> = writer
            .reader()
            .read_from(from)
            .map(|e| e.unwrap().sequence)
            .collect();

        let expected: Vec<u64> = (from..=payloads.len() as u64).collect();
        prop_assert_eq!(sequences, expected);
    }
}
