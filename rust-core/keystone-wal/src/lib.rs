// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log (WAL) crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Durable, append-only log of opaque payloads. Procedure state transitions
// are written here before they are acknowledged, and replayed on start-up to
// rebuild in-memory state.
//
// # Architecture
//
// The WAL is a sequence of **segment files** in a dedicated directory. Each
// segment is an append-only binary file of length-prefixed, CRC32-protected
// entries. The highest-id segment is active; all others are sealed. When an
// append would push the active segment past the configured size (default
// 1 GiB) the segment is sealed and a new one opened, invisibly to the caller.
// Sealed segments are purged once they are old or large enough and no
// unfinished work still needs them.
//
// ## On-disk entry format (all integers little-endian)
//
// ```text
// [4 bytes: entry_length (u32)]   -- length of everything after this field
// [4 bytes: crc32 checksum]       -- CRC32 of all bytes after this field
// [8 bytes: sequence (u64)]
// [8 bytes: timestamp (i64)]      -- Unix milliseconds UTC
// [4 bytes: payload_len (u32)]
// [M bytes: payload]
// ```
//
// ## Usage
//
// ```no_run
// use keystone_wal::{WalConfig, WalWriter};
//
// let writer = WalWriter::open("/tmp/keystone-wal", WalConfig::default()).unwrap();
// let seq = writer.write(b"{\"op\":\"noop\"}").unwrap();
//
// for entry in writer.reader().read_from(seq) {
//     let entry = entry.unwrap();
//     println!("seq={} bytes={}", entry.sequence, entry.payload.len());
// }
//
// let removed = writer.purger().purge(&|| None::<u64>).unwrap();
// println!("purged {removed} segments");
// ```

pub mod catalog;
pub mod config;
pub mod entry;
pub mod error;
pub mod purge;
pub mod reader;
pub mod segment;
pub mod store;
pub mod writer;

// Re-export the primary public API for ergonomic imports.
pub use catalog::{CatalogSnapshot, SegmentCatalog, SharedCatalog};
pub use config::{CorruptionPolicy, WalConfig};
pub use entry::{LogEntry, MAX_ENTRY_SIZE};
pub use error::{CorruptionPoint, WalError, WalResult};
pub use purge::{select_purgeable, PurgePolicy, RetentionGuard, SegmentPurger};
pub use reader::{EntryStream, WalReader};
pub use segment::{list_segments, SegmentInfo};
pub use store::SegmentStore;
pub use writer::{SyncMode, WalStats, WalWriter};
