// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Entry codec
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines the log entry and its binary encoding with CRC32 integrity
// checking.
//
// On-disk binary format (all integers little-endian):
//   [4 bytes: entry_length (u32)]   -- length of everything after this field
//   [4 bytes: crc32 checksum]       -- CRC32 of all bytes after this field
//   [8 bytes: sequence (u64)]
//   [8 bytes: timestamp (i64)]      -- Unix milliseconds UTC
//   [4 bytes: payload_len (u32)]
//   [M bytes: payload]

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};

/// Maximum allowed entry size: 64 MiB. Any entry declaring a larger size
/// is treated as corrupted, and appends above it are rejected.
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the checksummed fixed fields (sequence + timestamp + payload_len).
const FIXED_FIELDS_SIZE: usize = 8 + 8 + 4;

/// Smallest legal value of the `entry_length` field (crc + fixed fields).
pub const MIN_ENTRY_LENGTH: u32 = (4 + FIXED_FIELDS_SIZE) as u32;

/// A single entry in the write-ahead log. Entries are immutable once written
/// and only disappear when their whole segment is purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Strictly increasing sequence number assigned by the segment store.
    pub sequence: u64,

    /// UTC timestamp of when the entry was appended.
    pub timestamp: DateTime<Utc>,

    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

/// Why an encoded entry could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDefect {
    /// The stored CRC does not match the content.
    Checksum {
        /// CRC stored in the entry header.
        expected: u32,
        /// CRC computed over the content.
        actual: u32,
    },
    /// The content is shorter than its own fields claim.
    Malformed(&'static str),
}

impl fmt::Display for EntryDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checksum { expected, actual } => write!(
                f,
                "crc mismatch: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::Malformed(what) => write!(f, "malformed entry: {what}"),
        }
    }
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(sequence: u64, payload: Vec<u8>) -> Self {
        Self {
            sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Number of bytes `encode` will produce for a payload of `payload_len`.
    pub fn encoded_len(payload_len: usize) -> u64 {
        (LENGTH_PREFIX_SIZE + MIN_ENTRY_LENGTH as usize + payload_len) as u64
    }

    /// Encode this entry to the on-disk format, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        encode_parts(self.sequence, self.timestamp, &self.payload)
    }

    /// Decode an entry from the bytes that follow its length prefix (i.e.
    /// `data` begins with the CRC field and is exactly `entry_length` long).
    pub fn decode(data: &[u8]) -> Result<Self, EntryDefect> {
        if data.len() < MIN_ENTRY_LENGTH as usize {
            return Err(EntryDefect::Malformed("shorter than fixed header"));
        }

        let stored_crc = read_u32(data, 0);
        let inner = &data[4..];
        let computed_crc = compute_crc32(inner);
        if stored_crc != computed_crc {
            return Err(EntryDefect::Checksum {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let sequence = read_u64(inner, 0);
        let timestamp_millis = read_u64(inner, 8) as i64;
        let payload_len = read_u32(inner, 16) as usize;

        let payload_start = FIXED_FIELDS_SIZE;
        if inner.len() != payload_start + payload_len {
            return Err(EntryDefect::Malformed("payload length disagrees with entry length"));
        }

        let timestamp = Utc
            .timestamp_millis_opt(timestamp_millis)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Self {
            sequence,
            timestamp,
            payload: inner[payload_start..].to_vec(),
        })
    }
}

/// Encode an entry from its parts without building a [`LogEntry`] first.
pub fn encode_parts(sequence: u64, timestamp: DateTime<Utc>, payload: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(FIXED_FIELDS_SIZE + payload.len());
    inner.extend_from_slice(&sequence.to_le_bytes());
    inner.extend_from_slice(&timestamp.timestamp_millis().to_le_bytes());
    inner.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    inner.extend_from_slice(payload);

    let crc = compute_crc32(&inner);

    let entry_length = (4 + inner.len()) as u32;
    let mut buffer = Vec::with_capacity(LENGTH_PREFIX_SIZE + entry_length as usize);
    buffer.extend_from_slice(&entry_length.to_le_bytes());
    buffer.extend_from_slice(&crc.to_le_bytes());
    buffer.extend_from_slice(&inner);
    buffer
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Compute a CRC32 checksum over the given byte slice using the IEEE
/// polynomial (same as zlib/gzip).
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
