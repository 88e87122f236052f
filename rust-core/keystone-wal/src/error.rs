// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Defines every failure the log layer can surface: device errors, checksum
// failures found on replay, the internal capacity signal that drives segment
// rotation, and configuration mistakes.

use std::fmt;

use thiserror::Error;

/// The exact place in the log where replay stopped trusting the data.
///
/// Returned inside [`WalError::CorruptEntry`] so that the caller can decide
/// whether to truncate the log at `offset` (see
/// [`crate::WalWriter::truncate_at`]) or abort recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorruptionPoint {
    /// Segment holding the first bad entry.
    pub segment_id: u64,
    /// Byte offset of the first bad entry inside that segment.
    pub offset: u64,
    /// Sequence of the last entry that passed validation, or `0` if none did.
    pub last_good_sequence: u64,
}

impl fmt::Display for CorruptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "segment {} offset {} (last good sequence {})",
            self.segment_id, self.offset, self.last_good_sequence
        )
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An I/O error occurred while reading or writing a segment file.
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry failed validation during replay (checksum mismatch, bad
    /// length, a sealed segment ending mid-entry, or a hole in the sequence
    /// numbering).
    #[error("corrupt WAL entry at {point}: {reason}")]
    CorruptEntry {
        /// Where the corruption was detected.
        point: CorruptionPoint,
        /// Human-readable cause.
        reason: String,
    },

    /// The active segment cannot take the entry without exceeding the
    /// configured segment size. The segment store consumes this by rotating;
    /// callers of `append` never observe it.
    #[error("segment {segment_id} is full: {size} + {incoming} bytes exceeds {max}")]
    CapacityExceeded {
        /// The active segment id.
        segment_id: u64,
        /// Current size of the active segment.
        size: u64,
        /// Size of the entry that did not fit.
        incoming: u64,
        /// Configured maximum segment size.
        max: u64,
    },

    /// A single entry is larger than the hard per-entry limit.
    #[error("entry of {length} bytes exceeds maximum {max_length}")]
    EntryTooLarge {
        /// Encoded length of the rejected entry.
        length: u64,
        /// The hard limit.
        max_length: u64,
    },

    /// An entry could not be made durable and could not be removed either.
    /// The writer refuses further appends.
    #[error("WAL writer stopped: entry {0} failed to sync and could not be rolled back")]
    WriterFailed(u64),

    /// The WAL directory does not exist or is not accessible.
    #[error("WAL directory not found or inaccessible: {0}")]
    DirectoryNotFound(String),

    /// A segment referenced by id is not part of the log.
    #[error("WAL segment {0} not found")]
    SegmentNotFound(u64),

    /// A configuration value is out of range.
    #[error("invalid WAL configuration: {0}")]
    InvalidConfig(String),
}

impl WalError {
    /// Returns the corruption point if this error describes corrupt data.
    pub fn corruption_point(&self) -> Option<CorruptionPoint> {
        match self {
            Self::CorruptEntry { point, .. } => Some(*point),
            _ => None,
        }
    }
}

/// Convenience type alias for WAL results.
pub type WalResult<T> = Result<T, WalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_corrupt_entry() {
        let error = WalError::CorruptEntry {
            point: CorruptionPoint {
                segment_id: 3,
                offset: 128,
                last_good_sequence: 41,
            },
            reason: "crc mismatch".to_string(),
        };
        let message = format!("{error}");
        assert!(message.contains("segment 3"));
        assert!(message.contains("offset 128"));
        assert!(message.contains("41"));
        assert_eq!(error.corruption_point().map(|p| p.last_good_sequence), Some(41));
    }

    #[test]
    fn test_error_display_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let error = WalError::Io(io_error);
        assert!(format!("{error}").contains("file gone"));
        assert!(error.corruption_point().is_none());
    }

    #[test]
    fn test_error_display_capacity() {
        let error = WalError::CapacityExceeded {
            segment_id: 7,
            size: 90,
            incoming: 20,
            max: 100,
        };
        let message = format!("{error}");
        assert!(message.contains("segment 7"));
        assert!(message.contains("100"));
    }
}
