// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Segment files
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Each segment is a single append-only file named
// `wal-{segment_id:016}-{start_sequence:016}.log`. Only the segment with the
// highest id is writable; every other segment is sealed and, once old or
// large enough and no longer needed for recovery, purgeable.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{WalError, WalResult};

/// The file extension used for segment files.
pub const SEGMENT_EXTENSION: &str = "log";

/// The prefix used for segment file names.
pub const SEGMENT_PREFIX: &str = "wal-";

/// Metadata about a single segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Monotonic segment id.
    pub id: u64,

    /// Sequence number of the first entry this segment may contain. Every
    /// entry in the segment has sequence >= this value and < the next
    /// segment's start.
    pub start_sequence: u64,

    /// The full path to the segment file on disk.
    pub path: PathBuf,

    /// Current file size in bytes.
    pub file_size: u64,

    /// When the file was created (falls back to modification time on
    /// filesystems without birth time).
    pub created_at: DateTime<Utc>,

    /// Last modification time. For a sealed segment this is the seal time.
    pub modified_at: DateTime<Utc>,

    /// Whether the segment is sealed (immutable).
    pub sealed: bool,
}

impl SegmentInfo {
    /// Metadata for a segment that has just been created and is still empty.
    pub fn fresh(wal_dir: &Path, id: u64, start_sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            start_sequence,
            path: segment_path(wal_dir, id, start_sequence),
            file_size: 0,
            created_at: now,
            modified_at: now,
            sealed: false,
        }
    }

    /// Returns `true` if appending `incoming` bytes would exceed `max_size`.
    pub fn would_overflow(&self, incoming: u64, max_size: u64) -> bool {
        self.file_size + incoming > max_size
    }

    /// Time elapsed since the segment was last written.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.modified_at)
    }
}

impl PartialOrd for SegmentInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Build the canonical file name for a segment.
///
/// Format: `wal-0000000000000001-0000000000000001.log`
pub fn segment_filename(id: u64, start_sequence: u64) -> String {
    format!("{SEGMENT_PREFIX}{id:016}-{start_sequence:016}.{SEGMENT_EXTENSION}")
}

/// Build the full path for a segment file in the given WAL directory.
pub fn segment_path(wal_dir: &Path, id: u64, start_sequence: u64) -> PathBuf {
    wal_dir.join(segment_filename(id, start_sequence))
}

/// Parse `(segment_id, start_sequence)` from a segment file name.
///
/// Returns `None` if the name does not match the expected pattern.
pub fn parse_segment_filename(name: &str) -> Option<(u64, u64)> {
    let stripped = name.strip_prefix(SEGMENT_PREFIX)?;
    let stem = stripped.strip_suffix(&format!(".{SEGMENT_EXTENSION}"))?;
    let (id, start) = stem.split_once('-')?;
    Some((id.parse::<u64>().ok()?, start.parse::<u64>().ok()?))
}

fn to_utc(time: std::io::Result<SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

/// Scan a WAL directory and return metadata for all segment files, sorted
/// by segment id (ascending). Every segment except the last is marked sealed.
///
/// Non-segment files in the directory are silently ignored.
pub fn list_segments(wal_dir: &Path) -> WalResult<Vec<SegmentInfo>> {
    if !wal_dir.is_dir() {
        return Err(WalError::DirectoryNotFound(wal_dir.display().to_string()));
    }

    let mut segments = Vec::new();

    for dir_entry in fs::read_dir(wal_dir)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        let name = file_name.to_string_lossy();

        if let Some((id, start_sequence)) = parse_segment_filename(&name) {
            let metadata = dir_entry.metadata()?;
            let modified_at = to_utc(metadata.modified()).unwrap_or_else(Utc::now);
            let created_at = to_utc(metadata.created()).unwrap_or(modified_at);
            segments.push(SegmentInfo {
                id,
                start_sequence,
                path: dir_entry.path(),
                file_size: metadata.len(),
                created_at,
                modified_at,
                sealed: true,
            });
        }
    }

    segments.sort();
    if let Some(last) = segments.last_mut() {
        last.sealed = false;
    }

    debug!(
        count = segments.len(),
        dir = %wal_dir.display(),
        "Discovered WAL segments"
    );

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_segment(dir: &Path, id: u64, start_seq: u64, size_bytes: usize) {
        let mut file = File::create(segment_path(dir, id, start_seq)).unwrap();
        file.write_all(&vec![0u8; size_bytes]).unwrap();
    }

    #[test]
    fn test_segment_filename_format() {
        assert_eq!(
            segment_filename(1, 1),
            "wal-0000000000000001-0000000000000001.log"
        );
        assert_eq!(
            segment_filename(12, 9_999),
            "wal-0000000000000012-0000000000009999.log"
        );
    }

    #[test]
    fn test_parse_segment_filename() {
        assert_eq!(
            parse_segment_filename("wal-0000000000000003-0000000000000042.log"),
            Some((3, 42))
        );
        assert_eq!(parse_segment_filename("not-a-segment.txt"), None);
        assert_eq!(parse_segment_filename("wal-.log"), None);
        assert_eq!(parse_segment_filename("wal-0001.log"), None);
        assert_eq!(parse_segment_filename("wal-abc-def.log"), None);
        assert_eq!(parse_segment_filename(""), None);
    }

    #[test]
    fn test_list_segments_sorted_and_only_last_unsealed() {
        let dir = TempDir::new().unwrap();
        create_segment(dir.path(), 3, 100, 1024);
        create_segment(dir.path(), 1, 1, 512);
        create_segment(dir.path(), 2, 50, 2048);
        File::create(dir.path().join("readme.txt")).unwrap();

        let segments = list_segments(dir.path()).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].id, 1);
        assert_eq!(segments[0].file_size, 512);
        assert_eq!(segments[1].start_sequence, 50);
        assert_eq!(segments[2].id, 3);
        assert!(segments[0].sealed);
        assert!(segments[1].sealed);
        assert!(!segments[2].sealed);
    }

    #[test]
    fn test_list_segments_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list_segments(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_list_segments_nonexistent_dir() {
        let result = list_segments(Path::new("/nonexistent/wal/dir"));
        assert!(matches!(result, Err(WalError::DirectoryNotFound(_))));
    }

    #[test]
    fn test_would_overflow() {
        let mut info = SegmentInfo::fresh(Path::new("/tmp"), 1, 1);
        info.file_size = 90;
        assert!(info.would_overflow(11, 100));
        assert!(!info.would_overflow(10, 100));
    }
}
