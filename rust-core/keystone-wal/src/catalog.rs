// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Segment catalog
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The catalog is the in-memory list of segments shared by the writer, any
// number of readers, and the purger. It only ever holds metadata, so every
// critical section on it is a handful of vector operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::segment::SegmentInfo;

/// Shared handle to a [`SegmentCatalog`].
pub type SharedCatalog = Arc<RwLock<SegmentCatalog>>;

/// Metadata for every segment currently part of the log.
#[derive(Debug, Clone)]
pub struct SegmentCatalog {
    wal_dir: PathBuf,
    /// Sealed segments, ascending by id.
    sealed: Vec<SegmentInfo>,
    /// The single writable segment.
    active: SegmentInfo,
    /// Highest sequence fully written to the log, `0` if none.
    last_sequence: u64,
}

/// A consistent point-in-time view of the catalog, used by readers.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    /// All segments (sealed first, active last), ascending by id.
    pub segments: Vec<SegmentInfo>,
    /// Highest sequence written when the snapshot was taken.
    pub last_sequence: u64,
}

impl SegmentCatalog {
    /// Build a catalog. Every segment in `sealed` is marked sealed and
    /// `active` is marked writable.
    pub fn new(
        wal_dir: impl AsRef<Path>,
        mut sealed: Vec<SegmentInfo>,
        mut active: SegmentInfo,
        last_sequence: u64,
    ) -> Self {
        for segment in &mut sealed {
            segment.sealed = true;
        }
        active.sealed = false;
        Self {
            wal_dir: wal_dir.as_ref().to_path_buf(),
            sealed,
            active,
            last_sequence,
        }
    }

    /// Wrap the catalog for sharing.
    pub fn into_shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    /// The WAL directory.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Sealed segments, oldest first.
    pub fn sealed(&self) -> &[SegmentInfo] {
        &self.sealed
    }

    /// The active segment.
    pub fn active(&self) -> &SegmentInfo {
        &self.active
    }

    /// Highest sequence written, `0` if the log is empty.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Total on-disk size of all sealed segments.
    pub fn sealed_bytes(&self) -> u64 {
        self.sealed.iter().map(|s| s.file_size).sum()
    }

    /// Total number of segments including the active one.
    pub fn segment_count(&self) -> usize {
        self.sealed.len() + 1
    }

    /// Take a snapshot for a reader.
    pub fn snapshot(&self) -> CatalogSnapshot {
        let mut segments = Vec::with_capacity(self.sealed.len() + 1);
        segments.extend(self.sealed.iter().cloned());
        segments.push(self.active.clone());
        CatalogSnapshot {
            segments,
            last_sequence: self.last_sequence,
        }
    }

    /// Record a completed append to the active segment.
    pub(crate) fn record_append(&mut self, bytes: u64, sequence: u64) {
        self.active.file_size += bytes;
        self.active.modified_at = Utc::now();
        self.last_sequence = sequence;
    }

    /// Undo the last append to the active segment.
    pub(crate) fn record_rollback(&mut self, file_size: u64, last_sequence: u64) {
        self.active.file_size = file_size;
        self.last_sequence = last_sequence;
    }

    /// Seal the active segment and install `next` as the new active one.
    pub(crate) fn rotate(&mut self, next: SegmentInfo) {
        let mut previous = std::mem::replace(&mut self.active, next);
        previous.sealed = true;
        previous.modified_at = Utc::now();
        self.sealed.push(previous);
    }

    /// Remove sealed segments by id. Returns the removed entries.
    pub(crate) fn remove_sealed(&mut self, ids: &[u64]) -> Vec<SegmentInfo> {
        let mut removed = Vec::new();
        self.sealed.retain(|segment| {
            if ids.contains(&segment.id) {
                removed.push(segment.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Replace the whole catalog state (used after truncation).
    pub(crate) fn reset(
        &mut self,
        sealed: Vec<SegmentInfo>,
        active: SegmentInfo,
        last_sequence: u64,
    ) {
        let wal_dir = std::mem::take(&mut self.wal_dir);
        *self = Self::new(wal_dir, sealed, active, last_sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: u64, start: u64, size: u64) -> SegmentInfo {
        let mut info = SegmentInfo::fresh(Path::new("/tmp/wal"), id, start);
        info.file_size = size;
        info
    }

    #[test]
    fn test_rotate_seals_previous_active() {
        let mut catalog = SegmentCatalog::new("/tmp/wal", Vec::new(), segment(1, 1, 0), 0);
        catalog.record_append(40, 1);
        catalog.record_append(40, 2);
        catalog.rotate(segment(2, 3, 0));

        assert_eq!(catalog.sealed().len(), 1);
        assert!(catalog.sealed()[0].sealed);
        assert_eq!(catalog.sealed()[0].file_size, 80);
        assert_eq!(catalog.active().id, 2);
        assert!(!catalog.active().sealed);
        assert_eq!(catalog.last_sequence(), 2);
        assert_eq!(catalog.sealed_bytes(), 80);
    }

    #[test]
    fn test_snapshot_orders_active_last() {
        let catalog = SegmentCatalog::new(
            "/tmp/wal",
            vec![segment(1, 1, 10), segment(2, 5, 10)],
            segment(3, 9, 0),
            8,
        );
        let snapshot = catalog.snapshot();
        let ids: Vec<u64> = snapshot.segments.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(snapshot.last_sequence, 8);
    }

    #[test]
    fn test_remove_sealed() {
        let mut catalog = SegmentCatalog::new(
            "/tmp/wal",
            vec![segment(1, 1, 10), segment(2, 5, 10)],
            segment(3, 9, 0),
            8,
        );
        let removed = catalog.remove_sealed(&[1, 3]);
        assert_eq!(removed.len(), 1);
        assert_eq!(catalog.sealed().len(), 1);
        assert_eq!(catalog.active().id, 3);
    }
}
