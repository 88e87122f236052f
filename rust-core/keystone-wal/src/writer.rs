// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Serialized writer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `WalWriter` is the single serialization point for appends. It owns the
// segment store behind a mutex, applies the configured `SyncMode`, and hands
// out readers and purgers that share its segment catalog.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::catalog::SharedCatalog;
use crate::config::WalConfig;
use crate::error::{CorruptionPoint, WalError, WalResult};
use crate::purge::SegmentPurger;
use crate::reader::WalReader;
use crate::store::SegmentStore;

// ---------------------------------------------------------------------------
// SyncMode
// ---------------------------------------------------------------------------

/// Controls how aggressively the WAL writer calls `fsync` to flush data to
/// stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Call `fsync` after every single write. Acknowledged writes survive a
    /// crash.
    Fsync,

    /// Call `fsync` at most once per the specified duration. Writes between
    /// syncs may be lost on crash.
    Periodic(Duration),

    /// Never explicitly call `fsync`; rely on the OS page cache.
    Async,
}

// ---------------------------------------------------------------------------
// WalStats
// ---------------------------------------------------------------------------

/// Point-in-time counters describing the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalStats {
    /// Segments on disk, active included.
    pub segment_count: usize,
    /// Bytes held by sealed segments.
    pub sealed_bytes: u64,
    /// Bytes held by the active segment.
    pub active_bytes: u64,
    /// Id of the active segment.
    pub active_segment_id: u64,
    /// Sequence the next write will receive.
    pub next_sequence: u64,
}

// ---------------------------------------------------------------------------
// WalWriter
// ---------------------------------------------------------------------------

struct WriterState {
    store: SegmentStore,
    last_sync: Instant,
    /// Set when an unsynced entry could not be rolled back.
    failed_at: Option<u64>,
    #[cfg(test)]
    injected_sync_failures: usize,
}

impl WriterState {
    fn sync(&mut self) -> WalResult<()> {
        #[cfg(test)]
        {
            if self.injected_sync_failures > 0 {
                self.injected_sync_failures -= 1;
                return Err(std::io::Error::other("injected sync failure").into());
            }
        }
        self.store.sync()?;
        self.last_sync = Instant::now();
        Ok(())
    }
}

/// Thread-safe append handle for the write-ahead log.
///
/// Every mutation of the active segment (append, seal, rotate, truncate)
/// happens under one lock, so sequence numbers are handed out in write order
/// with no gaps. Readers and the purger only touch the shared catalog.
pub struct WalWriter {
    state: Mutex<WriterState>,
    catalog: SharedCatalog,
    config: WalConfig,
    sync_mode: SyncMode,
    wal_dir: PathBuf,
}

impl WalWriter {
    /// Open an existing WAL directory or initialize a new one.
    ///
    /// If the directory already contains segment files, the writer resumes
    /// after the last valid entry. If the directory is empty or does not
    /// exist, a fresh segment is created starting at sequence 1.
    pub fn open(wal_dir: impl AsRef<Path>, config: WalConfig) -> WalResult<Self> {
        let wal_dir = wal_dir.as_ref().to_path_buf();
        let store = SegmentStore::open(&wal_dir, config.clone())?;
        let catalog = store.catalog().clone();
        let sync_mode = config.sync_mode();

        info!(
            dir = %wal_dir.display(),
            ?sync_mode,
            segment_size = config.segment_size,
            next_sequence = store.next_sequence(),
            "Opened WAL writer"
        );

        Ok(Self {
            state: Mutex::new(WriterState {
                store,
                last_sync: Instant::now(),
                failed_at: None,
                #[cfg(test)]
                injected_sync_failures: 0,
            }),
            catalog,
            config,
            sync_mode,
            wal_dir,
        })
    }

    /// Append `payload` and return its sequence number.
    ///
    /// With [`SyncMode::Fsync`] the entry is on stable storage when this
    /// returns. If the sync fails the entry is cut from the log again and
    /// its sequence is reused by the next write; if that cut fails too, the
    /// writer rejects every later write with [`WalError::WriterFailed`].
    pub fn write(&self, payload: &[u8]) -> WalResult<u64> {
        let mut state = self.state.lock();
        if let Some(sequence) = state.failed_at {
            return Err(WalError::WriterFailed(sequence));
        }
        let sequence = state.store.append(payload)?;

        let synced = match self.sync_mode {
            SyncMode::Fsync => state.sync(),
            SyncMode::Periodic(interval) if state.last_sync.elapsed() >= interval => state.sync(),
            SyncMode::Periodic(_) | SyncMode::Async => Ok(()),
        };

        if let Err(sync_error) = synced {
            match state.store.rollback_last(payload.len()) {
                Ok(()) => warn!(sequence, error = %sync_error, "WAL sync failed, entry rolled back"),
                Err(rollback_error) => {
                    error!(
                        sequence,
                        error = %sync_error,
                        rollback_error = %rollback_error,
                        "WAL sync failed and entry could not be rolled back"
                    );
                    state.failed_at = Some(sequence);
                }
            }
            return Err(sync_error);
        }

        debug!(sequence, bytes = payload.len(), "Appended WAL entry");
        Ok(sequence)
    }

    /// Force an immediate `fsync` of the active segment regardless of the
    /// configured `SyncMode`.
    pub fn flush(&self) -> WalResult<()> {
        self.state.lock().sync()
    }

    /// Seal the active segment now, even if it still has room.
    pub fn rotate(&self) -> WalResult<()> {
        self.state.lock().store.rotate()
    }

    /// Cut the log at a corruption point reported by a reader.
    pub fn truncate_at(&self, point: CorruptionPoint) -> WalResult<()> {
        self.state.lock().store.truncate_at(point)
    }

    /// A reader over this log using the configured batch size.
    pub fn reader(&self) -> WalReader {
        WalReader::new(self.catalog.clone(), self.config.read_batch_size)
    }

    /// A purger over this log using the configured thresholds.
    pub fn purger(&self) -> SegmentPurger {
        self.state.lock().store.purger()
    }

    /// Current counters. Does not wait for in-flight writes.
    pub fn stats(&self) -> WalStats {
        let catalog = self.catalog.read();
        WalStats {
            segment_count: catalog.segment_count(),
            sealed_bytes: catalog.sealed_bytes(),
            active_bytes: catalog.active().file_size,
            active_segment_id: catalog.active().id,
            next_sequence: catalog.last_sequence() + 1,
        }
    }

    /// Returns the sequence number that will be assigned to the next entry.
    pub fn next_sequence(&self) -> u64 {
        self.catalog.read().last_sequence() + 1
    }

    /// The configured durability mode.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// The configuration the writer was opened with.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Returns the path to the WAL directory.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }
}
