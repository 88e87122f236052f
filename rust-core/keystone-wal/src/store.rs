// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Segment store
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `SegmentStore` owns the active segment file. It assigns sequence
// numbers, rotates to a fresh segment when the active one is full, repairs a
// torn tail on open and truncates the log after corruption. It is not
// synchronized itself; `WalWriter` wraps it in the single lock that all
// mutation goes through.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::catalog::{SegmentCatalog, SharedCatalog};
use crate::config::{CorruptionPolicy, WalConfig};
use crate::entry::{encode_parts, LogEntry, LENGTH_PREFIX_SIZE, MAX_ENTRY_SIZE, MIN_ENTRY_LENGTH};
use crate::error::{CorruptionPoint, WalError, WalResult};
use crate::purge::{PurgePolicy, SegmentPurger};
use crate::reader::{read_up_to, EntryStream, WalReader};
use crate::segment::{list_segments, SegmentInfo};

/// Append-only storage split into rotated segment files.
pub struct SegmentStore {
    wal_dir: PathBuf,
    config: WalConfig,
    catalog: SharedCatalog,
    active_file: File,
    next_sequence: u64,
}

impl SegmentStore {
    /// Open the log in `wal_dir`, creating the directory and a first segment
    /// when the log is new.
    ///
    /// An existing active segment is scanned to find where the sequence
    /// resumes. A partially written final entry is cut off. A corrupt entry
    /// inside the active segment is handled according to
    /// [`WalConfig::corruption_policy`].
    pub fn open(wal_dir: impl AsRef<Path>, config: WalConfig) -> WalResult<Self> {
        config.validate()?;
        let wal_dir = wal_dir.as_ref().to_path_buf();

        if !wal_dir.exists() {
            fs::create_dir_all(&wal_dir)?;
            info!(dir = %wal_dir.display(), "Created WAL directory");
        }

        let mut segments = list_segments(&wal_dir)?;

        let (catalog, active_file, next_sequence) = match segments.pop() {
            None => {
                let active = SegmentInfo::fresh(&wal_dir, 1, 1);
                let file = create_segment_file(&active.path)?;
                sync_dir(&wal_dir)?;
                info!(dir = %wal_dir.display(), "Initialized fresh WAL at sequence 1");
                (SegmentCatalog::new(&wal_dir, Vec::new(), active, 0), file, 1)
            }
            Some(mut active) => {
                let scan = scan_segment(&active)?;
                let valid_len = resolve_scan(&active, &scan, config.corruption_policy)?;

                if valid_len < active.file_size {
                    let file = OpenOptions::new().write(true).open(&active.path)?;
                    file.set_len(valid_len)?;
                    file.sync_all()?;
                    warn!(
                        segment_id = active.id,
                        from = active.file_size,
                        to = valid_len,
                        "Truncated WAL segment tail"
                    );
                    active.file_size = valid_len;
                }

                let last_sequence = scan.last_sequence;
                let file = OpenOptions::new().append(true).open(&active.path)?;
                info!(
                    segment_id = active.id,
                    sealed_segments = segments.len(),
                    next_sequence = last_sequence + 1,
                    "Resuming WAL"
                );
                (
                    SegmentCatalog::new(&wal_dir, segments, active, last_sequence),
                    file,
                    last_sequence + 1,
                )
            }
        };

        Ok(Self {
            wal_dir,
            config,
            catalog: catalog.into_shared(),
            active_file,
            next_sequence,
        })
    }

    /// Append `payload` as a new entry and return its sequence number.
    ///
    /// When the active segment cannot take the entry, the segment is sealed
    /// and the entry goes into a fresh one. Callers never see
    /// `CapacityExceeded`.
    pub fn append(&mut self, payload: &[u8]) -> WalResult<u64> {
        let length = LogEntry::encoded_len(payload.len());
        let max_length = u64::from(MAX_ENTRY_SIZE);
        if length - LENGTH_PREFIX_SIZE as u64 > max_length {
            return Err(WalError::EntryTooLarge { length, max_length });
        }

        match self.try_append(payload, length) {
            Err(WalError::CapacityExceeded {
                segment_id,
                size,
                incoming,
                max,
            }) => {
                debug!(segment_id, size, incoming, max, "Active segment full");
                self.rotate()?;
                // A fresh segment always takes the entry, even one larger
                // than the segment size.
                self.write_entry(payload)
            }
            other => other,
        }
    }

    fn try_append(&mut self, payload: &[u8], length: u64) -> WalResult<u64> {
        let catalog = self.catalog.read();
        let active = catalog.active();
        if active.file_size > 0 && active.would_overflow(length, self.config.segment_size) {
            return Err(WalError::CapacityExceeded {
                segment_id: active.id,
                size: active.file_size,
                incoming: length,
                max: self.config.segment_size,
            });
        }
        drop(catalog);
        self.write_entry(payload)
    }

    fn write_entry(&mut self, payload: &[u8]) -> WalResult<u64> {
        let sequence = self.next_sequence;
        let bytes = encode_parts(sequence, Utc::now(), payload);
        let previous_size = self.catalog.read().active().file_size;

        if let Err(e) = self.active_file.write_all(&bytes) {
            // Leave no partial entry behind.
            if let Err(truncate_error) = self.active_file.set_len(previous_size) {
                error!(
                    sequence,
                    error = %truncate_error,
                    "Failed to roll back partial WAL write"
                );
            }
            return Err(e.into());
        }

        self.catalog.write().record_append(bytes.len() as u64, sequence);
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Remove the entry just appended with `payload_len` payload bytes. Only
    /// valid for the most recent append: that entry is always the tail of
    /// the active segment, even when the append rotated.
    pub(crate) fn rollback_last(&mut self, payload_len: usize) -> WalResult<()> {
        let length = LogEntry::encoded_len(payload_len);
        let size = self.catalog.read().active().file_size;
        let truncated = size.saturating_sub(length);

        self.active_file.set_len(truncated)?;
        self.next_sequence -= 1;
        self.catalog
            .write()
            .record_rollback(truncated, self.next_sequence - 1);
        Ok(())
    }

    /// Seal the active segment and start a new one at the next sequence.
    pub fn rotate(&mut self) -> WalResult<()> {
        self.active_file.sync_all()?;

        let (previous_id, next) = {
            let catalog = self.catalog.read();
            let previous = catalog.active();
            (
                previous.id,
                SegmentInfo::fresh(&self.wal_dir, previous.id + 1, self.next_sequence),
            )
        };

        let file = create_segment_file(&next.path)?;
        sync_dir(&self.wal_dir)?;

        info!(
            sealed_segment = previous_id,
            new_segment = next.id,
            start_sequence = next.start_sequence,
            "Rotated WAL segment"
        );

        self.catalog.write().rotate(next);
        self.active_file = file;
        Ok(())
    }

    /// Flush the active segment to stable storage.
    pub fn sync(&mut self) -> WalResult<()> {
        self.active_file.sync_all()?;
        Ok(())
    }

    /// Cut the log at `point`: the segment holding the corrupt entry is
    /// truncated at its offset and becomes the active segment, every later
    /// segment is deleted, and the next append gets
    /// `point.last_good_sequence + 1`.
    pub fn truncate_at(&mut self, point: CorruptionPoint) -> WalResult<()> {
        let snapshot = self.catalog.read().snapshot();
        let Some(target) = snapshot
            .segments
            .iter()
            .find(|s| s.id == point.segment_id)
            .cloned()
        else {
            return Err(WalError::SegmentNotFound(point.segment_id));
        };

        for later in snapshot.segments.iter().filter(|s| s.id > target.id) {
            match fs::remove_file(&later.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(segment_id = later.id, "Deleted WAL segment after truncation point");
        }

        let file = OpenOptions::new().write(true).open(&target.path)?;
        file.set_len(point.offset)?;
        file.sync_all()?;
        drop(file);
        sync_dir(&self.wal_dir)?;

        let mut active = target;
        active.file_size = point.offset;
        active.modified_at = Utc::now();
        let sealed: Vec<SegmentInfo> = snapshot
            .segments
            .into_iter()
            .filter(|s| s.id < active.id)
            .collect();

        self.active_file = OpenOptions::new().append(true).open(&active.path)?;
        self.next_sequence = point.last_good_sequence + 1;

        warn!(
            segment_id = active.id,
            offset = point.offset,
            last_good_sequence = point.last_good_sequence,
            "Truncated WAL after corruption"
        );

        self.catalog
            .write()
            .reset(sealed, active, point.last_good_sequence);
        Ok(())
    }

    /// Stream entries with sequence >= `sequence`, `batch_size` at a time.
    pub fn read_from(&self, sequence: u64, batch_size: usize) -> EntryStream {
        WalReader::new(self.catalog.clone(), batch_size).read_from(sequence)
    }

    /// A purger for this log using the configured policy.
    pub fn purger(&self) -> SegmentPurger {
        SegmentPurger::new(self.catalog.clone(), PurgePolicy::from(&self.config))
    }

    /// The shared segment catalog.
    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// The sequence the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// The WAL directory.
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }
}

// ---------------------------------------------------------------------------
// Open-time scan
// ---------------------------------------------------------------------------

/// What scanning one segment from the start found.
#[derive(Debug)]
struct SegmentScan {
    /// Sequence of the last valid entry, or `start_sequence - 1`.
    last_sequence: u64,
    /// Byte length of the valid prefix.
    valid_len: u64,
    defect: Option<ScanDefect>,
}

#[derive(Debug)]
enum ScanDefect {
    /// The final entry was only partly written.
    TornTail,
    /// A complete entry failed validation.
    Corrupt(String),
}

fn scan_segment(segment: &SegmentInfo) -> WalResult<SegmentScan> {
    let mut reader = BufReader::new(File::open(&segment.path)?);
    let mut scan = SegmentScan {
        last_sequence: segment.start_sequence.saturating_sub(1),
        valid_len: 0,
        defect: None,
    };

    loop {
        let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
        let read = read_up_to(&mut reader, &mut length_bytes)?;
        if read == 0 {
            break;
        }
        if read < LENGTH_PREFIX_SIZE {
            scan.defect = Some(ScanDefect::TornTail);
            break;
        }

        let entry_length = u32::from_le_bytes(length_bytes);
        if !(MIN_ENTRY_LENGTH..=MAX_ENTRY_SIZE).contains(&entry_length) {
            scan.defect = Some(ScanDefect::Corrupt(format!(
                "entry declares invalid length {entry_length}"
            )));
            break;
        }

        let mut body = vec![0u8; entry_length as usize];
        if read_up_to(&mut reader, &mut body)? < body.len() {
            scan.defect = Some(ScanDefect::TornTail);
            break;
        }

        match LogEntry::decode(&body) {
            Ok(entry) if entry.sequence == scan.last_sequence + 1 => {
                scan.last_sequence = entry.sequence;
                scan.valid_len += (LENGTH_PREFIX_SIZE as u64) + u64::from(entry_length);
            }
            Ok(entry) => {
                scan.defect = Some(ScanDefect::Corrupt(format!(
                    "sequence gap: expected {}, found {}",
                    scan.last_sequence + 1,
                    entry.sequence
                )));
                break;
            }
            Err(defect) => {
                scan.defect = Some(ScanDefect::Corrupt(defect.to_string()));
                break;
            }
        }
    }

    Ok(scan)
}

/// Decide how much of the scanned segment to keep.
fn resolve_scan(
    segment: &SegmentInfo,
    scan: &SegmentScan,
    policy: CorruptionPolicy,
) -> WalResult<u64> {
    match (&scan.defect, policy) {
        (None, _) => Ok(scan.valid_len),
        (Some(ScanDefect::TornTail), _) => {
            debug!(
                segment_id = segment.id,
                offset = scan.valid_len,
                "Found partial entry at end of WAL"
            );
            Ok(scan.valid_len)
        }
        (Some(ScanDefect::Corrupt(reason)), CorruptionPolicy::Truncate) => {
            warn!(
                segment_id = segment.id,
                offset = scan.valid_len,
                last_good_sequence = scan.last_sequence,
                reason = %reason,
                "Corrupt WAL entry, truncating"
            );
            Ok(scan.valid_len)
        }
        (Some(ScanDefect::Corrupt(reason)), CorruptionPolicy::Abort) => {
            error!(
                segment_id = segment.id,
                offset = scan.valid_len,
                last_good_sequence = scan.last_sequence,
                reason = %reason,
                "Corrupt WAL entry"
            );
            Err(WalError::CorruptEntry {
                point: CorruptionPoint {
                    segment_id: segment.id,
                    offset: scan.valid_len,
                    last_good_sequence: scan.last_sequence,
                },
                reason: reason.clone(),
            })
        }
    }
}

fn create_segment_file(path: &Path) -> WalResult<File> {
    let file = OpenOptions::new().create_new(true).append(true).open(path)?;
    Ok(file)
}

/// Persist directory entries (new or removed segment files).
#[cfg(unix)]
fn sync_dir(dir: &Path) -> WalResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> WalResult<()> {
    Ok(())
}
