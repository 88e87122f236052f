// SPDX-License-Identifier: PMPL-1.0-or-later
//
// Keystone Write-Ahead Log - Reader for crash recovery
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `WalReader` scans segment files forward from a sequence number and
// yields entries lazily, a batch at a time. Every entry is checked against
// its CRC32 and against the expected next sequence number. Unlike a lenient
// scanner it never skips a bad entry: the first defect ends the stream with
// `WalError::CorruptEntry`, carrying the last good sequence so the caller can
// choose between truncating and aborting.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read};

use tracing::{debug, warn};

use crate::catalog::{CatalogSnapshot, SharedCatalog};
use crate::entry::{LogEntry, LENGTH_PREFIX_SIZE, MAX_ENTRY_SIZE, MIN_ENTRY_LENGTH};
use crate::error::{CorruptionPoint, WalError, WalResult};
use crate::segment::SegmentInfo;

// ---------------------------------------------------------------------------
// WalReader
// ---------------------------------------------------------------------------

/// Produces entry streams over the segments listed in a shared catalog.
///
/// Readers never block the writer: each stream works from a catalog
/// snapshot and opens its own file handles, so it observes a consistent
/// prefix of the log even while appends continue.
#[derive(Clone)]
pub struct WalReader {
    catalog: SharedCatalog,
    batch_size: usize,
}

impl WalReader {
    /// Create a reader over `catalog` fetching `batch_size` entries at a time.
    pub fn new(catalog: SharedCatalog, batch_size: usize) -> Self {
        Self {
            catalog,
            batch_size: batch_size.max(1),
        }
    }

    /// Stream every entry with sequence >= `from_sequence`.
    pub fn read_from(&self, from_sequence: u64) -> EntryStream {
        let snapshot = self.catalog.read().snapshot();
        EntryStream::new(snapshot, from_sequence, self.batch_size)
    }

    /// Stream the whole log.
    pub fn replay_all(&self) -> EntryStream {
        self.read_from(0)
    }

    /// The configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

// ---------------------------------------------------------------------------
// EntryStream
// ---------------------------------------------------------------------------

/// A lazy, forward-only sequence of log entries.
///
/// Entries are pulled from disk in batches of at most `batch_size`. The
/// stream is finite: it ends at the last entry that was written when it was
/// created. After an error it yields nothing more. To restart a stream, ask
/// the reader for a new one at [`resume_sequence`](Self::resume_sequence).
pub struct EntryStream {
    segments: VecDeque<SegmentInfo>,
    cursor: Option<SegmentCursor>,
    buffer: VecDeque<LogEntry>,
    from_sequence: u64,
    upper_bound: u64,
    batch_size: usize,
    last_good: u64,
    /// Segment id and length of the last segment read to its end.
    previous_end: Option<(u64, u64)>,
    last_yielded: Option<u64>,
    batches: usize,
    finished: bool,
    pending_error: Option<WalError>,
}

struct SegmentCursor {
    info: SegmentInfo,
    reader: BufReader<File>,
    offset: u64,
    is_last: bool,
}

/// Result of pulling one entry out of a segment.
enum Pull {
    Entry(LogEntry),
    EndOfSegment,
}

impl EntryStream {
    pub(crate) fn new(snapshot: CatalogSnapshot, from_sequence: u64, batch_size: usize) -> Self {
        let CatalogSnapshot {
            segments,
            last_sequence,
        } = snapshot;

        // Drop segments whose entries all precede `from_sequence`.
        let mut remaining: VecDeque<SegmentInfo> = VecDeque::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate() {
            let end_exclusive = segments
                .get(index + 1)
                .map(|next| next.start_sequence)
                .unwrap_or(u64::MAX);
            if end_exclusive > from_sequence {
                remaining.push_back(segment.clone());
            }
        }

        let last_good = remaining
            .front()
            .map(|s| s.start_sequence.saturating_sub(1))
            .unwrap_or(last_sequence);

        debug!(
            from_sequence,
            upper_bound = last_sequence,
            segments = remaining.len(),
            "Opening WAL entry stream"
        );

        Self {
            segments: remaining,
            cursor: None,
            buffer: VecDeque::with_capacity(batch_size),
            from_sequence,
            upper_bound: last_sequence,
            batch_size: batch_size.max(1),
            last_good,
            previous_end: None,
            last_yielded: None,
            batches: 0,
            finished: false,
            pending_error: None,
        }
    }

    /// Sequence to pass to a new stream to continue where this one stopped.
    pub fn resume_sequence(&self) -> u64 {
        self.last_yielded
            .map(|s| s + 1)
            .unwrap_or(self.from_sequence)
    }

    /// Sequence of the last entry that passed validation.
    pub fn last_good_sequence(&self) -> u64 {
        self.last_good
    }

    /// Number of underlying fetches performed so far.
    pub fn batches_fetched(&self) -> usize {
        self.batches
    }

    /// Fill the buffer with up to `batch_size` entries. Entries read before
    /// an error are still delivered; the error follows them.
    fn fetch_batch(&mut self) {
        if let Err(error) = self.fill_buffer() {
            self.finished = true;
            self.pending_error = Some(error);
        }
    }

    fn fill_buffer(&mut self) -> WalResult<()> {
        self.batches += 1;
        while self.buffer.len() < self.batch_size {
            if self.cursor.is_none() && !self.open_next_segment()? {
                self.finished = true;
                break;
            }

            match self.pull()? {
                Pull::Entry(entry) => {
                    if entry.sequence > self.upper_bound {
                        // Written after this stream was opened.
                        self.finished = true;
                        break;
                    }
                    if entry.sequence >= self.from_sequence {
                        self.buffer.push_back(entry);
                    }
                }
                Pull::EndOfSegment => {
                    if let Some(cursor) = self.cursor.take() {
                        self.previous_end = Some((cursor.info.id, cursor.offset));
                    }
                }
            }
        }
        Ok(())
    }

    fn open_next_segment(&mut self) -> WalResult<bool> {
        let Some(info) = self.segments.pop_front() else {
            return Ok(false);
        };
        let file = File::open(&info.path)?;
        let is_last = self.segments.is_empty();
        self.cursor = Some(SegmentCursor {
            info,
            reader: BufReader::new(file),
            offset: 0,
            is_last,
        });
        Ok(true)
    }

    fn pull(&mut self) -> WalResult<Pull> {
        let last_good = self.last_good;
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(Pull::EndOfSegment);
        };

        let corrupt = |cursor: &SegmentCursor, reason: String| WalError::CorruptEntry {
            point: CorruptionPoint {
                segment_id: cursor.info.id,
                offset: cursor.offset,
                last_good_sequence: last_good,
            },
            reason,
        };

        let mut length_bytes = [0u8; LENGTH_PREFIX_SIZE];
        let read = read_up_to(&mut cursor.reader, &mut length_bytes)?;
        if read == 0 {
            return Ok(Pull::EndOfSegment);
        }
        if read < LENGTH_PREFIX_SIZE {
            return torn_tail(cursor).ok_or_else(|| corrupt(cursor, "truncated length prefix".into()));
        }

        let entry_length = u32::from_le_bytes(length_bytes);
        if !(MIN_ENTRY_LENGTH..=MAX_ENTRY_SIZE).contains(&entry_length) {
            return Err(corrupt(
                cursor,
                format!("entry declares invalid length {entry_length}"),
            ));
        }

        let mut body = vec![0u8; entry_length as usize];
        let read = read_up_to(&mut cursor.reader, &mut body)?;
        if read < body.len() {
            return torn_tail(cursor).ok_or_else(|| {
                corrupt(
                    cursor,
                    format!("entry body truncated: {read} of {entry_length} bytes"),
                )
            });
        }

        let entry = LogEntry::decode(&body).map_err(|defect| {
            warn!(
                segment_id = cursor.info.id,
                offset = cursor.offset,
                last_good_sequence = last_good,
                %defect,
                "Corrupt WAL entry"
            );
            corrupt(cursor, defect.to_string())
        })?;

        let expected = last_good + 1;
        if entry.sequence != expected {
            let reason = format!("sequence gap: expected {expected}, found {}", entry.sequence);
            warn!(
                segment_id = cursor.info.id,
                offset = cursor.offset,
                last_good_sequence = last_good,
                %reason,
                "Corrupt WAL entry"
            );
            // A hole at a segment boundary is cut at the end of the segment
            // holding the last good entry.
            return Err(match (cursor.offset, self.previous_end) {
                (0, Some((segment_id, offset))) => WalError::CorruptEntry {
                    point: CorruptionPoint {
                        segment_id,
                        offset,
                        last_good_sequence: last_good,
                    },
                    reason,
                },
                _ => corrupt(cursor, reason),
            });
        }

        cursor.offset += (LENGTH_PREFIX_SIZE as u64) + entry_length as u64;
        self.last_good = entry.sequence;
        Ok(Pull::Entry(entry))
    }
}

/// A partial entry at the very end of the log is an append in flight (or a
/// write cut short by a crash) and marks the end of the readable prefix.
/// Anywhere else it is corruption.
fn torn_tail(cursor: &SegmentCursor) -> Option<Pull> {
    if cursor.is_last {
        debug!(
            segment_id = cursor.info.id,
            offset = cursor.offset,
            "Partial entry at end of log"
        );
        Some(Pull::EndOfSegment)
    } else {
        None
    }
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
pub(crate) fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl Iterator for EntryStream {
    type Item = WalResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.finished {
            self.fetch_batch();
        }

        match self.buffer.pop_front() {
            Some(entry) => {
                self.last_yielded = Some(entry.sequence);
                Some(Ok(entry))
            }
            None => self.pending_error.take().map(Err),
        }
    }
}
