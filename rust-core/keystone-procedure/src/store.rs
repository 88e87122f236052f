// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Procedure state store.
//!
//! Turns procedure records into WAL entries and back. A transition counts as
//! having happened only once `record_transition` returns: the entry is then
//! committed under the WAL's durability mode. The store also tracks, for
//! every live procedure, the sequence of its latest entry and publishes the
//! minimum of those as the low-water-mark that gates segment purge.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use keystone_wal::{CorruptionPolicy, RetentionGuard, WalWriter};

use crate::error::ProcedureResult;
use crate::id::ProcedureId;
use crate::record::{LogRecord, ProcedureRecord};
use crate::replay::{LiveRecord, ReplayState};

/// Durable store of procedure records backed by the write-ahead log.
pub struct ProcedureStore {
    wal: Arc<WalWriter>,
    live: Mutex<HashMap<ProcedureId, LiveRecord>>,
}

impl ProcedureStore {
    /// Create a store over `wal`. Call [`load_all`](Self::load_all) before
    /// use to pick up procedures left by a previous run.
    pub fn new(wal: Arc<WalWriter>) -> Self {
        Self {
            wal,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying log.
    pub fn wal(&self) -> &Arc<WalWriter> {
        &self.wal
    }

    /// Durably record that `record.id` moved to `record.state`. Returns the
    /// sequence of the WAL entry.
    pub fn record_transition(&self, record: &ProcedureRecord) -> ProcedureResult<u64> {
        self.append(LogRecord::Transition {
            record: record.clone(),
        })
    }

    /// Durably record step progress of a procedure whose state is unchanged.
    pub fn record_progress(&self, record: &ProcedureRecord) -> ProcedureResult<u64> {
        self.append(LogRecord::Progress {
            record: record.clone(),
        })
    }

    fn append(&self, entry: LogRecord) -> ProcedureResult<u64> {
        let bytes = entry.encode()?;

        // Held across the write: once the mark is read, every earlier entry
        // is reflected in it. Later ones are covered by the purger's bound.
        let mut live = self.live.lock();
        let sequence = self.wal.write(&bytes)?;

        if let LogRecord::Transition { record } | LogRecord::Progress { record } = entry {
            debug!(
                procedure_id = %record.id,
                state = %record.state,
                sequence,
                "Recorded procedure state"
            );
            if record.state.is_terminal() {
                live.remove(&record.id);
            } else {
                live.insert(record.id, LiveRecord { record, sequence });
            }
        }

        Ok(sequence)
    }

    /// Replay the log and return the latest record of every procedure that
    /// has not reached a terminal state.
    ///
    /// Replay restarts at every checkpoint it meets. A corrupt entry aborts
    /// the load unless the log is configured to truncate, in which case the
    /// log is cut at the last good entry and the prefix is used.
    pub fn load_all(&self) -> ProcedureResult<HashMap<ProcedureId, ProcedureRecord>> {
        let state = self.replay()?;

        info!(
            entries = state.applied(),
            live = state.live().len(),
            last_sequence = state.last_sequence(),
            "Replayed procedure log"
        );

        *self.live.lock() = state.live().clone();
        Ok(state.into_records())
    }

    fn replay(&self) -> ProcedureResult<ReplayState> {
        let mut state = ReplayState::default();
        for entry in self.wal.reader().replay_all() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => match error.corruption_point() {
                    Some(point)
                        if self.wal.config().corruption_policy == CorruptionPolicy::Truncate =>
                    {
                        warn!(%point, "Truncating procedure log at corrupt entry");
                        self.wal.truncate_at(point)?;
                        break;
                    }
                    _ => return Err(error.into()),
                },
            };
            let record = LogRecord::decode(&entry.payload)?;
            state = state.apply(entry.sequence, record);
        }
        Ok(state)
    }

    /// Write a snapshot of every live record and flush it. Entries before
    /// the snapshot are no longer needed for recovery.
    pub fn checkpoint(&self) -> ProcedureResult<u64> {
        let mut live = self.live.lock();
        let records: Vec<ProcedureRecord> = live.values().map(|l| l.record.clone()).collect();
        let count = records.len();

        let bytes = LogRecord::Checkpoint { records }.encode()?;
        let sequence = self.wal.write(&bytes)?;
        self.wal.flush()?;

        for entry in live.values_mut() {
            entry.sequence = sequence;
        }

        info!(sequence, live = count, "Wrote procedure checkpoint");
        Ok(sequence)
    }

    /// Oldest sequence still needed by a live procedure, `None` if no
    /// procedure is live.
    pub fn low_water_mark(&self) -> Option<u64> {
        self.live.lock().values().map(|l| l.sequence).min()
    }

    /// Latest durable record of a live procedure.
    pub fn live_record(&self, id: ProcedureId) -> Option<ProcedureRecord> {
        self.live.lock().get(&id).map(|l| l.record.clone())
    }

    /// Whether `id` is a live procedure.
    pub fn is_live(&self, id: ProcedureId) -> bool {
        self.live.lock().contains_key(&id)
    }

    /// Number of live procedures.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl RetentionGuard for ProcedureStore {
    fn low_water_mark(&self) -> Option<u64> {
        ProcedureStore::low_water_mark(self)
    }
}
