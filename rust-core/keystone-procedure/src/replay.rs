// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Rebuilding procedure state from the log.
//!
//! Replay is a pure fold: each `(sequence, LogRecord)` pair is applied in
//! order to a [`ReplayState`], which keeps the latest record of every
//! procedure that has not reached a terminal state. Nothing here touches the
//! filesystem.

use std::collections::HashMap;

use crate::id::ProcedureId;
use crate::record::{LogRecord, ProcedureRecord};

/// Latest record of a live procedure plus the sequence that carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRecord {
    /// The latest snapshot.
    pub record: ProcedureRecord,
    /// Sequence of the WAL entry holding `record`.
    pub sequence: u64,
}

/// Accumulated result of replaying a prefix of the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayState {
    live: HashMap<ProcedureId, LiveRecord>,
    last_sequence: u64,
    applied: usize,
}

impl ReplayState {
    /// Fold one entry into the state.
    pub fn apply(mut self, sequence: u64, entry: LogRecord) -> Self {
        self.last_sequence = sequence;
        self.applied += 1;

        match entry {
            LogRecord::Transition { record } | LogRecord::Progress { record } => {
                if record.state.is_terminal() {
                    self.live.remove(&record.id);
                } else {
                    self.live.insert(record.id, LiveRecord { record, sequence });
                }
            }
            LogRecord::Checkpoint { records } => {
                self.live = records
                    .into_iter()
                    .filter(|record| !record.state.is_terminal())
                    .map(|record| (record.id, LiveRecord { record, sequence }))
                    .collect();
            }
        }
        self
    }

    /// Live procedures keyed by id.
    pub fn live(&self) -> &HashMap<ProcedureId, LiveRecord> {
        &self.live
    }

    /// Consume the state, keeping only the records.
    pub fn into_records(self) -> HashMap<ProcedureId, ProcedureRecord> {
        self.live
            .into_iter()
            .map(|(id, live)| (id, live.record))
            .collect()
    }

    /// Consume the state, keeping records and their sequences.
    pub fn into_live(self) -> HashMap<ProcedureId, LiveRecord> {
        self.live
    }

    /// Sequence of the last applied entry, `0` if none.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Number of entries applied.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Oldest sequence still referenced by a live procedure.
    pub fn low_water_mark(&self) -> Option<u64> {
        self.live.values().map(|live| live.sequence).min()
    }
}

/// Fold a whole entry sequence.
pub fn replay<I>(entries: I) -> ReplayState
where
    I: IntoIterator<Item = (u64, LogRecord)>,
{
    entries
        .into_iter()
        .fold(ReplayState::default(), |state, (sequence, entry)| {
            state.apply(sequence, entry)
        })
}
