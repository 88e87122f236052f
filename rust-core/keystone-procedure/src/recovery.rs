// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Outcome of resuming procedures after a restart.

use crate::id::ProcedureId;

/// A live procedure left untouched because nothing can rebuild it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProcedure {
    /// Procedure id.
    pub id: ProcedureId,
    /// Type with no registered loader.
    pub type_name: String,
}

/// What recovery did with each live procedure found in the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rebuilt and re-admitted for execution.
    pub resumed: Vec<ProcedureId>,
    /// No loader registered. These stay live and keep their log segments.
    pub skipped: Vec<SkippedProcedure>,
    /// The loader rejected the persisted dump; recorded as `Failed`.
    pub failed: Vec<ProcedureId>,
}

impl RecoveryReport {
    /// Number of live procedures examined.
    pub fn total(&self) -> usize {
        self.resumed.len() + self.skipped.len() + self.failed.len()
    }

    /// `true` if there was nothing to recover.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut report = RecoveryReport::default();
        assert!(report.is_empty());
        report.resumed.push(ProcedureId::new());
        report.skipped.push(SkippedProcedure {
            id: ProcedureId::new(),
            type_name: "legacy".into(),
        });
        assert_eq!(report.total(), 2);
        assert!(!report.is_empty());
    }
}
